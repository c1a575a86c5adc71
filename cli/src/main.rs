//! midicable CLI - Route MIDI between ports, including hot-plugged devices
//!
//! A command-line tool for listing MIDI ports and running the router.
//! The router starts this same binary as its helper processes, through the
//! `pipe-worker` and `relay-worker` subcommands.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "midicable")]
#[command(author, version, about = "Route MIDI between ports, including hot-plugged devices")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List MIDI ports as the driver reports them right now
    #[command(alias = "ls")]
    ListPorts,

    /// Run the router until interrupted
    Run {
        /// Extra route to add at startup, as "SOURCE=>DESTINATION"
        #[arg(short, long = "connect", value_name = "ROUTE")]
        connect: Vec<String>,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Helper: forward framed messages from stdin to an output
    #[command(hide = true)]
    PipeWorker { destination: String },

    /// Helper: forward messages from an input to an output
    #[command(hide = true)]
    RelayWorker { source: String, destination: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Add a virtual port pair
    AddPort { name: String },
    /// Remove a virtual port pair
    #[command(alias = "rm")]
    RemovePort { name: String },
    /// Set the log level used by `run`
    LogLevel { level: Level },
    /// Print the configuration file path
    Path,
}

/// Install the stderr log subscriber. Stdout belongs to command output and
/// the worker handshake.
pub fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let quiet = if cli.verbose { Level::DEBUG } else { Level::WARN };

    match cli.command {
        Commands::ListPorts => {
            init_logging(quiet);
            commands::list_ports::run(cli.json)?;
        }
        Commands::Run { connect } => {
            commands::run::run(connect, cli.json, cli.verbose).await?;
        }
        Commands::Config { action } => {
            init_logging(quiet);
            match action.unwrap_or(ConfigAction::Show) {
                ConfigAction::Show => commands::config::show(cli.json).await?,
                ConfigAction::AddPort { name } => commands::config::add_port(&name).await?,
                ConfigAction::RemovePort { name } => commands::config::remove_port(&name).await?,
                ConfigAction::LogLevel { level } => commands::config::set_log_level(level).await?,
                ConfigAction::Path => commands::config::path()?,
            }
        }
        Commands::PipeWorker { destination } => {
            init_logging(quiet);
            std::process::exit(commands::worker::pipe(&destination));
        }
        Commands::RelayWorker {
            source,
            destination,
        } => {
            init_logging(quiet);
            std::process::exit(commands::worker::relay(&source, &destination));
        }
    }

    Ok(())
}
