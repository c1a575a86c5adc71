//! Run command - start the router and print its events until Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use midicable_core::{ConfigStore, ConnectionStatus, Event, Router};
use tracing::{warn, Level};

pub async fn run(connect: Vec<String>, json: bool, verbose: bool) -> Result<()> {
    let config = ConfigStore::new()?.load().await?;
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };
    crate::init_logging(level);

    let routes = connect
        .iter()
        .map(|r| parse_route(r))
        .collect::<Result<Vec<_>>>()?;

    let router = Arc::new(
        Router::start(&config)
            .await
            .context("Failed to start router")?,
    );
    let events = router.subscribe();
    let printer = std::thread::spawn(move || {
        for event in events {
            print_event(&event, json);
        }
    });

    // Each add waits for its worker to come up.
    let connector = Arc::clone(&router);
    tokio::task::spawn_blocking(move || {
        for (source, destination) in &routes {
            if let Err(e) = connector.add(source, destination) {
                warn!("Could not connect {} to {}: {}", source, destination, e);
            }
        }
    })
    .await
    .context("Route setup panicked")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    router.shutdown();
    drop(router);
    let _ = printer.join();
    Ok(())
}

/// Parse `"SOURCE=>DESTINATION"`.
fn parse_route(route: &str) -> Result<(String, String)> {
    let Some((source, destination)) = route.split_once("=>") else {
        bail!("Route '{}' is not of the form SOURCE=>DESTINATION", route);
    };
    let (source, destination) = (source.trim(), destination.trim());
    if source.is_empty() || destination.is_empty() {
        bail!("Route '{}' is missing a port name", route);
    }
    Ok((source.to_string(), destination.to_string()))
}

fn print_event(event: &Event, json: bool) {
    let now = Local::now();

    if json {
        let line = serde_json::json!({
            "time": now.to_rfc3339(),
            "event": event,
        });
        println!("{}", line);
        return;
    }

    let time = now.format("%H:%M:%S");
    match event {
        Event::PortListChanged { snapshot } => {
            println!(
                "[{}] Ports: {} inputs, {} outputs",
                time,
                snapshot.inputs.len(),
                snapshot.outputs.len()
            );
            for port in &snapshot.inputs {
                println!("           in   {}", port.name);
            }
            for port in &snapshot.outputs {
                println!("           out  {}", port.name);
            }
        }
        Event::ConnectionStatusChanged {
            connection, status, ..
        } => {
            let marker = match status {
                ConnectionStatus::Active => "+",
                ConnectionStatus::Starting => "~",
                ConnectionStatus::Failed => "!",
                ConnectionStatus::Closed => "-",
            };
            println!(
                "[{}] {} {} ({}): {}",
                time, marker, connection, connection.strategy, status
            );
        }
        Event::Log { message } => println!("[{}] {}", time, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_route() {
        assert_eq!(
            parse_route("Keystation 49 => midicable A").unwrap(),
            ("Keystation 49".to_string(), "midicable A".to_string())
        );
        assert_eq!(
            parse_route("A=>B").unwrap(),
            ("A".to_string(), "B".to_string())
        );
        assert!(parse_route("A->B").is_err());
        assert!(parse_route("=>B").is_err());
    }
}
