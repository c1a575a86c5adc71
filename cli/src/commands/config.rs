//! Config command - show and change configuration.

use anyhow::Result;
use midicable_core::ConfigStore;
use tracing::Level;

pub async fn show(json: bool) -> Result<()> {
    let store = ConfigStore::new()?;
    let config = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration file: {}", store.path().display());
    println!();
    println!("Virtual ports:");
    if config.virtual_ports.is_empty() {
        println!("  (none)");
    }
    for name in &config.virtual_ports {
        println!("  {}", name);
    }
    println!();
    println!("Default wiring:        {}", config.default_wiring);
    println!("Poll interval:         {} ms", config.poll_interval_ms);
    println!("Enumeration spacing:   {} ms", config.min_enumeration_spacing_ms);
    println!("Enumeration timeout:   {} ms", config.enumeration_timeout_ms);
    println!(
        "Startup barrier:       {} attempts, every {} ms, at most {} ms",
        config.barrier_attempts, config.barrier_interval_ms, config.barrier_timeout_ms
    );
    println!("Worker startup limit:  {} ms", config.worker_startup_timeout_ms);
    println!("Termination grace:     {} ms", config.termination_grace_ms);
    println!(
        "Queues:                {} ingress, {} per pipe",
        config.ingress_queue_capacity, config.pipe_queue_capacity
    );
    println!("Log level:             {}", config.log_level);

    Ok(())
}

pub async fn add_port(name: &str) -> Result<()> {
    ConfigStore::new()?.add_virtual_port(name).await?;
    println!("Added virtual port '{}'", name);
    Ok(())
}

pub async fn remove_port(name: &str) -> Result<()> {
    ConfigStore::new()?.remove_virtual_port(name).await?;
    println!("Removed virtual port '{}'", name);
    Ok(())
}

pub async fn set_log_level(level: Level) -> Result<()> {
    let level = level.to_string().to_lowercase();
    ConfigStore::new()?.set_log_level(&level).await?;
    println!("Log level set to {}", level);
    Ok(())
}

pub fn path() -> Result<()> {
    println!("{}", ConfigStore::new()?.path().display());
    Ok(())
}
