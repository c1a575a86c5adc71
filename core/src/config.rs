//! Configuration management for virtual ports and engine tuning.
//!
//! Stores configuration in JSON format at `~/.midicable/config.json`.
//! Missing keys fall back to their defaults, so a partial file is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::application::{ManagerSettings, MonitorSettings};
use crate::error::{Error, Result};
use crate::routing::PairSettings;

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Names of the virtual port pairs to publish.
    #[serde(default = "default_virtual_ports")]
    pub virtual_ports: Vec<String>,

    /// Route each pair's input to its own output at startup.
    #[serde(default = "default_true")]
    pub default_wiring: bool,

    /// Hot-plug poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum time between two enumeration subprocesses.
    #[serde(default = "default_min_enumeration_spacing_ms")]
    pub min_enumeration_spacing_ms: u64,

    /// Time limit for one enumeration subprocess.
    #[serde(default = "default_enumeration_timeout_ms")]
    pub enumeration_timeout_ms: u64,

    #[serde(default = "default_barrier_attempts")]
    pub barrier_attempts: u32,

    #[serde(default = "default_barrier_interval_ms")]
    pub barrier_interval_ms: u64,

    #[serde(default = "default_barrier_timeout_ms")]
    pub barrier_timeout_ms: u64,

    /// How long a worker may take to report ready.
    #[serde(default = "default_worker_startup_timeout_ms")]
    pub worker_startup_timeout_ms: u64,

    /// How long teardown waits for a worker to exit.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    #[serde(default = "default_ingress_queue_capacity")]
    pub ingress_queue_capacity: usize,

    #[serde(default = "default_pipe_queue_capacity")]
    pub pipe_queue_capacity: usize,

    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_virtual_ports() -> Vec<String> {
    vec!["midicable A".to_string(), "midicable B".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_min_enumeration_spacing_ms() -> u64 {
    500
}

fn default_enumeration_timeout_ms() -> u64 {
    3000
}

fn default_barrier_attempts() -> u32 {
    20
}

fn default_barrier_interval_ms() -> u64 {
    250
}

fn default_barrier_timeout_ms() -> u64 {
    5000
}

fn default_worker_startup_timeout_ms() -> u64 {
    3000
}

fn default_termination_grace_ms() -> u64 {
    200
}

fn default_ingress_queue_capacity() -> usize {
    1024
}

fn default_pipe_queue_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            virtual_ports: default_virtual_ports(),
            default_wiring: true,
            poll_interval_ms: default_poll_interval_ms(),
            min_enumeration_spacing_ms: default_min_enumeration_spacing_ms(),
            enumeration_timeout_ms: default_enumeration_timeout_ms(),
            barrier_attempts: default_barrier_attempts(),
            barrier_interval_ms: default_barrier_interval_ms(),
            barrier_timeout_ms: default_barrier_timeout_ms(),
            worker_startup_timeout_ms: default_worker_startup_timeout_ms(),
            termination_grace_ms: default_termination_grace_ms(),
            ingress_queue_capacity: default_ingress_queue_capacity(),
            pipe_queue_capacity: default_pipe_queue_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (i, name) in self.virtual_ports.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Error::Config("Virtual port names must not be empty".to_string()));
            }
            if self.virtual_ports[..i].contains(name) {
                return Err(Error::Config(format!(
                    "Virtual port '{}' is listed twice",
                    name
                )));
            }
        }
        if self.ingress_queue_capacity == 0 || self.pipe_queue_capacity == 0 {
            return Err(Error::Config("Queue capacities must be at least 1".to_string()));
        }
        if self.barrier_attempts == 0 {
            return Err(Error::Config("barrierAttempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_enumeration_spacing(&self) -> Duration {
        Duration::from_millis(self.min_enumeration_spacing_ms)
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_millis(self.enumeration_timeout_ms)
    }

    pub fn worker_startup_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_startup_timeout_ms)
    }

    pub fn pair_settings(&self) -> PairSettings {
        PairSettings {
            ingress_capacity: self.ingress_queue_capacity,
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            termination_grace: Duration::from_millis(self.termination_grace_ms),
            pipe_queue_capacity: self.pipe_queue_capacity,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.poll_interval(),
            barrier_attempts: self.barrier_attempts,
            barrier_interval: Duration::from_millis(self.barrier_interval_ms),
            barrier_timeout: Duration::from_millis(self.barrier_timeout_ms),
        }
    }
}

/// Configuration store for managing app settings.
///
/// Handles reading and writing configuration to `~/.midicable/config.json`.
pub struct ConfigStore {
    /// Path to the configuration file.
    config_path: PathBuf,
}

impl ConfigStore {
    /// Create a new config store with the default path.
    ///
    /// Default path: `~/.midicable/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        let config_path = home.join(".midicable").join("config.json");

        Ok(Self { config_path })
    }

    /// Create a config store with a custom path (for testing).
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_path.parent().map(|p| p.to_path_buf())
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist.
    pub async fn load(&self) -> Result<Config> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub async fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;

        if let Some(config_dir) = self.config_dir() {
            fs::create_dir_all(&config_dir)
                .await
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        // Write atomically by writing to temp file then renaming
        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }

    // =========================================================================
    // Virtual Ports
    // =========================================================================

    /// Add a virtual pair name.
    pub async fn add_virtual_port(&self, name: &str) -> Result<()> {
        let mut config = self.load().await?;
        if config.virtual_ports.iter().any(|n| n == name) {
            return Err(Error::Config(format!(
                "Virtual port '{}' already exists",
                name
            )));
        }
        config.virtual_ports.push(name.to_string());
        self.save(&config).await
    }

    /// Remove a virtual pair name.
    pub async fn remove_virtual_port(&self, name: &str) -> Result<()> {
        let mut config = self.load().await?;
        let before = config.virtual_ports.len();
        config.virtual_ports.retain(|n| n != name);
        if config.virtual_ports.len() == before {
            return Err(Error::Config(format!("No virtual port named '{}'", name)));
        }
        self.save(&config).await
    }

    /// Set the log level.
    pub async fn set_log_level(&self, level: &str) -> Result<()> {
        let mut config = self.load().await?;
        config.log_level = level.to_string();
        self.save(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_store() -> (ConfigStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        (ConfigStore::with_path(path), dir)
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _dir) = test_store().await;
        let config = store.load().await.unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.virtual_ports.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let (store, _dir) = test_store().await;
        fs::create_dir_all(store.config_dir().unwrap()).await.unwrap();
        fs::write(store.path(), r#"{"virtualPorts": ["Loop"], "pollIntervalMs": 250}"#)
            .await
            .unwrap();

        let config = store.load().await.unwrap();
        assert_eq!(config.virtual_ports, vec!["Loop"]);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.barrier_attempts, 20);
        assert!(config.default_wiring);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _dir) = test_store().await;

        let config = Config {
            virtual_ports: vec!["Keys Thru".to_string()],
            default_wiring: false,
            termination_grace_ms: 50,
            ..Config::default()
        };
        store.save(&config).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.manager_settings().termination_grace,
            Duration::from_millis(50)
        );

        let raw = fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains("\"defaultWiring\": false"));
    }

    #[tokio::test]
    async fn test_virtual_ports() {
        let (store, _dir) = test_store().await;

        store.add_virtual_port("Loop").await.unwrap();
        assert!(store.add_virtual_port("Loop").await.is_err());
        assert!(store
            .load()
            .await
            .unwrap()
            .virtual_ports
            .contains(&"Loop".to_string()));

        store.remove_virtual_port("Loop").await.unwrap();
        assert!(store.remove_virtual_port("Loop").await.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.virtual_ports = vec!["A".to_string(), "A".to_string()];
        assert!(config.validate().is_err());

        config.virtual_ports = vec![" ".to_string()];
        assert!(config.validate().is_err());

        config = Config {
            ingress_queue_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
