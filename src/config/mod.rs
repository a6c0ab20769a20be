//! # Configuration Management Module
//!
//! TOML configuration for the board hub daemon. Every section and field has a
//! default, so a partial file (or none at all, via [`Config::default`]) works.
//!
//! ## Configuration Structure
//!
//! - [`EthernetConfig`] - TCP listener for network-attached boards
//! - [`SerialConfig`] - serial port scanning
//! - [`TimingConfig`] - heartbeat, disconnect and connect timeouts
//! - [`StorageConfig`] - data directory for the board store
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use boardhub::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Listening on {}", config.ethernet.listen_addr);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [ethernet]
//! enabled = true
//! listen_addr = "0.0.0.0:9000"
//! sampling_interval_ms = 1000
//!
//! [serial]
//! enabled = true
//! baud_rate = 57600
//! scan_interval_ms = 10000
//! sampling_interval_ms = 200
//! unsupported_retry_secs = 300
//!
//! [timing]
//! heartbeat_interval_ms = 10000
//! disconnect_timeout_ms = 10000
//! connect_timeout_ms = 10000
//! fan_toggle_ms = 2000
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::board::BoardTiming;
use crate::connection::serial::SerialScanConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ethernet: EthernetConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthernetConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub sampling_interval_ms: u64,
}

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:9000".to_string(),
            sampling_interval_ms: 1000,
        }
    }
}

impl EthernetConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,
    pub baud_rate: u32,
    pub scan_interval_ms: u64,
    /// Serial links tolerate tighter polling than sockets.
    pub sampling_interval_ms: u64,
    /// Seconds before a port that never identified is tried again.
    /// Absent or 0 keeps it aside until restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsupported_retry_secs: Option<u64>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            baud_rate: 57600,
            scan_interval_ms: 10_000,
            sampling_interval_ms: 200,
            unsupported_retry_secs: Some(300),
        }
    }
}

impl SerialConfig {
    pub fn unsupported_retry(&self) -> Option<Duration> {
        self.unsupported_retry_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn scan_config(&self) -> SerialScanConfig {
        SerialScanConfig {
            scan_interval: Duration::from_millis(self.scan_interval_ms.max(1)),
            baud_rate: self.baud_rate,
            sampling_interval: Duration::from_millis(self.sampling_interval_ms),
            unsupported_retry: self.unsupported_retry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// MajorTom fan on/off half period.
    pub fan_toggle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            disconnect_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            fan_toggle_ms: 2_000,
        }
    }
}

impl TimingConfig {
    pub fn board_timing(&self) -> BoardTiming {
        BoardTiming {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
            fan_toggle: Duration::from_millis(self.fan_toggle_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl StorageConfig {
    /// Location of the sled board store.
    pub fn boards_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("boards")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.timing.heartbeat_interval_ms == 0 || self.timing.disconnect_timeout_ms == 0 {
            return Err(anyhow!("timing: heartbeat and disconnect timeout must be non-zero"));
        }
        if self.timing.connect_timeout_ms == 0 {
            return Err(anyhow!("timing: connect_timeout_ms must be non-zero"));
        }
        if self.timing.fan_toggle_ms == 0 {
            return Err(anyhow!("timing: fan_toggle_ms must be non-zero"));
        }
        if self.serial.enabled && self.serial.baud_rate == 0 {
            return Err(anyhow!("serial: baud_rate must be non-zero"));
        }
        if self.ethernet.enabled && self.ethernet.listen_addr.trim().is_empty() {
            return Err(anyhow!("ethernet: listen_addr must be set"));
        }
        Ok(())
    }
}
