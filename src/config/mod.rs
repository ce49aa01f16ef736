//! # Configuration Management Module
//!
//! This module handles all configuration aspects of the Scantrack system,
//! providing a centralized configuration surface with validation, defaults,
//! and persistence.
//!
//! ## Features
//!
//! - **Structured Configuration**: Type-safe configuration with serde serialization
//! - **Per-Port Validation**: Each scanner port section is validated individually;
//!   a malformed section is excluded rather than aborting the whole system
//! - **Defaults**: Sensible default values for all configuration options
//!
//! ## Configuration Structure
//!
//! The configuration is organized into logical sections:
//!
//! - [`StationConfig`] - General station settings (name, fatal-hold time)
//! - [`PortConfig`] - One section per scanner serial port
//! - [`StorageConfig`] - Record store settings
//! - [`LoggingConfig`] - Logging settings
//! - [`FallbackConfig`] - Fallback audit log settings
//!
//! ## Configuration File Format
//!
//! Scantrack uses TOML format:
//!
//! ```toml
//! [station]
//! name = "Line 3 stations"
//!
//! [[ports]]
//! device = "/dev/ttyACM0"
//! baud_rate = 9600
//! parity = "N"
//! default_worker = "000000"
//! default_process = "PX000"
//!
//! [storage]
//! data_dir = "./data"
//! ```
//!
//! ## Validation
//!
//! Port sections are checked for usable baud rate, data bits, parity, and stop
//! bits. Invalid sections are excluded one by one; the system only refuses to
//! start when **zero** usable ports remain.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// General station settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,
    /// Minimum seconds a fatal error overlay is held before the process exits,
    /// so the message is visible on the station panel.
    #[serde(default = "default_hold_fatal_secs")]
    pub hold_fatal_secs: u64,
}

fn default_hold_fatal_secs() -> u64 {
    30
}

/// Settings for one scanner serial port. One work station per port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Device path, e.g. `/dev/ttyACM0`
    pub device: String,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// One of "N", "E", "O" (none / even / odd)
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Read timeout in milliseconds; bounds how long a read blocks so the
    /// ingestion loop stays responsive to shutdown.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Worker assumed for this station until a worker code is scanned.
    #[serde(default)]
    pub default_worker: Option<String>,
    /// Process assumed for this station until a process code is scanned.
    #[serde(default)]
    pub default_process: Option<String>,
    /// Factory code substituted into indirect-work records when the scanned
    /// payload does not carry one.
    #[serde(default)]
    pub factory_code: Option<String>,
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_enable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Fallback audit log settings. Size-rotated with a bounded generation count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub dir: String,
    pub max_bytes: u64,
    pub max_generations: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            dir: "./qr_fallback".to_string(),
            max_bytes: 1024 * 1024,
            max_generations: 5,
        }
    }
}

impl PortConfig {
    /// Validate this port section. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.device.trim().is_empty() {
            return Err("device path is empty".to_string());
        }
        if self.baud_rate == 0 {
            return Err(format!("invalid baud_rate: {}", self.baud_rate));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(format!(
                "invalid data_bits: {} (valid: 5..=8)",
                self.data_bits
            ));
        }
        match self.parity.as_str() {
            "N" | "E" | "O" => {}
            other => {
                return Err(format!("invalid parity: {} (valid: N, E, O)", other));
            }
        }
        if self.stop_bits != 1 && self.stop_bits != 2 {
            return Err(format!(
                "invalid stop_bits: {} (valid: 1 or 2)",
                self.stop_bits
            ));
        }
        Ok(())
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

    /// Split the configured ports into usable sections and excluded ones.
    ///
    /// Disabled sections are skipped silently. Invalid sections are returned
    /// with the validation reason so the caller can log them. A duplicate
    /// device path keeps the first section and excludes the rest.
    pub fn usable_ports(&self) -> (Vec<PortConfig>, Vec<(String, String)>) {
        let mut valid: Vec<PortConfig> = Vec::new();
        let mut excluded: Vec<(String, String)> = Vec::new();

        for port in &self.ports {
            if !port.enable {
                continue;
            }
            if let Err(reason) = port.validate() {
                excluded.push((port.device.clone(), reason));
                continue;
            }
            if valid.iter().any(|p| p.device == port.device) {
                excluded.push((port.device.clone(), "duplicate device path".to_string()));
                continue;
            }
            valid.push(port.clone());
        }

        (valid, excluded)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station: StationConfig {
                name: "scantrack station".to_string(),
                hold_fatal_secs: 30,
            },
            ports: vec![PortConfig {
                device: "/dev/ttyACM0".to_string(),
                baud_rate: 9600,
                data_bits: 8,
                parity: "N".to_string(),
                stop_bits: 1,
                timeout_ms: 500,
                enable: true,
                default_worker: Some("000000".to_string()),
                default_process: Some("PX000".to_string()),
                factory_code: None,
            }],
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("scantrack.log".to_string()),
            },
            fallback: FallbackConfig::default(),
        }
    }
}
