//! # Configuration Management Module
//!
//! Typed configuration for the forwarder, loaded once at startup.
//!
//! ## Configuration Structure
//!
//! - [`RuleConfig`] - one forwarding rule (sender pattern and destinations)
//! - [`ModemConfig`] - serial port and SIM settings
//! - [`ForwardingConfig`] - pacing, timeouts and failure policy of the engine
//! - [`LoggingConfig`] - log level and log files
//!
//! Only `rules` is required; every other section falls back to its defaults,
//! so the minimal rule file from earlier deployments still loads:
//!
//! ```json
//! {
//!   "rules": [
//!     { "pattern": "*", "out_numbers": ["+41791234567"] },
//!     { "pattern": "+41797654321", "out_numbers": ["+41790000000", "+41790000001"] }
//!   ]
//! }
//! ```
//!
//! ## File Formats
//!
//! Files ending in `.json` are parsed as JSON, everything else as TOML:
//!
//! ```toml
//! [[rules]]
//! pattern = "*"
//! out_numbers = ["+41791234567"]
//!
//! [modem]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [forwarding]
//! poll_interval_ms = 2000
//! send_gap_ms = 2000
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smsfwd::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.json").await?;
//!     println!("{} rules, modem on {}", config.rules.len(), config.modem.port);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::validation::validate_destination;

/// Message storages accepted by `AT+CPMS`.
const STORAGES: &[&str] = &["SM", "ME", "MT", "SR"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Sender to match exactly; `""` or `"*"` matches every sender.
    #[serde(default)]
    pub pattern: String,
    /// Destinations, in forwarding order.
    #[serde(default)]
    pub out_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// SIM PIN, entered only when the SIM asks for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_pin: Option<String>,
    /// Message storage read and cleared by the forwarder (`SM` = SIM).
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Deadline for one `AT+CMGS` exchange; network submission can be slow.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_storage() -> String {
    "SM".to_string()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_send_timeout_ms() -> u64 {
    60_000
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            sim_pin: None,
            storage: default_storage(),
            command_timeout_ms: default_command_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Pause between poll cycles (ms).
    #[serde(default = "default_pacing_ms")]
    pub poll_interval_ms: u64,
    /// Pause after every individual send (ms). Protects device and carrier rate limits.
    #[serde(default = "default_pacing_ms")]
    pub send_gap_ms: u64,
    /// Upper bound for any single transport call (ms).
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
    /// Keep a message on the device when one of its forwards failed, so the
    /// next cycle retries it (destinations that succeeded get it again).
    #[serde(default)]
    pub retain_on_send_failure: bool,
    /// Stop after this many failed polls in a row (0 = keep trying forever).
    #[serde(default = "default_max_poll_failures")]
    pub max_consecutive_poll_failures: u32,
    /// Interval for the periodic stats log line (ms, 0 disables).
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_pacing_ms() -> u64 {
    2000
}

fn default_transport_timeout_ms() -> u64 {
    // above the modem's own send deadline so that one fires first
    90_000
}

fn default_max_poll_failures() -> u32 {
    10
}

fn default_stats_interval_ms() -> u64 {
    600_000
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_pacing_ms(),
            send_gap_ms: default_pacing_ms(),
            transport_timeout_ms: default_transport_timeout_ms(),
            retain_on_send_failure: false,
            max_consecutive_poll_failures: default_max_poll_failures(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Diagnostic log file (all log output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Transmission log: one timestamped line per arrival, forward and clear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_file: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            transmission_file: None,
        }
    }
}

fn is_json(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl Config {
    /// Load and validate configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config = Self::parse(path, &content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &str, content: &str) -> Result<Self> {
        if is_json(path) {
            serde_json::from_str(content)
                .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
        } else {
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
        }
    }

    /// Serialize in the format implied by `path`.
    pub fn to_file_string(&self, path: &str) -> Result<String> {
        if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| anyhow!("Failed to serialize config: {}", e))
        } else {
            toml::to_string_pretty(self).map_err(|e| anyhow!("Failed to serialize config: {}", e))
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let content = Config::default().to_file_string(path)?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Check destinations and modem settings; patterns are free-form.
    pub fn validate(&self) -> Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            for number in &rule.out_numbers {
                validate_destination(number)
                    .map_err(|e| anyhow!("Rule {} ({:?}): {}", i + 1, rule.pattern, e))?;
            }
        }
        if !STORAGES.contains(&self.modem.storage.as_str()) {
            return Err(anyhow!(
                "Invalid modem storage {:?} (expected one of {})",
                self.modem.storage,
                STORAGES.join(", ")
            ));
        }
        if self.modem.baud_rate == 0 {
            return Err(anyhow!("Invalid modem baud_rate 0"));
        }
        if self.forwarding.transport_timeout_ms == 0 {
            return Err(anyhow!("forwarding.transport_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rules: vec![RuleConfig {
                pattern: "*".to_string(),
                out_numbers: vec!["+41790000000".to_string()],
            }],
            modem: ModemConfig::default(),
            forwarding: ForwardingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
