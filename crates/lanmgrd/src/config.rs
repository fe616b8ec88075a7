//! Configuration file support for lanmgrd
//!
//! Loads and validates lanmgrd configuration from TOML files.
//! Default location: /etc/k8slan/lanmgrd.toml

use k8slan_fabric::SettlePolicy;
use k8slan_types::MacvtapMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/k8slan/lanmgrd.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Host-level agent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hostname used to pick per-host uplink overrides; empty means the kernel hostname
    #[serde(default)]
    pub hostname: String,

    /// Directory holding named network namespaces
    #[serde(default = "default_netns_run_dir")]
    pub netns_run_dir: PathBuf,

    /// Macvtap mode used when a request does not name one
    #[serde(default = "default_macvtap_mode")]
    pub macvtap_mode: String,
}

/// Bounds for waiting on the kernel to release link names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Total budget per wait
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

/// Complete lanmgrd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanmgrdConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub settle: SettleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_netns_run_dir() -> PathBuf {
    PathBuf::from("/var/run/netns")
}

fn default_macvtap_mode() -> String {
    MacvtapMode::default().to_string()
}

fn default_initial_interval() -> u64 {
    10
}

fn default_max_interval() -> u64 {
    200
}

fn default_max_elapsed() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            netns_run_dir: default_netns_run_dir(),
            macvtap_mode: default_macvtap_mode(),
        }
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LanmgrdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "lanmgrd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Settle bounds as an engine policy
    pub fn settle_policy(&self) -> SettlePolicy {
        SettlePolicy {
            initial_interval: Duration::from_millis(self.settle.initial_interval_ms),
            max_interval: Duration::from_millis(self.settle.max_interval_ms),
            max_elapsed: Duration::from_millis(self.settle.max_elapsed_ms),
        }
    }

    /// Configured default macvtap mode
    pub fn macvtap_mode(&self) -> ConfigResult<MacvtapMode> {
        self.agent
            .macvtap_mode
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("agent.macvtap_mode: {e}")))
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.macvtap_mode()?;

        if self.agent.netns_run_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "agent.netns_run_dir must not be empty".to_string(),
            ));
        }

        let settle = &self.settle;
        if settle.initial_interval_ms == 0 || settle.max_elapsed_ms == 0 {
            return Err(ConfigError::Invalid(
                "settle intervals must be > 0".to_string(),
            ));
        }
        if settle.initial_interval_ms > settle.max_interval_ms {
            return Err(ConfigError::Invalid(
                "settle.initial_interval_ms must not exceed max_interval_ms".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
