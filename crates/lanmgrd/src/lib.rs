//! lanmgrd - k8slan LAN manager
//!
//! Reads LAN manifests and drives the fabric engine on this host:
//! - Validates manifests and spec updates
//! - Converges a LAN's overlay, spokes and macvtaps
//! - Tears LANs down and reports their observed state

pub mod cli;
pub mod commands;
pub mod config;
pub mod manifest;

pub use cli::{Cli, Command};
pub use config::{ConfigError, LanmgrdConfig, LogFormat, LoggingConfig, DEFAULT_CONFIG_PATH};
