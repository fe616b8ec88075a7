//! Command line interface.

use crate::config::DEFAULT_CONFIG_PATH;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// k8slan LAN manager: converges overlay LANs on this host
#[derive(Parser, Debug)]
#[command(name = "lanmgrd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a LAN manifest and print it with defaults applied
    Validate {
        /// LAN manifest (YAML or JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Previously accepted manifest; the new one must not differ from it
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Converge a LAN's overlay, and optionally one spoke with its macvtap
    Ensure {
        #[arg(long)]
        spec: PathBuf,

        /// Spoke to build
        #[arg(long)]
        spoke: Option<String>,

        /// Macvtap name; defaults to the spoke's first device id
        #[arg(long, requires = "spoke")]
        tap: Option<String>,

        /// Macvtap mode (bridge, private, vepa, passthru)
        #[arg(long, requires = "spoke")]
        mode: Option<String>,

        /// Hostname used to select the uplink
        #[arg(long)]
        hostname: Option<String>,
    },

    /// Tear a LAN down on this host
    Remove {
        #[arg(long)]
        spec: PathBuf,
    },

    /// Show the observed state of a LAN on this host
    Status {
        #[arg(long)]
        spec: PathBuf,

        #[arg(long)]
        hostname: Option<String>,
    },

    /// Run a command inside a network namespace
    Exec {
        /// Namespace name
        #[arg(long)]
        netns: String,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ensure_with_spoke() {
        let cli = Cli::try_parse_from([
            "lanmgrd", "ensure", "--spec", "lan.yaml", "--spoke", "s1", "--mode", "bridge",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match cli.command {
            Command::Ensure {
                spec,
                spoke,
                tap,
                mode,
                hostname,
            } => {
                assert_eq!(spec, PathBuf::from("lan.yaml"));
                assert_eq!(spoke.as_deref(), Some("s1"));
                assert_eq!(tap, None);
                assert_eq!(mode.as_deref(), Some("bridge"));
                assert_eq!(hostname, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_tap_requires_spoke() {
        let err = Cli::try_parse_from(["lanmgrd", "ensure", "--spec", "lan.yaml", "--tap", "t0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "lanmgrd", "remove", "--spec", "lan.yaml", "--config", "/tmp/l.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/l.toml"));
    }

    #[test]
    fn test_exec_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "lanmgrd", "exec", "--netns", "lan1", "--", "ip", "-d", "link",
        ])
        .unwrap();
        match cli.command {
            Command::Exec { netns, command } => {
                assert_eq!(netns, "lan1");
                assert_eq!(command, vec!["ip", "-d", "link"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
