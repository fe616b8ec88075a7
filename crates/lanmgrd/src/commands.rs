//! Subcommand implementations.
//!
//! Engine work is synchronous and pins OS threads to namespaces, so it runs
//! on the blocking pool.

use crate::cli::Command;
use crate::config::LanmgrdConfig;
use crate::manifest::{load_spec, render_spec};
use anyhow::Result;
use k8slan_types::validate_update;
use std::path::Path;
use tracing::{info, warn};

/// Runs one subcommand to completion.
pub async fn run(command: Command, config: LanmgrdConfig) -> Result<()> {
    match command {
        Command::Validate { spec, previous } => validate(&spec, previous.as_deref()).await,
        #[cfg(target_os = "linux")]
        Command::Ensure {
            spec,
            spoke,
            tap,
            mode,
            hostname,
        } => linux::ensure(&config, &spec, spoke, tap, mode, hostname).await,
        #[cfg(target_os = "linux")]
        Command::Remove { spec } => linux::remove(&config, &spec).await,
        #[cfg(target_os = "linux")]
        Command::Status { spec, hostname } => linux::status(&config, &spec, hostname).await,
        #[cfg(target_os = "linux")]
        Command::Exec { netns, command } => linux::exec(&config, netns, command).await,
        #[cfg(not(target_os = "linux"))]
        _ => {
            let _ = config;
            anyhow::bail!("this command needs Linux network namespaces")
        }
    }
}

async fn validate(spec_path: &Path, previous: Option<&Path>) -> Result<()> {
    let spec = load_spec(spec_path).await?;
    if let Some(previous) = previous {
        let old = load_spec(previous).await?;
        validate_update(&old, &spec)?;
    }
    let lan = spec.validate()?;
    for spoke in lan.untappable_spokes() {
        warn!(
            spoke = %spoke,
            "Spoke name leaves no room for a macvtap name; ensure will refuse it"
        );
    }
    info!(namespace = %lan.namespace, spokes = lan.spokes.len(), "LAN spec is valid");
    print!("{}", render_spec(&spec)?);
    Ok(())
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use anyhow::{anyhow, bail, Context};
    use k8slan_fabric::device::{tap_device_path, DEVICE_SUFFIX};
    use k8slan_fabric::tap::parse_mode;
    use k8slan_fabric::{FabricError, Kernel, LanFabric, SystemKernel, TapRequest};

    pub(super) async fn ensure(
        config: &LanmgrdConfig,
        spec: &Path,
        spoke: Option<String>,
        tap: Option<String>,
        mode: Option<String>,
        hostname: Option<String>,
    ) -> Result<()> {
        let spec = load_spec(spec).await?;
        let hostname = resolve_hostname(config, hostname)?;
        let fabric = open_fabric(config)?;

        let Some(spoke) = spoke else {
            let overlay = blocking(move || Ok(fabric.ensure_overlay(&spec, &hostname)?)).await?;
            println!(
                "overlay converged: bridge #{} vxlan #{} changed={}",
                overlay.bridge, overlay.vxlan, overlay.changed
            );
            return Ok(());
        };

        let mode = match mode {
            Some(mode) => parse_mode(&mode)?,
            None => config.macvtap_mode()?,
        };
        let tap = tap.unwrap_or_else(|| format!("{spoke}{DEVICE_SUFFIX}0"));
        let request = TapRequest::new(spoke, tap, mode);
        let name = request.tap.clone();

        let index = blocking(move || Ok(fabric.ensure(&spec, &hostname, &request)?)).await?;
        println!("{name} index {index} device {}", tap_device_path(index).display());
        Ok(())
    }

    pub(super) async fn remove(config: &LanmgrdConfig, spec: &Path) -> Result<()> {
        let spec = load_spec(spec).await?;
        let fabric = open_fabric(config)?;

        let report = blocking(move || Ok(fabric.remove(&spec)?)).await?;
        for name in &report.removed {
            println!("removed {name}");
        }
        for name in &report.absent {
            println!("absent  {name}");
        }
        for (name, error) in &report.failed {
            println!("failed  {name}: {error}");
        }
        if !report.is_clean() {
            bail!("teardown incomplete: {} link(s) not removed", report.failed.len());
        }
        Ok(())
    }

    pub(super) async fn status(
        config: &LanmgrdConfig,
        spec: &Path,
        hostname: Option<String>,
    ) -> Result<()> {
        let spec = load_spec(spec).await?;
        let hostname = resolve_hostname(config, hostname)?;
        let fabric = open_fabric(config)?;

        let state = blocking(move || Ok(fabric.observe(&spec, &hostname)?)).await?;
        println!("{state}");
        Ok(())
    }

    pub(super) async fn exec(
        config: &LanmgrdConfig,
        netns: String,
        command: Vec<String>,
    ) -> Result<()> {
        let run_dir = config.agent.netns_run_dir.clone();
        let status = blocking(move || {
            let (program, args) = command
                .split_first()
                .ok_or_else(|| anyhow!("no command given"))?;
            let kernel = SystemKernel::with_run_dir(run_dir)?;
            let ns = kernel
                .open_namespace(&netns)?
                .with_context(|| format!("network namespace {netns} does not exist"))?;

            info!(namespace = %netns, program = %program, "Running command in namespace");
            let status = kernel.run_in(&ns, |_| {
                std::process::Command::new(program)
                    .args(args)
                    .status()
                    .map_err(FabricError::from)
            })?;
            Ok(status)
        })
        .await?;

        if !status.success() {
            bail!("command exited with {status}");
        }
        Ok(())
    }

    fn open_fabric(config: &LanmgrdConfig) -> Result<LanFabric<SystemKernel>> {
        let kernel = SystemKernel::with_run_dir(config.agent.netns_run_dir.clone())?;
        Ok(LanFabric::new(kernel).with_settle_policy(config.settle_policy()))
    }

    /// Command line, then config, then the kernel hostname.
    fn resolve_hostname(config: &LanmgrdConfig, cli: Option<String>) -> Result<String> {
        if let Some(hostname) = cli.filter(|h| !h.is_empty()) {
            return Ok(hostname);
        }
        if !config.agent.hostname.is_empty() {
            return Ok(config.agent.hostname.clone());
        }
        nix::unistd::gethostname()
            .context("failed to read hostname")?
            .into_string()
            .map_err(|_| anyhow!("hostname is not valid UTF-8"))
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .context("engine task panicked")?
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_hostname_precedence() {
            let mut config = LanmgrdConfig::default();
            config.agent.hostname = "from-config".to_string();

            assert_eq!(
                resolve_hostname(&config, Some("from-cli".to_string())).unwrap(),
                "from-cli"
            );
            assert_eq!(resolve_hostname(&config, None).unwrap(), "from-config");
            assert_eq!(
                resolve_hostname(&config, Some(String::new())).unwrap(),
                "from-config"
            );
        }

        #[tokio::test]
        async fn test_blocking_propagates_errors() {
            let err = blocking(|| -> Result<()> { bail!("boom") }).await.unwrap_err();
            assert_eq!(err.to_string(), "boom");
        }
    }
}
