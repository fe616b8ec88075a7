//! Loading LAN specs from manifest files.
//!
//! A manifest is either a full `Lan` resource or a bare spec, in YAML or
//! JSON. Files ending in `.json` are parsed as JSON; anything else as YAML.

use anyhow::{Context, Result};
use k8slan_types::{LanResource, LanSpec};
use std::path::Path;

/// Reads and parses the spec in `path`.
pub async fn load_spec(path: &Path) -> Result<LanSpec> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_spec(path, &content)
}

fn parse_spec(path: &Path, content: &str) -> Result<LanSpec> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let value: serde_json::Value = if is_json {
        serde_json::from_str(content)
            .with_context(|| format!("failed to parse {} as JSON", path.display()))?
    } else {
        serde_yaml::from_str(content)
            .with_context(|| format!("failed to parse {} as YAML", path.display()))?
    };

    let spec = if value.get("spec").is_some() {
        serde_json::from_value::<LanResource>(value)?.spec
    } else {
        serde_json::from_value::<LanSpec>(value)?
    };
    Ok(spec)
}

/// Renders a spec with defaults applied, as YAML.
pub fn render_spec(spec: &LanSpec) -> Result<String> {
    Ok(serde_yaml::to_string(&spec.clone().with_defaults())?)
}
