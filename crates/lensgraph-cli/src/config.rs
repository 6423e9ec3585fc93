use anyhow::{Context, Result};
use lensgraph_core::PipelineConfig;
use std::path::Path;

/// Parse a TOML config file.
pub fn load(path: &Path) -> Result<PipelineConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse `path` when it exists, defaults otherwise.
pub fn load_or_default(path: &Path) -> Result<PipelineConfig> {
    if path.exists() {
        load(path)
    } else {
        tracing::info!("No config at {}, using defaults", path.display());
        Ok(PipelineConfig::default())
    }
}

/// The config a command runs with: file (or defaults) plus overrides.
pub fn effective(path: &Path, data_dir: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = load_or_default(path)?;
    if let Some(dir) = data_dir {
        config.data_dir = dir.to_path_buf();
    }
    Ok(config)
}

pub fn to_toml(config: &PipelineConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}
