pub mod run;
pub mod show;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use eventlens_core::PipelineConfig;
use tracing::debug;

const DEFAULT_CONFIG_FILE: &str = "eventlens.toml";

/// Defaults, then the TOML file (explicit or `./eventlens.toml` when present), then `EVENTLENS_*`.
pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match explicit {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if fallback.is_file() {
                PipelineConfig::from_file(&fallback)
                    .with_context(|| format!("failed to load config {}", fallback.display()))?
            } else {
                debug!("no config file found, using defaults");
                PipelineConfig::default()
            }
        }
    };

    config
        .apply_env()
        .context("invalid EVENTLENS_* environment override")?;
    Ok(config)
}
