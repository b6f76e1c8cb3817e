use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::diagnostics::DiagnosticsMode;
use crate::outputs::ArtifactPaths;

pub const ENV_INPUT_PATH: &str = "EVENTLENS_INPUT_PATH";
pub const ENV_OUTPUT_DIR: &str = "EVENTLENS_OUTPUT_DIR";
pub const ENV_DIAGNOSTICS_MODE: &str = "EVENTLENS_DIAGNOSTICS_MODE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown diagnostics mode '{0}' (expected 'overwrite' or 'append')")]
    InvalidMode(String),
}

/// Run settings. Every field has a default so an empty TOML file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub cleaned_file: String,
    pub daily_counts_file: String,
    pub active_users_file: String,
    pub most_active_file: String,
    pub diagnostics_file: String,
    pub diagnostics_mode: DiagnosticsMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("raw_data/raw_events.json"),
            output_dir: PathBuf::from("output"),
            cleaned_file: "cleaned_events.parquet".to_string(),
            daily_counts_file: "daily_event_counts.parquet".to_string(),
            active_users_file: "total_active_users.parquet".to_string(),
            most_active_file: "most_active_user.parquet".to_string(),
            diagnostics_file: "malformed_events.log".to_string(),
            diagnostics_mode: DiagnosticsMode::Overwrite,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    /// Applies `EVENTLENS_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides resolved by `lookup`, so callers can substitute the environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(input) = lookup(ENV_INPUT_PATH) {
            self.input_path = PathBuf::from(input);
        }
        if let Some(output) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(output);
        }
        if let Some(mode) = lookup(ENV_DIAGNOSTICS_MODE) {
            self.diagnostics_mode = parse_mode(&mode)?;
        }
        Ok(())
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            cleaned_events: self.output_dir.join(&self.cleaned_file),
            daily_event_counts: self.output_dir.join(&self.daily_counts_file),
            total_active_users: self.output_dir.join(&self.active_users_file),
            most_active_user: self.output_dir.join(&self.most_active_file),
            diagnostics: self.output_dir.join(&self.diagnostics_file),
        }
    }
}

fn parse_mode(raw: &str) -> Result<DiagnosticsMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "overwrite" => Ok(DiagnosticsMode::Overwrite),
        "append" => Ok(DiagnosticsMode::Append),
        other => Err(ConfigError::InvalidMode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
                output_dir = "/tmp/analytics"
                diagnostics_mode = "append"
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/analytics"));
        assert_eq!(config.diagnostics_mode, DiagnosticsMode::Append);
        assert_eq!(config.input_path, PathBuf::from("raw_data/raw_events.json"));
        assert_eq!(
            config.artifact_paths().daily_event_counts,
            PathBuf::from("/tmp/analytics/daily_event_counts.parquet")
        );
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_INPUT_PATH, "events.json"),
            (ENV_DIAGNOSTICS_MODE, "Append"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.input_path, PathBuf::from("events.json"));
        assert_eq!(config.diagnostics_mode, DiagnosticsMode::Append);
        assert_eq!(config.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_DIAGNOSTICS_MODE).then(|| "rotate".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMode(mode) if mode == "rotate"));
    }
}
