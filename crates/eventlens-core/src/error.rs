use std::path::PathBuf;

use thiserror::Error;

use crate::analytics::AnalyticsError;
use crate::config::ConfigError;
use crate::extract::ExtractError;
use crate::outputs::OutputError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not read input events: {0}")]
    Extract(#[from] ExtractError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("analytics failed: {0}")]
    Analytics(#[from] AnalyticsError),

    #[error("failed to write outputs: {0}")]
    Output(#[from] OutputError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
