use std::fs::File;
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::analytics::Analytics;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parquet operation on {} failed: {source}", path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
}

/// Where each artifact of a run lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub cleaned_events: PathBuf,
    pub daily_event_counts: PathBuf,
    pub total_active_users: PathBuf,
    pub most_active_user: PathBuf,
    pub diagnostics: PathBuf,
}

pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), OutputError> {
    let file = File::create(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut frame = df.clone();
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .with_statistics(StatisticsOptions::default())
        .finish(&mut frame)
        .map_err(|source| OutputError::Parquet {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), rows = df.height(), "wrote parquet artifact");
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<DataFrame, OutputError> {
    let file = File::open(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ParquetReader::new(file)
        .finish()
        .map_err(|source| OutputError::Parquet {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes the cleaned table and the three analytics tables, one file each.
pub fn write_artifacts(
    cleaned: &DataFrame,
    analytics: &Analytics,
    paths: &ArtifactPaths,
) -> Result<(), OutputError> {
    write_parquet(cleaned, &paths.cleaned_events)?;
    write_parquet(&analytics.daily_event_counts, &paths.daily_event_counts)?;
    write_parquet(&analytics.total_active_users, &paths.total_active_users)?;
    write_parquet(&analytics.most_active_user, &paths.most_active_user)?;
    Ok(())
}
