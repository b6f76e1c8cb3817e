use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::analytics::compute_analytics;
use crate::config::PipelineConfig;
use crate::diagnostics::{RejectionLog, RejectionSink};
use crate::error::{PipelineError, Result};
use crate::extract::{load_events, validate_events, RawEvent};
use crate::normalize::normalize_events;
use crate::outputs::{write_artifacts, ArtifactPaths};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MostActiveUser {
    pub user_id: String,
    pub event_count: i64,
}

/// Counts gathered along one run, plus where its artifacts were written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub records_read: usize,
    pub records_rejected: usize,
    pub valid_events: usize,
    pub dropped_timestamps: usize,
    pub normalized_rows: usize,
    pub daily_count_rows: usize,
    pub total_active_users: i64,
    pub most_active_user: Option<MostActiveUser>,
    pub artifacts: ArtifactPaths,
}

/// Runs extract → validate → normalize → aggregate and writes every artifact.
///
/// Rejections go to the diagnostics log named by `config`. The input is read before the
/// output directory is touched, so a fatal input error leaves no files behind.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineSummary> {
    let records = load_events(&config.input_path)?;
    let paths = config.artifact_paths();
    prepare_output_dir(&config.output_dir)?;

    let mut log = RejectionLog::open(&paths.diagnostics, config.diagnostics_mode).map_err(
        |source| PipelineError::Io {
            path: paths.diagnostics.clone(),
            source,
        },
    )?;
    process(records, &mut log, paths)
}

/// Same as [`run_pipeline`] but reports rejections to `sink` instead of the log file.
pub fn run_pipeline_with_sink(
    config: &PipelineConfig,
    sink: &mut dyn RejectionSink,
) -> Result<PipelineSummary> {
    let records = load_events(&config.input_path)?;
    prepare_output_dir(&config.output_dir)?;
    process(records, sink, config.artifact_paths())
}

fn process(
    records: Vec<RawEvent>,
    sink: &mut dyn RejectionSink,
    paths: ArtifactPaths,
) -> Result<PipelineSummary> {
    let records_read = records.len();
    info!(records = records_read, "reading and validating events");

    let valid = validate_events(records, sink);
    let valid_events = valid.len();
    if valid.is_empty() {
        info!("no valid events found; writing empty outputs");
    }

    info!(events = valid_events, "transforming events");
    let table = normalize_events(valid);
    let cleaned = table.to_dataframe()?;

    info!(rows = cleaned.height(), "running analytics");
    let analytics = compute_analytics(&cleaned)?;
    write_artifacts(&cleaned, &analytics, &paths)?;

    let most_active_user = analytics
        .top_user()?
        .map(|(user_id, event_count)| MostActiveUser {
            user_id,
            event_count,
        });

    let summary = PipelineSummary {
        records_read,
        records_rejected: records_read - valid_events,
        valid_events,
        dropped_timestamps: valid_events - table.len(),
        normalized_rows: table.len(),
        daily_count_rows: analytics.daily_event_counts.height(),
        total_active_users: analytics.active_user_count()?,
        most_active_user,
        artifacts: paths,
    };

    let (top_user, top_user_events) = match &summary.most_active_user {
        Some(user) => (Some(user.user_id.as_str()), Some(user.event_count)),
        None => (None, None),
    };
    info!(
        records_read = summary.records_read,
        records_rejected = summary.records_rejected,
        valid_events = summary.valid_events,
        dropped_timestamps = summary.dropped_timestamps,
        normalized_rows = summary.normalized_rows,
        daily_count_rows = summary.daily_count_rows,
        total_active_users = summary.total_active_users,
        most_active_user = top_user,
        most_active_user_events = top_user_events,
        cleaned_events = %summary.artifacts.cleaned_events.display(),
        daily_event_counts = %summary.artifacts.daily_event_counts.display(),
        total_active_users_path = %summary.artifacts.total_active_users.display(),
        most_active_user_path = %summary.artifacts.most_active_user.display(),
        diagnostics = %summary.artifacts.diagnostics.display(),
        "pipeline finished"
    );

    Ok(summary)
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
