use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eventlens_core::diagnostics::{DiagnosticsMode, Rejection};
use eventlens_core::extract::ExtractError;
use eventlens_core::outputs::read_parquet;
use eventlens_core::pipeline::{run_pipeline, run_pipeline_with_sink, MostActiveUser};
use eventlens_core::{PipelineConfig, PipelineError};
use polars::prelude::{DataType, TimeUnit, TimeZone};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn config_for(input: &Path, output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        input_path: input.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

#[test]
fn end_to_end_on_fixture() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config = config_for(&fixture_path("raw_events.json"), dir.path());

    let summary = run_pipeline(&config)?;

    assert_eq!(summary.records_read, 11);
    assert_eq!(summary.records_rejected, 4);
    assert_eq!(summary.valid_events, 7);
    assert_eq!(summary.dropped_timestamps, 1);
    assert_eq!(summary.normalized_rows, 6);
    assert_eq!(summary.daily_count_rows, 5);
    assert_eq!(summary.total_active_users, 3);
    assert_eq!(
        summary.most_active_user,
        Some(MostActiveUser {
            user_id: "u1".to_string(),
            event_count: 3,
        })
    );

    let cleaned = read_parquet(&summary.artifacts.cleaned_events)?;
    assert_eq!(cleaned.height(), 6);
    assert_eq!(
        cleaned.get_column_names_str(),
        vec![
            "user_id",
            "timestamp",
            "event_type",
            "metadata_amount",
            "metadata_currency",
            "metadata_geo_city",
            "metadata_screen",
        ]
    );

    assert_eq!(
        cleaned.column("timestamp")?.dtype(),
        &DataType::Datetime(TimeUnit::Microseconds, Some(TimeZone::UTC))
    );

    let daily = read_parquet(&summary.artifacts.daily_event_counts)?;
    let types: Vec<Option<&str>> = daily.column("event_type")?.str()?.into_iter().collect();
    assert_eq!(
        types,
        vec![
            Some("click"),
            Some("purchase"),
            Some("click"),
            Some("purchase"),
            Some("view"),
        ]
    );

    let active = read_parquet(&summary.artifacts.total_active_users)?;
    assert_eq!(active.column("total_active_users")?.i64()?.get(0), Some(3));

    let log = fs::read_to_string(&summary.artifacts.diagnostics)?;
    assert_eq!(log.lines().count(), 4);
    Ok(())
}

#[test]
fn empty_input_writes_empty_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config = config_for(&fixture_path("empty.json"), dir.path());

    let summary = run_pipeline(&config)?;

    assert_eq!(summary.normalized_rows, 0);
    assert_eq!(summary.total_active_users, 0);
    assert_eq!(summary.most_active_user, None);

    let cleaned = read_parquet(&summary.artifacts.cleaned_events)?;
    assert_eq!(cleaned.height(), 0);

    let daily = read_parquet(&summary.artifacts.daily_event_counts)?;
    assert_eq!(daily.height(), 0);
    assert_eq!(
        daily.get_column_names_str(),
        vec!["event_date", "event_type", "event_count"]
    );

    let active = read_parquet(&summary.artifacts.total_active_users)?;
    assert_eq!(active.column("total_active_users")?.i64()?.get(0), Some(0));

    let top = read_parquet(&summary.artifacts.most_active_user)?;
    assert_eq!(top.height(), 0);
    assert_eq!(top.get_column_names_str(), vec!["user_id", "event_count"]);
    Ok(())
}

#[test]
fn fatal_input_writes_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let output_dir = dir.path().join("output");
    let config = config_for(&fixture_path("malformed.json"), &output_dir);

    let result = run_pipeline(&config);

    assert!(matches!(
        result,
        Err(PipelineError::Extract(ExtractError::Json(_)))
    ));
    assert!(!output_dir.exists());
}

#[test]
fn reruns_are_byte_identical() -> Result<(), Box<dyn std::error::Error>> {
    let first_dir = TempDir::new()?;
    let second_dir = TempDir::new()?;
    let input = fixture_path("raw_events.json");

    let mut sink: Vec<Rejection> = Vec::new();
    let first = run_pipeline_with_sink(&config_for(&input, first_dir.path()), &mut sink)?;
    let second = run_pipeline_with_sink(&config_for(&input, second_dir.path()), &mut sink)?;

    assert_eq!(sink.len(), 8);
    for (a, b) in [
        (&first.artifacts.cleaned_events, &second.artifacts.cleaned_events),
        (&first.artifacts.daily_event_counts, &second.artifacts.daily_event_counts),
        (&first.artifacts.total_active_users, &second.artifacts.total_active_users),
        (&first.artifacts.most_active_user, &second.artifacts.most_active_user),
    ] {
        assert_eq!(fs::read(a)?, fs::read(b)?, "{} differs", a.display());
    }
    Ok(())
}

#[test]
fn append_mode_keeps_previous_diagnostics() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let mut config = config_for(&fixture_path("raw_events.json"), dir.path());

    run_pipeline(&config)?;
    config.diagnostics_mode = DiagnosticsMode::Append;
    let summary = run_pipeline(&config)?;
    assert_eq!(fs::read_to_string(&summary.artifacts.diagnostics)?.lines().count(), 8);

    config.diagnostics_mode = DiagnosticsMode::Overwrite;
    let summary = run_pipeline(&config)?;
    assert_eq!(fs::read_to_string(&summary.artifacts.diagnostics)?.lines().count(), 4);
    Ok(())
}

#[test]
fn nested_field_named_like_fixed_column_is_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let input = dir.path().join("events.json");
    fs::write(
        &input,
        r#"[
            {"user_id": "u1", "timestamp": "2025-03-01T10:00:00Z", "event_type": "click"},
            {"user_id": "u2", "timestamp": "2025-03-01T11:00:00Z", "event_type": "view", "user": {"id": "x"}}
        ]"#,
    )?;
    let config = config_for(&input, &dir.path().join("out"));

    let summary = run_pipeline(&config)?;

    assert_eq!(summary.normalized_rows, 2);
    assert_eq!(summary.total_active_users, 2);
    let cleaned = read_parquet(&summary.artifacts.cleaned_events)?;
    assert_eq!(
        cleaned.get_column_names_str(),
        vec!["user_id", "timestamp", "event_type"]
    );
    let users: Vec<Option<&str>> = cleaned.column("user_id")?.str()?.into_iter().collect();
    assert_eq!(users, vec![Some("u1"), Some("u2")]);
    Ok(())
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn finished_log_carries_whole_summary() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config = config_for(&fixture_path("raw_events.json"), dir.path());
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(move || writer.clone())
        .finish();

    let summary = tracing::subscriber::with_default(subscriber, || run_pipeline(&config))?;

    let output = String::from_utf8(logs.0.lock().unwrap().clone())?;
    let finished = output
        .lines()
        .find(|line| line.contains("pipeline finished"))
        .expect("summary line is logged");
    let event: serde_json::Value = serde_json::from_str(finished)?;
    let fields = &event["fields"];
    assert_eq!(fields["valid_events"], 7);
    assert_eq!(fields["daily_count_rows"], 5);
    assert_eq!(fields["total_active_users"], 3);
    assert_eq!(fields["most_active_user"], "u1");
    assert_eq!(fields["most_active_user_events"], 3);
    assert_eq!(
        fields["diagnostics"],
        summary.artifacts.diagnostics.display().to_string()
    );
    Ok(())
}
