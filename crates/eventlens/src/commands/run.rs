use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Table;
use eventlens_core::{run_pipeline, DiagnosticsMode, PipelineSummary};
use tracing::info;

use super::load_config;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON file holding an array of events (overrides config and environment)
    pub input: Option<PathBuf>,
    /// TOML config file; defaults to ./eventlens.toml when it exists
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory receiving the Parquet artifacts and the diagnostics log
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Append to the diagnostics log instead of truncating it
    #[arg(long)]
    pub append_log: bool,
}

pub fn handle_run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(input) = args.input {
        config.input_path = input;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if args.append_log {
        config.diagnostics_mode = DiagnosticsMode::Append;
    }

    info!(input = %config.input_path.display(), "starting pipeline");
    let summary = run_pipeline(&config).with_context(|| {
        format!(
            "pipeline aborted; no outputs written for {}",
            config.input_path.display()
        )
    })?;

    println!("{}", summary_table(&summary));
    println!(
        "Analytics results saved in {}",
        config.output_dir.display()
    );
    Ok(())
}

fn summary_table(summary: &PipelineSummary) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Metric", "Value"]);

    let most_active = summary
        .most_active_user
        .as_ref()
        .map(|user| format!("{} ({} events)", user.user_id, user.event_count))
        .unwrap_or_else(|| "-".to_string());

    let rows = [
        ("Records read", summary.records_read.to_string()),
        ("Records rejected", summary.records_rejected.to_string()),
        ("Valid events", summary.valid_events.to_string()),
        ("Dropped (bad timestamp)", summary.dropped_timestamps.to_string()),
        ("Cleaned rows", summary.normalized_rows.to_string()),
        ("Daily count rows", summary.daily_count_rows.to_string()),
        ("Total active users", summary.total_active_users.to_string()),
        ("Most active user", most_active),
    ];
    for (metric, value) in rows {
        table.add_row(vec![metric.to_string(), value]);
    }
    table
}
