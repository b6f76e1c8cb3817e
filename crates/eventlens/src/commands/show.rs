use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use eventlens_core::outputs::read_parquet;

use super::load_config;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// TOML config file; defaults to ./eventlens.toml when it exists
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory holding the artifacts of a previous run
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Number of cleaned-event rows to print
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

pub fn handle_show(args: ShowArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    let paths = config.artifact_paths();

    let cleaned = read_parquet(&paths.cleaned_events)
        .with_context(|| format!("run the pipeline first? {}", paths.cleaned_events.display()))?;
    println!("\nCleaned events:");
    println!("{}", cleaned.head(Some(args.rows)));

    let sections = [
        ("Daily event counts", &paths.daily_event_counts),
        ("Total active users", &paths.total_active_users),
        ("Most active user", &paths.most_active_user),
    ];
    for (title, path) in sections {
        let df = read_parquet(path)?;
        println!("\n{title}:");
        println!("{df}");
    }

    Ok(())
}
