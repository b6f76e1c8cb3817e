use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
use commands::run::{handle_run, RunArgs};
use commands::show::{handle_show, ShowArgs};

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch analytics over JSON user-activity events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate, normalize and aggregate an event file into Parquet artifacts
    Run(RunArgs),
    /// Print the Parquet artifacts written by a previous run
    Show(ShowArgs),
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Show(args) => handle_show(args),
    }
}
