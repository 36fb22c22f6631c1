//! CLI interface for ohlc-pipeline
//!
//! Provides subcommands for:
//! - `run`: Ingest trades, aggregate candles, deliver them to the feature store
//! - `config`: Show the effective configuration

mod run;

pub use run::{run_pipeline, PipelineSummary, RunArgs};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ohlc-pipeline")]
#[command(about = "Trade ingestion and OHLC candle pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run(RunArgs),
    /// Show the effective configuration
    Config,
}
