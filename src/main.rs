//! Entry point for rnaseq-bootstrap.
//!
//! Estimates how reproducible a differential expression result is by
//! re-running the DE test on bootstrap resamples of the cohort and
//! correlating each trial's log fold changes with the full-cohort result.

mod cli;
mod config;
mod correlation;
mod count_table;
mod dea;
mod design;
mod error;
mod metadata;
mod metrics;
mod paths;
mod report;
mod resample;
mod results;
mod runner;
mod store;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};
use log::error;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run_cli(cli) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
