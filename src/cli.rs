use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

use crate::config::BootstrapConfig;
use crate::count_table::CountTable;
use crate::dea::{DeMethod, RscriptAdapter};
use crate::design::Design;
use crate::metrics::{classify, predict_metrics};
use crate::paths;
use crate::report::{process_results, summarize_bootstrap};
use crate::results::ResultTable;
use crate::runner::{bootstrap, merge_trials, TrialRunner};
use crate::store::StoreOutcome;

#[derive(Parser)]
#[command(author, version, about = "Bootstrap resampling of RNA-Seq cohorts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by the commands that run DE trials. Unset flags fall back
/// to the `--config` file, then to the built-in defaults.
#[derive(Args, Debug)]
pub struct TrialOptions {
    /// DE method: edgerqlf, edgerlrt, edger or deseq2
    #[arg(long)]
    method: Option<DeMethod>,

    /// Formal log2 fold change threshold
    #[arg(long)]
    lfc: Option<f64>,

    /// Resamples tried per trial when the DE call fails
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Append attempt and completion lines to this file
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl TrialOptions {
    fn resolve(&self) -> Result<BootstrapConfig> {
        let mut config = match &self.config {
            Some(path) => BootstrapConfig::from_json(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => BootstrapConfig::default(),
        };
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(lfc) = self.lfc {
            config.lfc = lfc;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(logfile) = &self.logfile {
            config.logfile = Some(logfile.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one bootstrap trial into {name}_trial_{k}.csv (trial 0 writes {name}_original.csv)
    RunTrial {
        save_path: PathBuf,
        name: String,
        trial: u32,
        /// Count matrix CSV (genes x samples, optionally gzipped)
        count_matrix: PathBuf,
        /// paired, unpaired, or a path to a design table
        design: String,
        #[command(flatten)]
        options: TrialOptions,
    },

    /// Merge {name}_trial_{k}.csv files into {name}_trials_merged_{n}.csv
    MergeTrials {
        save_path: PathBuf,
        name: String,
        trials: u32,
        /// Keep the per-trial files after merging
        #[arg(long)]
        keep_trial_files: bool,
        /// JSON configuration file (its `clean_up` applies unless --keep-trial-files is given)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run trials sequentially into {name}.boot.trials{n}.{method}.csv and summarize them
    Bootstrap {
        count_matrix: PathBuf,
        save_path: PathBuf,
        name: String,
        trials: u32,
        /// paired, unpaired or custom
        #[arg(long)]
        design: Option<String>,
        /// Design table, required by the custom design
        #[arg(long)]
        meta: Option<PathBuf>,
        #[command(flatten)]
        options: TrialOptions,
    },

    /// Write {name}_stats.json from the merged trials and the original result
    ComputeResults {
        save_path: PathBuf,
        name: String,
        trials: u32,
    },

    /// Compare a DE result table against a ground-truth table
    Compare {
        truth: PathBuf,
        table: PathBuf,
        #[arg(long, default_value_t = 0.05)]
        fdr: f64,
    },

    /// Predict precision, recall and replicability from an observed spearman median
    Predict {
        spearman: f64,
        calibration_csv: PathBuf,
    },
}

fn load_matrix(path: &Path) -> Result<CountTable> {
    CountTable::from_csv(path).with_context(|| format!("Failed to read count matrix {}", path.display()))
}

fn resolve_design(token: &str, meta: Option<&Path>) -> Result<Design> {
    match (token, meta) {
        ("custom", Some(meta)) => Design::custom(meta)
            .with_context(|| format!("Failed to read design table {}", meta.display())),
        ("custom", None) => bail!("The custom design requires --meta"),
        (token, _) => Ok(Design::parse(token)?),
    }
}

/// Whether merged trial files are deleted: `--keep-trial-files` wins over the
/// config file's `clean_up`.
fn merge_clean_up(config: Option<&Path>, keep_trial_files: bool) -> Result<bool> {
    if keep_trial_files {
        return Ok(false);
    }
    let config = match config {
        Some(path) => BootstrapConfig::from_json(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BootstrapConfig::default(),
    };
    Ok(config.clean_up)
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::RunTrial {
            save_path,
            name,
            trial,
            count_matrix,
            design,
            options,
        } => {
            let mut config = options.resolve()?;
            config.design = design;
            let matrix = load_matrix(&count_matrix)?;
            let design = Design::parse(&config.design)?;
            let adapter = RscriptAdapter::new(config.rscript.clone());
            let runner = TrialRunner::new(&adapter, &matrix, &design, &config, &save_path, &name)?;
            let outfile = runner
                .run_trial(trial)
                .with_context(|| format!("Trial {} of {} failed", trial, name))?;
            println!("{}", outfile.display());
            Ok(())
        }
        Commands::MergeTrials {
            save_path,
            name,
            trials,
            keep_trial_files,
            config,
        } => {
            let clean_up = merge_clean_up(config.as_deref(), keep_trial_files)?;
            let outcome = merge_trials(&save_path, &name, trials, clean_up)
                .with_context(|| format!("Failed to merge trials of {}", name))?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Bootstrap {
            count_matrix,
            save_path,
            name,
            trials,
            design,
            meta,
            options,
        } => {
            let mut config = options.resolve()?;
            if let Some(design) = design {
                config.design = design;
            }
            let matrix = load_matrix(&count_matrix)?;
            let design = resolve_design(&config.design, meta.as_deref())?;
            let adapter = RscriptAdapter::new(config.rscript.clone());
            let runner = TrialRunner::new(&adapter, &matrix, &design, &config, &save_path, &name)?;

            if !paths::original_path(&save_path, &name).exists() {
                info!("Running the original (trial 0) analysis");
                runner.run_trial(0).context("Original analysis failed")?;
            }
            let outcome = bootstrap(&runner, trials)
                .with_context(|| format!("Bootstrap of {} failed", name))?;
            print_outcome(&outcome);

            match summarize_bootstrap(&save_path, &name, config.method)? {
                Some(report) => println!(
                    "Spearman median {:.3} written to {}",
                    report.summary.spearman_median,
                    report.path.display()
                ),
                None => println!("Spearman not computed"),
            }
            Ok(())
        }
        Commands::ComputeResults {
            save_path,
            name,
            trials,
        } => {
            match process_results(&save_path, &name, trials)
                .with_context(|| format!("Failed to compute results of {}", name))?
            {
                Some(report) => println!("{}", report.path.display()),
                None => println!("Spearman not computed"),
            }
            Ok(())
        }
        Commands::Compare { truth, table, fdr } => {
            let truth = ResultTable::from_csv(&truth)
                .with_context(|| format!("Failed to read truth table {}", truth.display()))?;
            let table = ResultTable::from_csv(&table)
                .with_context(|| format!("Failed to read result table {}", table.display()))?;
            let result = classify(&truth, &table, fdr)?;
            let fmt = |v: Option<f64>| v.map_or_else(|| "NA".to_string(), |v| format!("{:.2}", v));
            println!("MCC: {:>10}", fmt(result.mcc));
            println!("Precision: {}", fmt(result.precision));
            println!("Recall: {:>7}", fmt(result.recall));
            println!("===============");
            println!("TP: {:>11}", result.true_positives);
            println!("FP: {:>11}", result.false_positives);
            println!("TN: {:>11}", result.true_negatives);
            println!("FN: {:>11}", result.false_negatives);
            Ok(())
        }
        Commands::Predict {
            spearman,
            calibration_csv,
        } => {
            let predictions = predict_metrics(spearman, &calibration_csv)
                .with_context(|| format!("Failed to fit {}", calibration_csv.display()))?;
            println!("{}", serde_json::to_string_pretty(&predictions)?);
            Ok(())
        }
    }
}

fn print_outcome(outcome: &StoreOutcome) {
    match outcome {
        StoreOutcome::ReturnedEarly { existing } => {
            println!("Already have {} trials, returned early", existing)
        }
        StoreOutcome::Completed { path, trials } => {
            println!("{} trials in {}", trials, path.display())
        }
    }
}
