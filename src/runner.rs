//! Trial execution: resample, call the DE adapter, tag and persist.
//!
//! Two entry points share the same attempt loop. `run_trial` produces one
//! standalone `{name}_trial_{k}.csv` so many processes can work on disjoint
//! trial indices; `bootstrap` runs trials sequentially and feeds them straight
//! into the result store.

use crate::config::BootstrapConfig;
use crate::count_table::CountTable;
use crate::dea::{DeAdapter, DeRequest};
use crate::design::Design;
use crate::error::{BootstrapError, Result};
use crate::metadata::Metadata;
use crate::paths;
use crate::resample::{resample_trial, seed_for};
use crate::results::ResultTable;
use crate::store::{MergedLayout, ResultStore, StoreOutcome};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resampled design table that is removed again when dropped, whatever the
/// outcome of the DE call.
struct DesignArtifact {
    path: PathBuf,
}

impl DesignArtifact {
    fn write(table: &Metadata, samples: &[&str], path: PathBuf) -> Result<Self> {
        let artifact = DesignArtifact { path };
        table.write_subset(samples, &artifact.path)?;
        Ok(artifact)
    }
}

impl Drop for DesignArtifact {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Runs bootstrap trials of one count matrix.
pub struct TrialRunner<'a, A: DeAdapter> {
    adapter: &'a A,
    matrix: &'a CountTable,
    design: &'a Design,
    config: &'a BootstrapConfig,
    save_path: &'a Path,
    name: &'a str,
}

impl<'a, A: DeAdapter> TrialRunner<'a, A> {
    pub fn new(
        adapter: &'a A,
        matrix: &'a CountTable,
        design: &'a Design,
        config: &'a BootstrapConfig,
        save_path: &'a Path,
        name: &'a str,
    ) -> Result<Self> {
        config.validate()?;
        // Surface configuration errors before any DE call is made.
        design.layout(matrix)?;
        Ok(TrialRunner {
            adapter,
            matrix,
            design,
            config,
            save_path,
            name,
        })
    }

    /// Runs one trial into `{name}_trial_{k}.csv` (tagged) or, for trial 0,
    /// the untagged reference `{name}_original.csv`.
    pub fn run_trial(&self, trial: u32) -> Result<PathBuf> {
        fs::create_dir_all(self.save_path)?;
        let outfile = if trial == 0 {
            paths::original_path(self.save_path, self.name)
        } else {
            paths::trial_path(self.save_path, self.name, trial)
        };
        self.call_with_retries(trial, &outfile, |t| {
            paths::trial_design_path(self.save_path, self.name, t)
        })?;

        if trial > 0 {
            let tagged = ResultTable::from_csv(&outfile)?.tagged(trial);
            tagged.write_csv(&outfile)?;
        }
        info!("Trial {} written to {}", trial, outfile.display());
        Ok(outfile)
    }

    /// Runs one trial of the bootstrap loop and returns its untagged table.
    /// The scratch DE output is removed afterwards.
    pub fn run_bootstrap_trial(&self, trial: u32) -> Result<ResultTable> {
        fs::create_dir_all(paths::tmp_dir(self.save_path))?;
        let outfile = paths::tmp_table_path(self.save_path, trial);
        self.call_with_retries(trial, &outfile, |t| paths::tmp_design_path(self.save_path, t))?;
        let table = ResultTable::from_csv(&outfile)?;
        fs::remove_file(&outfile)?;
        Ok(table)
    }

    /// Resamples and calls the DE adapter until it succeeds or the attempt
    /// budget is spent. Returns the successful attempt number.
    fn call_with_retries<F>(&self, trial: u32, outfile: &Path, design_path: F) -> Result<u32>
    where
        F: Fn(u32) -> PathBuf,
    {
        // Trial 0 is not resampled, so another attempt would see the same input.
        let attempts = if trial == 0 { 1 } else { self.config.max_attempts };

        let mut attempt = 1;
        loop {
            let draw = resample_trial(self.matrix, self.design, trial, attempt)?;
            info!(
                "Running trial: {}, attempt: {}, seed: {}, samples: {:?}, path: {}",
                trial,
                attempt,
                seed_for(trial, attempt),
                draw.source_samples(self.matrix),
                self.save_path.display()
            );

            let artifact = match self.design {
                Design::Custom { table, .. } if trial > 0 => Some(DesignArtifact::write(
                    table,
                    &draw.source_samples(self.matrix),
                    design_path(trial),
                )?),
                _ => None,
            };
            let design_ref = match &artifact {
                Some(artifact) => artifact.path.display().to_string(),
                None => self.design.token(),
            };

            let request = DeRequest {
                method: self.config.method,
                design: &design_ref,
                lfc: self.config.lfc,
                overwrite: true,
            };
            match self.adapter.run_dea(&draw.matrix, outfile, &request) {
                Ok(()) => {
                    if attempt > 1 {
                        self.log_line(&format!(
                            "{} {} attempts: {}",
                            self.save_path.display(),
                            self.name,
                            attempt
                        ));
                    }
                    return Ok(attempt);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!("Trial {} attempt {} failed, resampling: {}", trial, attempt, e);
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    self.log_line(&format!(
                        "{} {} trial {} failed after attempts: {}",
                        self.save_path.display(),
                        self.name,
                        trial,
                        attempt
                    ));
                    return Err(BootstrapError::AttemptsExhausted {
                        trial,
                        attempts,
                        last: e,
                    });
                }
                Err(e) => {
                    return Err(BootstrapError::DeCallFailed {
                        trial,
                        attempt,
                        source: e,
                    })
                }
            }
        }
    }

    fn log_line(&self, line: &str) {
        let Some(logfile) = &self.config.logfile else {
            return;
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = written {
            warn!("Could not append to {}: {}", logfile.display(), e);
        }
    }
}

/// Extends the `{name}.boot.trials{n}.{method}.csv` accumulation to `trials`.
///
/// Returns `ReturnedEarly` without touching any file when enough trials are
/// already merged.
pub fn bootstrap<A: DeAdapter>(runner: &TrialRunner<'_, A>, trials: u32) -> Result<StoreOutcome> {
    let layout = MergedLayout::Bootstrap {
        method: runner.config.method,
    };
    let mut store = ResultStore::open(runner.save_path, layout, runner.name)?;
    if store.trials() < trials {
        store.initialize()?;
    }

    let outcome = store.extend_to(trials, |trial| runner.run_bootstrap_trial(trial))?;
    if let StoreOutcome::Completed { .. } = outcome {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        runner.log_line(&format!(
            "{} {} trials: {} {}",
            runner.save_path.display(),
            runner.name,
            trials,
            now
        ));
    }
    Ok(outcome)
}

/// Folds `{name}_trial_{k}.csv` files into `{name}_trials_merged_{n}.csv`,
/// in ascending trial order, until `trials` are merged. Each trial file is
/// deleted after it is merged when `clean_up` is set; files past the target
/// are left alone.
pub fn merge_trials(save_path: &Path, name: &str, trials: u32, clean_up: bool) -> Result<StoreOutcome> {
    let mut store = ResultStore::open(save_path, MergedLayout::Pipeline, name)?;
    if store.trials() >= trials {
        info!("Already have {} trials, returning", store.trials());
        return Ok(StoreOutcome::ReturnedEarly {
            existing: store.trials(),
        });
    }

    let mut trial_files: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(save_path)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if let Some(trial) = file_name
            .to_str()
            .and_then(|f| paths::parse_trial_index(name, f))
        {
            trial_files.push((trial, entry.path()));
        }
    }
    trial_files.sort_by_key(|(trial, _)| *trial);
    if trial_files.is_empty() {
        info!("No trials found in {}", save_path.display());
    }

    for (trial, path) in trial_files {
        if store.trials() >= trials {
            info!("Reached {} trials, leaving {} unmerged", trials, path.display());
            break;
        }
        if store.contains_trial(trial) {
            warn!("Trial {} is already merged, skipping {}", trial, path.display());
            continue;
        }
        let table = ResultTable::from_csv(&path)?;
        let table = match &table.trials {
            None => table.tagged(trial),
            Some(tags) if tags.iter().all(|&t| t == trial) => table,
            Some(_) => {
                return Err(BootstrapError::invalid_table(
                    &path,
                    format!("Trial column does not match trial {}", trial),
                ))
            }
        };
        info!("Merging trial {}", trial);
        store.append(table)?;
        if clean_up {
            fs::remove_file(&path)?;
        }
    }

    if store.trials() != trials {
        warn!(
            "Merged {} trials but {} were requested",
            store.trials(),
            trials
        );
    }
    Ok(StoreOutcome::Completed {
        path: store.path().to_path_buf(),
        trials: store.trials(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count_table::tests::create_test_count_table;
    use crate::dea::mock::MockAdapter;
    use crate::dea::DeaError;
    use std::fs;
    use tempfile::tempdir;

    fn config() -> BootstrapConfig {
        BootstrapConfig {
            max_attempts: 3,
            ..Default::default()
        }
    }

    fn custom_design(dir: &Path) -> Design {
        let path = dir.join("design.csv");
        fs::write(&path, ",Condition,Batch\nC1,ctrl,a\nC2,ctrl,b\nT1,treat,a\nT2,treat,b\n").unwrap();
        Design::custom(&path).unwrap()
    }

    #[test]
    fn test_trial_zero_writes_untagged_reference() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::default();
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run").unwrap();

        let path = runner.run_trial(0).unwrap();
        assert_eq!(path, dir.path().join("run_original.csv"));
        let table = ResultTable::from_csv(&path).unwrap();
        assert!(table.trials.is_none());
        assert_eq!(adapter.samples.borrow()[0], matrix.sample_names());
    }

    #[test]
    fn test_trial_output_is_tagged() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::default();
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Unpaired, &config, dir.path(), "run").unwrap();

        let path = runner.run_trial(4).unwrap();
        assert_eq!(path, dir.path().join("run_trial_4.csv"));
        let table = ResultTable::from_csv(&path).unwrap();
        assert_eq!(table.trials, Some(vec![4; 4]));
    }

    #[test]
    fn test_rerunning_a_trial_reproduces_it() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::default();
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run").unwrap();

        let first = fs::read_to_string(runner.run_trial(2).unwrap()).unwrap();
        let second = fs::read_to_string(runner.run_trial(2).unwrap()).unwrap();
        assert_eq!(first, second);
        let samples = adapter.samples.borrow();
        assert_eq!(samples[0], samples[1]);
    }

    #[test]
    fn test_custom_design_artifact_created_then_removed() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let design = custom_design(dir.path());
        let adapter = MockAdapter::default();
        let config = config();
        let runner = TrialRunner::new(&adapter, &matrix, &design, &config, dir.path(), "run").unwrap();

        runner.run_trial(1).unwrap();
        let artifact = dir.path().join("run_design_trial_1.csv");
        assert_eq!(
            adapter.designs.borrow()[0],
            (artifact.display().to_string(), true)
        );
        assert!(!artifact.exists());
    }

    #[test]
    fn test_artifact_removed_when_de_call_fails() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let design = custom_design(dir.path());
        let adapter = MockAdapter::failing(10);
        let config = config();
        let runner = TrialRunner::new(&adapter, &matrix, &design, &config, dir.path(), "run").unwrap();

        assert!(runner.run_trial(1).is_err());
        assert!(!dir.path().join("run_design_trial_1.csv").exists());
    }

    #[test]
    fn test_retries_with_new_resample_then_succeeds() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::failing(2);
        let logfile = dir.path().join("attempts.log");
        let config = BootstrapConfig {
            logfile: Some(logfile.clone()),
            ..config()
        };
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run").unwrap();

        runner.run_trial(1).unwrap();
        assert_eq!(adapter.calls.get(), 3);
        let log = fs::read_to_string(logfile).unwrap();
        assert!(log.trim_end().ends_with("run attempts: 3"));
    }

    #[test]
    fn test_exhausted_attempts_surface() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::failing(100);
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run").unwrap();

        let err = runner.run_trial(1).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::AttemptsExhausted {
                trial: 1,
                attempts: 3,
                last: DeaError::Failed { .. }
            }
        ));
        assert_eq!(adapter.calls.get(), 3);
        assert!(!dir.path().join("run_trial_1.csv").exists());
    }

    #[test]
    fn test_unbalanced_matrix_rejected_up_front() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table().select_columns(&[0, 1, 2]).unwrap();
        let adapter = MockAdapter::default();
        let config = config();
        assert!(matches!(
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run"),
            Err(BootstrapError::UnbalancedDesign { columns: 3 })
        ));
        assert_eq!(adapter.calls.get(), 0);
    }

    #[test]
    fn test_bootstrap_loop_and_early_return() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::default();
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run").unwrap();

        let outcome = bootstrap(&runner, 5).unwrap();
        let merged_path = dir.path().join("run.boot.trials5.edgerqlf.csv");
        assert_eq!(
            outcome,
            StoreOutcome::Completed {
                path: merged_path.clone(),
                trials: 5
            }
        );
        let merged = ResultTable::from_csv(&merged_path).unwrap();
        assert_eq!(merged.distinct_trials(), vec![1, 2, 3, 4, 5]);
        assert_eq!(fs::read_dir(paths::tmp_dir(dir.path())).unwrap().count(), 0);

        let calls = adapter.calls.get();
        assert_eq!(
            bootstrap(&runner, 5).unwrap(),
            StoreOutcome::ReturnedEarly { existing: 5 }
        );
        assert_eq!(adapter.calls.get(), calls);
    }

    #[test]
    fn test_bootstrap_custom_design_uses_tmp_artifacts() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let design = custom_design(dir.path());
        let adapter = MockAdapter::default();
        let config = config();
        let runner = TrialRunner::new(&adapter, &matrix, &design, &config, dir.path(), "run").unwrap();

        bootstrap(&runner, 2).unwrap();
        let designs = adapter.designs.borrow();
        assert_eq!(
            designs[1].0,
            paths::tmp_design_path(dir.path(), 2).display().to_string()
        );
        assert!(designs.iter().all(|(_, existed)| *existed));
        assert!(!paths::tmp_design_path(dir.path(), 2).exists());
    }

    #[test]
    fn test_merge_trials_accumulates_and_cleans_up() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::default();
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Unpaired, &config, dir.path(), "run").unwrap();
        for trial in [1, 2, 3, 10] {
            runner.run_trial(trial).unwrap();
        }

        let outcome = merge_trials(dir.path(), "run", 4, true).unwrap();
        let merged_path = dir.path().join("run_trials_merged_4.csv");
        assert_eq!(
            outcome,
            StoreOutcome::Completed {
                path: merged_path.clone(),
                trials: 4
            }
        );
        let merged = ResultTable::from_csv(&merged_path).unwrap();
        assert_eq!(merged.distinct_trials(), vec![1, 2, 3, 10]);
        assert!(!paths::trial_path(dir.path(), "run", 10).exists());

        assert_eq!(
            merge_trials(dir.path(), "run", 4, true).unwrap(),
            StoreOutcome::ReturnedEarly { existing: 4 }
        );
    }

    #[test]
    fn test_merge_trials_stops_at_target() {
        let dir = tempdir().unwrap();
        let matrix = create_test_count_table();
        let adapter = MockAdapter::default();
        let config = config();
        let runner =
            TrialRunner::new(&adapter, &matrix, &Design::Paired, &config, dir.path(), "run").unwrap();
        for trial in 0..=5 {
            runner.run_trial(trial).unwrap();
        }

        let outcome = merge_trials(dir.path(), "run", 3, true).unwrap();
        let merged_path = dir.path().join("run_trials_merged_3.csv");
        assert_eq!(
            outcome,
            StoreOutcome::Completed {
                path: merged_path.clone(),
                trials: 3
            }
        );
        let merged = ResultTable::from_csv(&merged_path).unwrap();
        assert_eq!(merged.distinct_trials(), vec![1, 2, 3]);
        assert!(paths::trial_path(dir.path(), "run", 4).exists());
        assert!(paths::trial_path(dir.path(), "run", 5).exists());
        assert!(!dir.path().join("run_trials_merged_5.csv").exists());

        let report = crate::report::process_results(dir.path(), "run", 3).unwrap();
        assert!(report.is_some());
    }
}
