//! Accumulation of per-trial results into one merged table.
//!
//! The merged table's file name embeds the number of trials it holds, so a
//! resumed run learns its progress from a directory scan alone. Every append
//! writes the whole accumulation under the next file name and then removes
//! the previous file (O(trials²) I/O overall). A small JSON state record next
//! to the data names the authoritative file, which resolves the window where
//! both the old and new files exist.

use crate::dea::DeMethod;
use crate::error::{BootstrapError, Result};
use crate::results::ResultTable;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// File naming scheme of the merged table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergedLayout {
    /// `{name}.boot.trials{n}.{method}.csv`, used by the single-process loop.
    Bootstrap { method: DeMethod },
    /// `{name}_trials_merged_{n}.csv`, used when merging per-trial files.
    Pipeline,
}

impl MergedLayout {
    pub fn file_name(&self, name: &str, trials: u32) -> String {
        match self {
            MergedLayout::Bootstrap { method } => {
                format!("{}.boot.trials{}.{}.csv", name, trials, method)
            }
            MergedLayout::Pipeline => format!("{}_trials_merged_{}.csv", name, trials),
        }
    }

    /// Trial count embedded in `file_name`, if it belongs to this layout.
    pub fn parse_trials(&self, name: &str, file_name: &str) -> Option<u32> {
        let digits = match self {
            MergedLayout::Bootstrap { method } => file_name
                .strip_prefix(name)?
                .strip_prefix(".boot.trials")?
                .strip_suffix(".csv")?
                .strip_suffix(method.as_str())?
                .strip_suffix('.')?,
            MergedLayout::Pipeline => file_name
                .strip_prefix(name)?
                .strip_prefix("_trials_merged_")?
                .strip_suffix(".csv")?,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn state_name(&self, name: &str) -> String {
        match self {
            MergedLayout::Bootstrap { method } => format!("{}.boot.{}.state.json", name, method),
            MergedLayout::Pipeline => format!("{}_trials_merged.state.json", name),
        }
    }
}

/// Persisted progress record, rewritten after every append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub file: String,
    pub trials: u32,
    pub rows: usize,
}

/// What `open_results` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedResults {
    pub table: Option<ResultTable>,
    pub path: PathBuf,
    pub trials: u32,
}

/// Outcome of extending the store to a target trial count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The store already held at least the requested trials; nothing ran.
    ReturnedEarly { existing: u32 },
    Completed { path: PathBuf, trials: u32 },
}

/// Locates the merged table for `name` without modifying anything on disk.
///
/// When no merged file exists the returned path is the zero-trial file name.
pub fn open_results(save_path: &Path, layout: MergedLayout, name: &str) -> Result<OpenedResults> {
    let candidates = scan_candidates(save_path, layout, name)?;
    let found = match candidates.len() {
        0 => None,
        1 => candidates.into_iter().next(),
        _ => Some(resolve_with_state(save_path, layout, name, candidates)?),
    };

    let Some((path, trials)) = found else {
        info!("No bootstrap results file found: {}", save_path.display());
        return Ok(OpenedResults {
            table: None,
            path: save_path.join(layout.file_name(name, 0)),
            trials: 0,
        });
    };

    info!("Found {} existing trials in {}", trials, path.display());
    let table = if trials > 0 {
        let table = ResultTable::from_csv(&path)?;
        let distinct = table.distinct_trials().len();
        if distinct != trials as usize {
            warn!(
                "{} claims {} trials but holds {} distinct trial ids",
                path.display(),
                trials,
                distinct
            );
        }
        Some(table)
    } else {
        None
    };
    Ok(OpenedResults {
        table,
        path,
        trials,
    })
}

fn scan_candidates(save_path: &Path, layout: MergedLayout, name: &str) -> Result<Vec<(PathBuf, u32)>> {
    if !save_path.is_dir() {
        return Ok(Vec::new());
    }
    let mut candidates = Vec::new();
    for entry in fs::read_dir(save_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(trials) = layout.parse_trials(name, file_name) {
            candidates.push((entry.path(), trials));
        }
    }
    candidates.sort_by_key(|(_, trials)| *trials);
    Ok(candidates)
}

fn read_state(save_path: &Path, layout: MergedLayout, name: &str) -> Result<Option<StateRecord>> {
    let path = save_path.join(layout.state_name(name));
    if !path.is_file() {
        return Ok(None);
    }
    let record = serde_json::from_reader(File::open(path)?)?;
    Ok(Some(record))
}

fn resolve_with_state(
    save_path: &Path,
    layout: MergedLayout,
    name: &str,
    candidates: Vec<(PathBuf, u32)>,
) -> Result<(PathBuf, u32)> {
    let state = read_state(save_path, layout, name)?;
    let paths: Vec<PathBuf> = candidates.iter().map(|(p, _)| p.clone()).collect();
    let Some(state) = state else {
        return Err(BootstrapError::AmbiguousResults(paths));
    };
    match candidates
        .into_iter()
        .find(|(p, t)| *t == state.trials && p.file_name().is_some_and(|f| f == state.file.as_str()))
    {
        Some(found) => {
            warn!(
                "Several merged files match, using {} from the state record",
                found.0.display()
            );
            Ok(found)
        }
        None => Err(BootstrapError::AmbiguousResults(paths)),
    }
}

/// Single writer of the merged table for one run name.
#[derive(Debug)]
pub struct ResultStore {
    save_path: PathBuf,
    name: String,
    layout: MergedLayout,
    path: PathBuf,
    trials: u32,
    merged: Option<ResultTable>,
}

impl ResultStore {
    pub fn open(save_path: &Path, layout: MergedLayout, name: &str) -> Result<Self> {
        let opened = open_results(save_path, layout, name)?;
        Ok(ResultStore {
            save_path: save_path.to_path_buf(),
            name: name.to_string(),
            layout,
            path: opened.path,
            trials: opened.trials,
            merged: opened.table,
        })
    }

    /// Creates the empty zero-trial file when nothing is on disk yet.
    pub fn initialize(&self) -> Result<()> {
        if self.trials == 0 && !self.path.exists() {
            info!("Initializing results file {}", self.path.display());
            fs::create_dir_all(&self.save_path)?;
            File::create(&self.path)?;
        }
        Ok(())
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains_trial(&self, trial: u32) -> bool {
        self.merged
            .as_ref()
            .and_then(|m| m.trials.as_ref())
            .is_some_and(|t| t.contains(&trial))
    }

    /// Appends one trial-tagged table and persists the accumulation under
    /// the next file name. Returns the new path.
    pub fn append(&mut self, trial_result: ResultTable) -> Result<PathBuf> {
        if trial_result.trials.is_none() {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                "trial results must carry a Trial column before merging",
            ));
        }
        match self.merged.as_mut() {
            Some(merged) => merged.append(&trial_result)?,
            None => self.merged = Some(trial_result),
        }
        self.persist_next()
    }

    /// Writes the accumulation as the next trial count, records it, and
    /// removes the previous file.
    fn persist_next(&mut self) -> Result<PathBuf> {
        let Some(merged) = self.merged.as_ref() else {
            return Err(BootstrapError::invalid_table(&self.path, "nothing to persist"));
        };
        let next_trials = self.trials + 1;
        let file_name = self.layout.file_name(&self.name, next_trials);
        let next_path = self.save_path.join(&file_name);

        fs::create_dir_all(&self.save_path)?;
        let staging = self.save_path.join(format!("{}.tmp", file_name));
        merged.write_csv(&staging)?;
        fs::rename(&staging, &next_path)?;

        self.write_state(&StateRecord {
            file: file_name,
            trials: next_trials,
            rows: merged.n_rows(),
        })?;
        self.remove_stale(&next_path)?;

        info!("Merged trial results now hold {} trials", next_trials);
        self.path = next_path;
        self.trials = next_trials;
        Ok(self.path.clone())
    }

    /// Produces and appends trials `trials()+1 ..= target` in order.
    pub fn extend_to<F>(&mut self, target: u32, mut next_trial: F) -> Result<StoreOutcome>
    where
        F: FnMut(u32) -> Result<ResultTable>,
    {
        if self.trials >= target {
            info!("Already have {} trials, returning", self.trials);
            return Ok(StoreOutcome::ReturnedEarly {
                existing: self.trials,
            });
        }
        for trial in self.trials + 1..=target {
            let table = next_trial(trial)?;
            self.append(table.tagged(trial))?;
        }
        Ok(StoreOutcome::Completed {
            path: self.path.clone(),
            trials: self.trials,
        })
    }

    fn write_state(&self, record: &StateRecord) -> Result<()> {
        let path = self.save_path.join(self.layout.state_name(&self.name));
        let staging = path.with_extension("json.tmp");
        let writer = BufWriter::new(File::create(&staging)?);
        serde_json::to_writer_pretty(writer, record)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove_stale(&self, keep: &Path) -> Result<()> {
        for (path, _) in scan_candidates(&self.save_path, self.layout, &self.name)? {
            if path != keep {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
