//! File naming conventions under a run's save path.
//!
//! Names are part of the resume contract: the per-trial merge step and the
//! result store both recover trial indices from them.

use std::path::{Path, PathBuf};

/// Reference (trial 0) DE result.
pub fn original_path(save_path: &Path, name: &str) -> PathBuf {
    save_path.join(format!("{}_original.csv", name))
}

/// Tagged DE result of one bootstrap trial.
pub fn trial_path(save_path: &Path, name: &str, trial: u32) -> PathBuf {
    save_path.join(format!("{}_trial_{}.csv", name, trial))
}

/// Resampled design table for a per-trial run with a custom design.
pub fn trial_design_path(save_path: &Path, name: &str, trial: u32) -> PathBuf {
    save_path.join(format!("{}_design_trial_{}.csv", name, trial))
}

pub fn tmp_dir(save_path: &Path) -> PathBuf {
    save_path.join("tmp")
}

/// Scratch DE output of the bootstrap loop.
pub fn tmp_table_path(save_path: &Path, trial: u32) -> PathBuf {
    tmp_dir(save_path).join(format!("tab.tmp.trial{}.csv", trial))
}

/// Resampled design table of the bootstrap loop.
pub fn tmp_design_path(save_path: &Path, trial: u32) -> PathBuf {
    tmp_dir(save_path).join(format!("design.trial{}.csv", trial))
}

pub fn stats_path(save_path: &Path, name: &str) -> PathBuf {
    save_path.join(format!("{}_stats.json", name))
}

/// Trial index of a `{name}_trial_{k}.csv` file name.
pub fn parse_trial_index(name: &str, file_name: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix(name)?
        .strip_prefix("_trial_")?
        .strip_suffix(".csv")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
