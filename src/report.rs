//! Spearman summary JSON for finished runs.

use crate::correlation::{compute_correlations, SpearmanSummary};
use crate::dea::DeMethod;
use crate::error::Result;
use crate::paths;
use crate::results::ResultTable;
use crate::store::{open_results, MergedLayout};
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// A summary that was written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub path: PathBuf,
    pub summary: SpearmanSummary,
}

/// Summarizes `{name}_trials_merged_{trials}.csv` against `{name}_original.csv`
/// into `{name}_stats.json`.
///
/// Returns `None`, writing nothing, when the correlations could not be
/// computed from the merged table or no trial had a defined correlation.
pub fn process_results(save_path: &Path, name: &str, trials: u32) -> Result<Option<Report>> {
    let merged_path = save_path.join(MergedLayout::Pipeline.file_name(name, trials));
    let merged = ResultTable::from_csv(&merged_path)?;
    let reference = ResultTable::from_csv(&paths::original_path(save_path, name))?;
    summarize(&reference, &merged, paths::stats_path(save_path, name))
}

/// Same as [`process_results`] for the single-process bootstrap layout,
/// writing `{name}.boot.stats.{method}.json`.
pub fn summarize_bootstrap(save_path: &Path, name: &str, method: DeMethod) -> Result<Option<Report>> {
    let opened = open_results(save_path, MergedLayout::Bootstrap { method }, name)?;
    let Some(merged) = opened.table else {
        warn!("No bootstrap trials under {}, nothing to summarize", save_path.display());
        return Ok(None);
    };
    let reference = ResultTable::from_csv(&paths::original_path(save_path, name))?;
    let outfile = save_path.join(format!("{}.boot.stats.{}.json", name, method));
    summarize(&reference, &merged, outfile)
}

fn summarize(reference: &ResultTable, merged: &ResultTable, outfile: PathBuf) -> Result<Option<Report>> {
    let Some(spearmans) = compute_correlations(reference, merged)? else {
        return Ok(None);
    };
    if spearmans.is_empty() {
        warn!("Every trial had an undefined spearman, nothing written");
        return Ok(None);
    }

    let summary = SpearmanSummary::from_values(spearmans);
    let writer = BufWriter::new(File::create(&outfile)?);
    serde_json::to_writer_pretty(writer, &summary)?;
    info!(
        "Spearman median {:.3} over {} trials written to {}",
        summary.spearman_median,
        summary.spearmans.len(),
        outfile.display()
    );
    Ok(Some(Report {
        path: outfile,
        summary,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::logfc_table;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::tempdir;

    fn write_reference(dir: &Path) {
        logfc_table(&["a", "b", "c", "d"], &[1.0, 2.0, 3.0, 4.0])
            .write_csv(&paths::original_path(dir, "x"))
            .unwrap();
    }

    #[test]
    fn test_process_results_writes_stats() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let genes: &[&str] = &["a", "b", "c", "d"];
        let mut merged = logfc_table(genes, &[1.0, 2.0, 3.0, 4.0]).tagged(1);
        merged
            .append(&logfc_table(genes, &[4.0, 3.0, 2.0, 1.0]).tagged(2))
            .unwrap();
        merged
            .write_csv(&dir.path().join("x_trials_merged_2.csv"))
            .unwrap();

        let report = process_results(dir.path(), "x", 2).unwrap().unwrap();
        assert_eq!(report.path, dir.path().join("x_stats.json"));
        assert_relative_eq!(report.summary.spearman_mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(report.summary.spearman_std, 1.0, epsilon = 1e-12);

        let written: SpearmanSummary =
            serde_json::from_str(&fs::read_to_string(&report.path).unwrap()).unwrap();
        assert_eq!(written.spearmans.len(), 2);
    }

    #[test]
    fn test_inconsistent_merge_writes_nothing() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let mut merged = logfc_table(&["a", "b", "c"], &[1.0, 2.0, 3.0]).tagged(1);
        merged
            .append(&logfc_table(&["a", "b"], &[1.0, 2.0]).tagged(2))
            .unwrap();
        merged
            .write_csv(&dir.path().join("x_trials_merged_2.csv"))
            .unwrap();

        assert_eq!(process_results(dir.path(), "x", 2).unwrap(), None);
        assert!(!paths::stats_path(dir.path(), "x").exists());
    }

    #[test]
    fn test_all_undefined_spearmans_write_nothing() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let genes: &[&str] = &["a", "b", "c", "d"];
        let mut merged = logfc_table(genes, &[0.5, 0.5, 0.5, 0.5]).tagged(1);
        merged
            .append(&logfc_table(genes, &[0.0, 0.0, 0.0, 0.0]).tagged(2))
            .unwrap();
        merged
            .write_csv(&dir.path().join("x_trials_merged_2.csv"))
            .unwrap();

        assert_eq!(process_results(dir.path(), "x", 2).unwrap(), None);
        assert!(!paths::stats_path(dir.path(), "x").exists());
    }

    #[test]
    fn test_summarize_bootstrap_layout() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let merged = logfc_table(&["a", "b", "c", "d"], &[2.0, 4.0, 6.0, 8.0]).tagged(1);
        merged
            .write_csv(&dir.path().join("x.boot.trials1.deseq2.csv"))
            .unwrap();

        let report = summarize_bootstrap(dir.path(), "x", DeMethod::Deseq2)
            .unwrap()
            .unwrap();
        assert_eq!(report.path, dir.path().join("x.boot.stats.deseq2.json"));
        assert_relative_eq!(report.summary.spearman_median, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_summarize_bootstrap_without_trials() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        assert_eq!(
            summarize_bootstrap(dir.path(), "x", DeMethod::EdgerQlf).unwrap(),
            None
        );
    }
}
