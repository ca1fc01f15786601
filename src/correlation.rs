//! Rank correlation of each trial's log fold changes against the reference.

use crate::error::Result;
use crate::results::{ResultTable, LOGFC_COLUMN};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use std::collections::HashMap;

/// Average ranks (1-based), ties share the mean of their positions.
pub fn rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let shared = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = shared;
        }
        start = end;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 || n != y.len() {
        return f64::NAN;
    }
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

/// Spearman correlation; NaN when fewer than two points or a constant input.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&rank(x), &rank(y))
}

/// Defined `(gene, logFC)` values keyed by gene.
fn defined_by_gene<'a>(pairs: Vec<(&'a str, f64)>) -> HashMap<&'a str, f64> {
    pairs.into_iter().filter(|(_, v)| !v.is_nan()).collect()
}

/// One Spearman value per trial, in ascending trial order, comparing the
/// trial's `logFC` with the reference's over their common defined genes.
///
/// Returns `None` when the merged table is inconsistent (row count not a
/// multiple of the trial count, or trials of different sizes). Trials whose
/// correlation is undefined are left out of the result.
pub fn compute_correlations(reference: &ResultTable, merged: &ResultTable) -> Result<Option<Vec<f64>>> {
    let trials = merged.distinct_trials();
    if trials.is_empty() {
        warn!("No trials in merged table, spearman not computed");
        return Ok(None);
    }
    if merged.n_rows() % trials.len() != 0 {
        warn!(
            "Unequal lengths ({} rows over {} trials), spearman not computed",
            merged.n_rows(),
            trials.len()
        );
        return Ok(None);
    }
    let per_trial = merged.n_rows() / trials.len();
    let tags = merged.trials.as_deref().unwrap_or_default();
    if let Some(&short) = trials
        .iter()
        .find(|&&t| tags.iter().filter(|&&tag| tag == t).count() != per_trial)
    {
        warn!(
            "Trial {} does not have {} rows, spearman not computed",
            short, per_trial
        );
        return Ok(None);
    }

    let reference = defined_by_gene(reference.gene_values(LOGFC_COLUMN, None)?);

    let mut spearmans = Vec::with_capacity(trials.len());
    for trial in trials {
        let boot = defined_by_gene(merged.gene_values(LOGFC_COLUMN, Some(trial))?);
        let mut common: Vec<&str> = boot
            .keys()
            .filter(|g| reference.contains_key(*g))
            .copied()
            .collect();
        common.sort_unstable();

        let x: Vec<f64> = common.iter().map(|g| reference[g]).collect();
        let y: Vec<f64> = common.iter().map(|g| boot[g]).collect();
        let rho = spearman(&x, &y);
        if rho.is_nan() {
            debug!("Trial {} has an undefined spearman over {} genes, dropped", trial, common.len());
            continue;
        }
        spearmans.push(rho);
    }
    Ok(Some(spearmans))
}

/// Distribution of per-trial Spearman values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpearmanSummary {
    pub spearman_median: f64,
    pub spearman_mean: f64,
    /// Population standard deviation.
    pub spearman_std: f64,
    pub spearmans: Vec<f64>,
}

impl SpearmanSummary {
    pub fn from_values(spearmans: Vec<f64>) -> Self {
        let median = Data::new(spearmans.clone()).median();
        SpearmanSummary {
            spearman_median: median,
            spearman_mean: spearmans.iter().mean(),
            spearman_std: spearmans.iter().population_std_dev(),
            spearmans,
        }
    }
}
