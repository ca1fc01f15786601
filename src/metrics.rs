//! Agreement with a ground-truth DE table and metric prediction from an
//! observed bootstrap Spearman median.

use crate::error::{BootstrapError, Result};
use crate::results::{ResultTable, FDR_COLUMN};
use indexmap::IndexMap;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Confusion counts of `FDR < fdr` calls against a truth table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub mcc: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
}

/// Classifies the genes common to both tables. A gene is a positive when its
/// FDR is below `fdr`; an undefined FDR is never a positive.
pub fn classify(truth: &ResultTable, table: &ResultTable, fdr: f64) -> Result<Classification> {
    let predicted: HashMap<&str, f64> = table.gene_values(FDR_COLUMN, None)?.into_iter().collect();

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (gene, truth_fdr) in truth.gene_values(FDR_COLUMN, None)? {
        let Some(&pred_fdr) = predicted.get(gene) else {
            continue;
        };
        match (truth_fdr < fdr, pred_fdr < fdr) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }

    let (tpf, fpf, tnf, fnf) = (tp as f64, fp as f64, tn as f64, fn_ as f64);
    let squared = (tpf + fpf) * (tpf + fnf) * (tnf + fpf) * (tnf + fnf);
    let mcc = (squared > 0.0).then(|| (tpf * tnf - fpf * fnf) / squared.sqrt());
    let precision = (tp + fp > 0).then(|| tpf / (tpf + fpf));
    let recall = (tp + fn_ > 0).then(|| tpf / (tpf + fnf));

    Ok(Classification {
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
        mcc,
        precision,
        recall,
    })
}

/// Cohort sizes with calibration columns.
pub const COHORT_SIZES: [u32; 2] = [5, 10];

/// Metric column prefix and display name.
pub const METRICS: [(&str, &str); 3] = [
    ("Prec", "Precision"),
    ("Rec", "Recall"),
    ("Rep", "Replicability"),
];

/// Calibration table rows, undefined cells as `None`.
struct Calibration {
    headers: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl Calibration {
    fn from_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|field| match field.trim() {
                    "" | "NA" | "nan" | "NaN" => None,
                    other => other.parse::<f64>().ok().filter(|v| !v.is_nan()),
                })
                .collect();
            rows.push(row);
        }
        Ok(Calibration { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Rows where both columns are defined.
    fn pairs(&self, x: usize, y: usize) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .filter_map(|row| Some((row.get(x).copied().flatten()?, row.get(y).copied().flatten()?)))
            .collect()
    }
}

/// Ordinary least squares `y = slope * x + intercept`.
fn fit_line(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}

/// Predicts precision, recall and replicability per cohort size from a
/// linear fit against the calibration table's cohort Spearman medians.
/// Predictions are clamped to `[0, 1]`.
pub fn predict_metrics(
    observed: f64,
    calibration_csv: &Path,
) -> Result<IndexMap<String, IndexMap<u32, f64>>> {
    let calibration = Calibration::from_csv(calibration_csv)?;
    let missing = |column: &str| BootstrapError::invalid_table(calibration_csv, format!("missing column {}", column));

    let mut predictions = IndexMap::new();
    for (prefix, pretty) in METRICS {
        let mut per_cohort = IndexMap::new();
        for n in COHORT_SIZES {
            let x_name = format!("Spear_Cohort_N{}_median", n);
            let y_name = format!("{}_N{}", prefix, n);
            let x = calibration.column(&x_name).ok_or_else(|| missing(&x_name))?;
            let y = calibration.column(&y_name).ok_or_else(|| missing(&y_name))?;

            let points = calibration.pairs(x, y);
            let (slope, intercept) = fit_line(&points).ok_or_else(|| {
                BootstrapError::invalid_table(
                    calibration_csv,
                    format!("cannot fit {} on {} from {} points", y_name, x_name, points.len()),
                )
            })?;
            debug!("{} ~ {:.4} * {} + {:.4}", y_name, slope, x_name, intercept);
            per_cohort.insert(n, (slope * observed + intercept).clamp(0.0, 1.0));
        }
        predictions.insert(pretty.to_string(), per_cohort);
    }
    info!("Predicted metrics for observed spearman {:.3}", observed);
    Ok(predictions)
}
