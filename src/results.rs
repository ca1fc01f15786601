//! DE result tables.
//!
//! A result table is what the DE adapter writes: one row per gene, indexed by
//! gene identifier, with numeric columns such as `logFC`, `logCPM`, `PValue`
//! and `FDR`. Tagged tables carry an extra integer `Trial` column; a merged
//! table is several tagged tables stacked on top of each other.

use crate::error::{BootstrapError, Result};
use itertools::Itertools;
use ndarray::{concatenate, Array2, ArrayView1, Axis};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub const TRIAL_COLUMN: &str = "Trial";
pub const LOGFC_COLUMN: &str = "logFC";
pub const FDR_COLUMN: &str = "FDR";

#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    /// Header of the gene identifier column.
    pub index_name: String,
    pub genes: Vec<String>,
    /// Numeric column names, excluding `Trial`.
    pub columns: Vec<String>,
    /// genes x columns; undefined values are NaN.
    pub values: Array2<f64>,
    /// Originating trial per row, present once the table is tagged.
    pub trials: Option<Vec<u32>>,
}

impl ResultTable {
    pub fn new(
        genes: Vec<String>,
        columns: Vec<String>,
        values: Array2<f64>,
        trials: Option<Vec<u32>>,
    ) -> Result<Self> {
        if values.dim() != (genes.len(), columns.len()) {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                format!(
                    "values are {:?} but there are {} genes and {} columns",
                    values.dim(),
                    genes.len(),
                    columns.len()
                ),
            ));
        }
        if trials.as_ref().is_some_and(|t| t.len() != genes.len()) {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                "trial column length differs from row count",
            ));
        }
        Ok(ResultTable {
            index_name: String::new(),
            genes,
            columns,
            values,
            trials,
        })
    }

    /// Reads a result table; a `Trial` column, if present, is parsed as the
    /// trial tag.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let headers = rdr.headers()?.clone();
        if headers.is_empty() {
            return Err(BootstrapError::invalid_table(path, "empty header"));
        }

        let trial_col = headers.iter().position(|h| h == TRIAL_COLUMN);
        let value_cols: Vec<usize> = (1..headers.len()).filter(|&i| Some(i) != trial_col).collect();
        let columns = value_cols.iter().map(|&i| headers[i].to_string()).collect();

        let mut genes = Vec::new();
        let mut values = Vec::new();
        let mut trials = trial_col.map(|_| Vec::new());
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(BootstrapError::invalid_table(
                    path,
                    format!("row {} has {} fields, expected {}", line + 2, record.len(), headers.len()),
                ));
            }
            genes.push(record[0].to_string());
            for &i in &value_cols {
                values.push(parse_value(&record[i]).ok_or_else(|| {
                    BootstrapError::invalid_table(
                        path,
                        format!("non-numeric value '{}' in column '{}'", &record[i], &headers[i]),
                    )
                })?);
            }
            if let (Some(col), Some(trials)) = (trial_col, trials.as_mut()) {
                let trial = record[col].trim().parse::<u32>().map_err(|_| {
                    BootstrapError::invalid_table(path, format!("bad trial id '{}'", &record[col]))
                })?;
                trials.push(trial);
            }
        }

        let values = Array2::from_shape_vec((genes.len(), value_cols.len()), values)
            .map_err(|e| BootstrapError::invalid_table(path, e.to_string()))?;
        let mut table = Self::new(genes, columns, values, trials)?;
        table.index_name = headers[0].to_string();
        Ok(table)
    }

    /// Writes the table with undefined values as `NA` and the trial tag last.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        let mut header = vec![self.index_name.clone()];
        header.extend(self.columns.iter().cloned());
        if self.trials.is_some() {
            header.push(TRIAL_COLUMN.to_string());
        }
        writer.write_record(&header)?;

        for (row, gene) in self.genes.iter().enumerate() {
            let mut record = Vec::with_capacity(header.len());
            record.push(gene.clone());
            record.extend(self.values.row(row).iter().map(|&v| format_value(v)));
            if let Some(trials) = &self.trials {
                record.push(trials[row].to_string());
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.genes.len()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values.column(i))
    }

    /// Like [`column`](Self::column) but an error names the missing column.
    pub fn require_column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        self.column(name).ok_or_else(|| {
            BootstrapError::invalid_table("<memory>", format!("missing '{}' column", name))
        })
    }

    /// Tags every row with `trial`, replacing any previous tag.
    pub fn tagged(mut self, trial: u32) -> Self {
        self.trials = Some(vec![trial; self.n_rows()]);
        self
    }

    /// Stacks `other` below `self`. Both must be tagged and share columns.
    pub fn append(&mut self, other: &ResultTable) -> Result<()> {
        if self.columns != other.columns {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                format!("column mismatch: {:?} vs {:?}", self.columns, other.columns),
            ));
        }
        let (Some(mine), Some(theirs)) = (self.trials.as_mut(), other.trials.as_ref()) else {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                "only trial-tagged tables can be merged",
            ));
        };
        mine.extend_from_slice(theirs);
        self.genes.extend(other.genes.iter().cloned());
        self.values = concatenate(Axis(0), &[self.values.view(), other.values.view()])
            .map_err(|e| BootstrapError::invalid_table("<memory>", e.to_string()))?;
        Ok(())
    }

    /// Distinct trial ids in ascending order.
    pub fn distinct_trials(&self) -> Vec<u32> {
        self.trials
            .as_deref()
            .unwrap_or_default()
            .iter()
            .copied()
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// `(gene, value)` pairs of `column` for the rows of `trial`, or all rows
    /// when `trial` is `None`.
    pub fn gene_values(&self, column: &str, trial: Option<u32>) -> Result<Vec<(&str, f64)>> {
        let values = self.require_column(column)?;
        Ok(self
            .genes
            .iter()
            .enumerate()
            .filter(|(row, _)| match (trial, &self.trials) {
                (None, _) => true,
                (Some(t), Some(trials)) => trials[*row] == t,
                (Some(_), None) => false,
            })
            .map(|(row, gene)| (gene.as_str(), values[row]))
            .collect())
    }
}

fn parse_value(field: &str) -> Option<f64> {
    match field.trim() {
        "" | "NA" | "nan" | "NaN" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        v.to_string()
    }
}
