//! Count matrix handling.
//!
//! A count table holds raw read counts with genes as rows and samples as
//! columns. The first CSV column is the gene identifier; every other column is
//! one sample. Columns are ordered by condition for the fixed designs (first
//! half control, second half treatment).

use crate::error::{BootstrapError, Result};
use flate2::read::MultiGzDecoder;
use ndarray::{Array2, Axis};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

/// Represents a count table.
#[derive(Debug, Clone)]
pub struct CountTable {
    /// The core count data matrix (genes x samples).
    pub counts: Array2<f64>,

    /// Header of the gene identifier column (often empty).
    pub index_name: String,

    /// Mapping from row index to gene identifier.
    pub feature_names: Vec<String>,

    /// Mapping from column index to sample name.
    pub sample_names: Vec<String>,
}

impl CountTable {
    /// Builds a table from a dense matrix, checking that names are unique and
    /// match the matrix shape.
    pub fn from_parts(
        index_name: impl Into<String>,
        feature_names: Vec<String>,
        sample_names: Vec<String>,
        counts: Array2<f64>,
    ) -> Result<Self> {
        let (n_features, n_samples) = counts.dim();
        if feature_names.len() != n_features || sample_names.len() != n_samples {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                format!(
                    "shape {}x{} does not match {} genes and {} samples",
                    n_features,
                    n_samples,
                    feature_names.len(),
                    sample_names.len()
                ),
            ));
        }
        ensure_unique(&feature_names, "gene")?;
        ensure_unique(&sample_names, "sample")?;
        Ok(CountTable {
            counts,
            index_name: index_name.into(),
            feature_names,
            sample_names,
        })
    }

    /// Loads a count matrix from CSV. Files ending in `.gz` are decompressed.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let source: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut rdr = csv::Reader::from_reader(BufReader::new(source));

        let headers = rdr.headers()?.clone();
        if headers.len() < 2 {
            return Err(BootstrapError::invalid_table(
                path,
                "count matrix needs a gene column and at least one sample column",
            ));
        }
        let index_name = headers[0].to_string();
        let sample_names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut feature_names = Vec::new();
        let mut values = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(BootstrapError::invalid_table(
                    path,
                    format!("row {} has {} fields, expected {}", line + 2, record.len(), headers.len()),
                ));
            }
            feature_names.push(record[0].to_string());
            for field in record.iter().skip(1) {
                let count: f64 = field.trim().parse().map_err(|_| {
                    BootstrapError::invalid_table(
                        path,
                        format!("non-numeric count '{}' for gene '{}'", field, &record[0]),
                    )
                })?;
                values.push(count);
            }
        }

        let counts = Array2::from_shape_vec((feature_names.len(), sample_names.len()), values)
            .map_err(|e| BootstrapError::invalid_table(path, e.to_string()))?;
        Self::from_parts(index_name, feature_names, sample_names, counts).map_err(|e| match e {
            BootstrapError::InvalidTable { reason, .. } => BootstrapError::invalid_table(path, reason),
            other => other,
        })
    }

    /// Writes the table back to CSV with the gene identifiers as first column.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        let mut header = vec![self.index_name.clone()];
        header.extend(self.sample_names.iter().cloned());
        writer.write_record(&header)?;

        for (name, row) in self.feature_names.iter().zip(self.counts.axis_iter(Axis(0))) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(name.clone());
            record.extend(row.iter().map(|c| c.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Builds a sub-matrix from column positions. Positions may repeat, so
    /// every selected column is renamed to `original_name + position` where
    /// position is its place in the new table.
    pub fn select_columns(&self, positions: &[usize]) -> Result<CountTable> {
        if let Some(&bad) = positions.iter().find(|&&p| p >= self.n_samples()) {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                format!("column {} out of range for {} samples", bad, self.n_samples()),
            ));
        }
        let counts = self.counts.select(Axis(1), positions);
        let sample_names = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| format!("{}{}", self.sample_names[p], i))
            .collect();
        Self::from_parts(
            self.index_name.clone(),
            self.feature_names.clone(),
            sample_names,
            counts,
        )
    }

    /// Returns the dimensions of the count table (genes, samples).
    pub fn dimensions(&self) -> (usize, usize) {
        self.counts.dim()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_names.len()
    }

    /// Returns the list of gene identifiers.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Returns the list of sample names.
    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }
}

fn ensure_unique(names: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(BootstrapError::invalid_table(
                "<memory>",
                format!("duplicate {} name '{}'", what, name),
            ));
        }
    }
    Ok(())
}
