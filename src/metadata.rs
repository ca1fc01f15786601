//! Metadata handling module.
//!
//! A custom design is a CSV table mapping every sample of the count matrix to
//! a condition label, optionally with further covariate columns. The DE
//! adapter reads it from disk, so resampled subsets are written back out in
//! the same column layout.

use crate::error::{BootstrapError, Result};
use indexmap::IndexMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Sample IDs live in the first column; the DE driver reads it as row names.
const SAMPLE_COL: usize = 0;

/// Represents metadata for a collection of samples.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Header row as read, used when writing subsets back out.
    pub headers: Vec<String>,
    condition_col: usize,
    /// Maps sample IDs to their conditions, in file order
    pub condition_map: IndexMap<String, String>,
    /// Remaining columns per sample, keyed by header
    pub sample_attributes: IndexMap<String, IndexMap<String, String>>,
}

impl Metadata {
    /// Returns all conditions in order of first appearance.
    pub fn get_conditions(&self) -> Vec<String> {
        let mut conditions: Vec<String> = Vec::new();
        for condition in self.condition_map.values() {
            if !conditions.contains(condition) {
                conditions.push(condition.clone());
            }
        }
        conditions
    }

    pub fn condition_of(&self, sample_id: &str) -> Option<&str> {
        self.condition_map.get(sample_id).map(String::as_str)
    }

    /// Returns the number of samples in the metadata
    pub fn sample_count(&self) -> usize {
        self.condition_map.len()
    }

    /// Writes the rows for `samples` (original IDs, repeats allowed) to `path`.
    /// Row `i` is renamed to `sample + i`, matching the column names of the
    /// resampled count matrix.
    pub fn write_subset(&self, samples: &[&str], path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(&self.headers)?;

        for (i, sample) in samples.iter().enumerate() {
            let condition = self.condition_of(sample).ok_or_else(|| {
                BootstrapError::malformed_design(format!("sample '{}' not in design table", sample))
            })?;
            let attributes = self.sample_attributes.get(*sample);
            let record: Vec<String> = self
                .headers
                .iter()
                .enumerate()
                .map(|(col, header)| {
                    if col == SAMPLE_COL {
                        format!("{}{}", sample, i)
                    } else if col == self.condition_col {
                        condition.to_string()
                    } else {
                        attributes
                            .and_then(|a| a.get(header))
                            .cloned()
                            .unwrap_or_default()
                    }
                })
                .collect();
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Loads a design table from a CSV file.
///
/// Sample IDs are the first column (a `SampleID`/`Sample` header anywhere
/// else is rejected); the condition column must be called `Condition` or
/// `Group`.
pub fn load_metadata(path: &Path) -> Result<Metadata> {
    let mut rdr = csv::Reader::from_path(path)?;

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if let Some(pos) = headers.iter().position(|h| {
        h.trim().eq_ignore_ascii_case("sampleid") || h.trim().eq_ignore_ascii_case("sample")
    }) {
        if pos != SAMPLE_COL {
            return Err(BootstrapError::malformed_design(format!(
                "sample column '{}' must be the first column",
                headers[pos]
            )));
        }
    }
    let condition_col = headers
        .iter()
        .position(|h| {
            h.trim().eq_ignore_ascii_case("condition") || h.trim().eq_ignore_ascii_case("group")
        })
        .ok_or_else(|| BootstrapError::malformed_design("missing 'Condition'/'Group' column"))?;
    if condition_col == SAMPLE_COL {
        return Err(BootstrapError::malformed_design(
            "condition column cannot also be the sample column",
        ));
    }

    let mut condition_map = IndexMap::new();
    let mut sample_attributes = IndexMap::new();
    for result in rdr.records() {
        let record = result?;
        let sample_id = record.get(SAMPLE_COL).unwrap_or_default().trim().to_string();
        let condition = record.get(condition_col).unwrap_or_default().trim().to_string();

        if sample_id.is_empty() {
            log::warn!("Skipping design row with empty sample ID.");
            continue;
        }
        if condition.is_empty() {
            return Err(BootstrapError::malformed_design(format!(
                "sample '{}' has an empty condition",
                sample_id
            )));
        }
        if condition_map.insert(sample_id.clone(), condition).is_some() {
            return Err(BootstrapError::malformed_design(format!(
                "sample '{}' listed twice",
                sample_id
            )));
        }

        let attributes: IndexMap<String, String> = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != SAMPLE_COL && *i != condition_col)
            .map(|(i, field)| (headers.get(i).cloned().unwrap_or_default(), field.to_string()))
            .collect();
        sample_attributes.insert(sample_id, attributes);
    }

    if condition_map.is_empty() {
        return Err(BootstrapError::malformed_design(format!(
            "no sample entries found in design file '{}'",
            path.display()
        )));
    }

    Ok(Metadata {
        headers,
        condition_col,
        condition_map,
        sample_attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_metadata_basic() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("design.csv");
        fs::write(
            &file_path,
            ",Condition,Batch\nS1,Control,B1\nS2,Treatment,B1\nS3,Control,B2\n",
        )
        .unwrap();

        let metadata = load_metadata(&file_path).unwrap();

        assert_eq!(metadata.sample_count(), 3);
        assert_eq!(metadata.condition_of("S2"), Some("Treatment"));
        assert_eq!(
            metadata.sample_attributes["S3"].get("Batch"),
            Some(&"B2".to_string())
        );
        assert_eq!(metadata.get_conditions(), vec!["Control", "Treatment"]);
    }

    #[test]
    fn test_load_metadata_missing_condition() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("invalid.csv");
        fs::write(&file_path, "Sample,OtherField\nS1,Value1\n").unwrap();
        assert!(load_metadata(&file_path).is_err());

        let alt = dir.path().join("alt.csv");
        fs::write(&alt, "sample,group\nS1,Control\n").unwrap();
        assert!(load_metadata(&alt).is_ok());
    }

    #[test]
    fn test_write_subset_renames_rows() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("design.csv");
        fs::write(&file_path, "Sample,Batch,Condition\nS1,B1,A\nS2,B2,B\n").unwrap();
        let metadata = load_metadata(&file_path).unwrap();

        let out = dir.path().join("subset.csv");
        metadata.write_subset(&["S1", "S1", "S2"], &out).unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "Sample,Batch,Condition\nS10,B1,A\nS11,B1,A\nS22,B2,B\n"
        );
        assert!(metadata.write_subset(&["S9"], &out).is_err());
    }

    #[test]
    fn test_sample_column_must_come_first() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("design.csv");
        fs::write(&file_path, "Batch,SampleID,Condition
B1,S1,A
B2,S2,B
").unwrap();
        assert!(matches!(
            load_metadata(&file_path),
            Err(BootstrapError::MalformedDesign { .. })
        ));
    }
}
