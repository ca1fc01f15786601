//! Experimental design descriptors.

use crate::count_table::CountTable;
use crate::error::{BootstrapError, Result};
use crate::metadata::{load_metadata, Metadata};
use std::path::{Path, PathBuf};

/// How samples relate across the two conditions.
#[derive(Debug, Clone)]
pub enum Design {
    /// Column `i` of the control block is matched with column `i` of the
    /// treatment block.
    Paired,
    /// Conditions are independent; first half control, second half treatment.
    Unpaired,
    /// Explicit sample to condition table.
    Custom { path: PathBuf, table: Metadata },
}

/// Column positions of the two condition groups in the count matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    pub control: Vec<usize>,
    pub treatment: Vec<usize>,
}

impl Design {
    /// Parses a design token: `paired`, `unpaired`, or a path to a design table.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "paired" => Ok(Design::Paired),
            "unpaired" => Ok(Design::Unpaired),
            other => {
                let path = Path::new(other);
                if path.is_file() {
                    Self::custom(path)
                } else {
                    Err(BootstrapError::UnknownDesign(other.to_string()))
                }
            }
        }
    }

    pub fn custom(path: &Path) -> Result<Self> {
        Ok(Design::Custom {
            path: path.to_path_buf(),
            table: load_metadata(path)?,
        })
    }

    /// Token handed to the DE adapter for the fixed schemes.
    pub fn token(&self) -> String {
        match self {
            Design::Paired => "paired".to_string(),
            Design::Unpaired => "unpaired".to_string(),
            Design::Custom { path, .. } => path.display().to_string(),
        }
    }

    /// Splits the matrix columns into the two condition groups, validating
    /// that the design fits the matrix.
    pub fn layout(&self, matrix: &CountTable) -> Result<GroupLayout> {
        let columns = matrix.n_samples();
        match self {
            Design::Paired | Design::Unpaired => {
                if columns == 0 || columns % 2 != 0 {
                    return Err(BootstrapError::UnbalancedDesign { columns });
                }
                let n = columns / 2;
                Ok(GroupLayout {
                    control: (0..n).collect(),
                    treatment: (n..columns).collect(),
                })
            }
            Design::Custom { table, .. } => custom_layout(table, matrix),
        }
    }
}

fn custom_layout(table: &Metadata, matrix: &CountTable) -> Result<GroupLayout> {
    let conditions = table.get_conditions();
    if conditions.len() != 2 {
        return Err(BootstrapError::malformed_design(format!(
            "expected exactly two condition labels, found {:?}",
            conditions
        )));
    }
    if table.sample_count() != matrix.n_samples() {
        return Err(BootstrapError::malformed_design(format!(
            "design lists {} samples but the count matrix has {}",
            table.sample_count(),
            matrix.n_samples()
        )));
    }

    let mut groups: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    let mut first_seen: Vec<&str> = Vec::with_capacity(2);
    for (pos, sample) in matrix.sample_names().iter().enumerate() {
        let condition = table.condition_of(sample).ok_or_else(|| {
            BootstrapError::malformed_design(format!("sample '{}' missing from design table", sample))
        })?;
        let group = match first_seen.iter().position(|c| *c == condition) {
            Some(g) => g,
            None => {
                first_seen.push(condition);
                first_seen.len() - 1
            }
        };
        groups[group].push(pos);
    }

    let [control, treatment] = groups;
    if control.is_empty() || treatment.is_empty() {
        return Err(BootstrapError::malformed_design(
            "both conditions need at least one sample in the count matrix",
        ));
    }
    Ok(GroupLayout { control, treatment })
}
