//! Error types shared by the bootstrap modules.
//!
//! Configuration problems (unbalanced designs, unknown methods, malformed
//! design tables) are fatal and never retried. DE call failures are retried by
//! the trial runner and only surface as `AttemptsExhausted`.

use std::path::PathBuf;
use thiserror::Error;

use crate::dea::DeaError;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Must have balanced number of replicates per condition, got {columns} columns")]
    UnbalancedDesign { columns: usize },

    #[error("Malformed design table: {reason}")]
    MalformedDesign { reason: String },

    #[error("Unknown design '{0}': expected 'paired', 'unpaired' or a path to a design table")]
    UnknownDesign(String),

    #[error("Method {0} not implemented")]
    UnknownMethod(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid table {path}: {reason}")]
    InvalidTable { path: PathBuf, reason: String },

    #[error("Several merged result files match and no state record resolves them: {0:?}")]
    AmbiguousResults(Vec<PathBuf>),

    #[error("DE call failed for trial {trial} (attempt {attempt}): {source}")]
    DeCallFailed {
        trial: u32,
        attempt: u32,
        #[source]
        source: DeaError,
    },

    #[error("Trial {trial} failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        trial: u32,
        attempts: u32,
        last: DeaError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BootstrapError {
    pub(crate) fn invalid_table(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BootstrapError::InvalidTable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_design(reason: impl Into<String>) -> Self {
        BootstrapError::MalformedDesign {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
