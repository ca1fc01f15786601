//! Differential expression adapter boundary.
//!
//! The statistical model itself lives in R (edgeR / DESeq2). This module only
//! defines the contract: given a count sub-matrix and a design, write a
//! per-gene table with at least `logFC` and `FDR` columns to `outfile`.

#[cfg(test)]
pub(crate) mod mock;
pub mod rscript;

pub use rscript::RscriptAdapter;

use crate::count_table::CountTable;
use crate::error::BootstrapError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeaError {
    #[error("Method {0} not implemented")]
    UnknownMethod(String),

    #[error("Failed to launch DE backend: {0}")]
    Launch(#[from] std::io::Error),

    #[error("Could not stage DE input: {0}")]
    Input(String),

    #[error("DE backend exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("DE backend did not produce {0}")]
    MissingOutput(String),
}

impl DeaError {
    /// Numerical failures are worth retrying with a fresh resample; launch and
    /// configuration problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeaError::Failed { .. } | DeaError::MissingOutput(_))
    }
}

/// Which DE test to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeMethod {
    /// edgeR quasi-likelihood F-test (`edger` is accepted as an alias).
    EdgerQlf,
    /// edgeR likelihood ratio test.
    EdgerLrt,
    Deseq2,
}

impl DeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeMethod::EdgerQlf => "edgerqlf",
            DeMethod::EdgerLrt => "edgerlrt",
            DeMethod::Deseq2 => "deseq2",
        }
    }
}

impl FromStr for DeMethod {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "edgerqlf" | "edger" => Ok(DeMethod::EdgerQlf),
            "edgerlrt" => Ok(DeMethod::EdgerLrt),
            "deseq2" => Ok(DeMethod::Deseq2),
            _ => Err(BootstrapError::UnknownMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for DeMethod {
    type Error = BootstrapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeMethod> for String {
    fn from(method: DeMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for DeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of one DE call besides the matrix itself.
#[derive(Debug, Clone)]
pub struct DeRequest<'a> {
    pub method: DeMethod,
    /// `paired`, `unpaired`, or a path to a design table on disk.
    pub design: &'a str,
    /// Formal log2 fold change threshold.
    pub lfc: f64,
    pub overwrite: bool,
}

/// Something that can run a DE analysis and persist the result table.
pub trait DeAdapter {
    fn run_dea(
        &self,
        matrix: &CountTable,
        outfile: &Path,
        request: &DeRequest<'_>,
    ) -> Result<(), DeaError>;
}
