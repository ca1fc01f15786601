//! Run configuration.
//!
//! Defaults mirror the command line; a JSON file can override them and
//! explicit flags override the file.

use crate::dea::DeMethod;
use crate::error::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// DE test to run on every trial.
    pub method: DeMethod,
    /// Design token: `paired`, `unpaired` or a path to a design table.
    pub design: String,
    /// Formal log2 fold change threshold passed to the DE test.
    pub lfc: f64,
    /// Resamples tried per trial before giving up on a failing DE call.
    pub max_attempts: u32,
    /// `Rscript` executable.
    pub rscript: String,
    /// Delete per-trial files once they are merged.
    pub clean_up: bool,
    /// Append attempt counts and completion lines here.
    pub logfile: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            method: DeMethod::EdgerQlf,
            design: "paired".to_string(),
            lfc: 0.0,
            max_attempts: 5,
            rscript: "Rscript".to_string(),
            clean_up: true,
            logfile: None,
        }
    }
}

impl BootstrapConfig {
    pub fn from_json(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: BootstrapConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BootstrapError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.lfc.is_finite() || self.lfc < 0.0 {
            return Err(BootstrapError::InvalidConfig(format!(
                "lfc threshold must be a non-negative number, got {}",
                self.lfc
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"method": "deseq2", "max_attempts": 3}"#).unwrap();

        let config = BootstrapConfig::from_json(&path).unwrap();
        assert_eq!(config.method, DeMethod::Deseq2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.design, "paired");
        assert!(config.clean_up);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"method": "limma"}"#).unwrap();
        assert!(BootstrapConfig::from_json(&path).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = BootstrapConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
