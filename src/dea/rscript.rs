//! DE adapter that shells out to `Rscript`.

use super::{DeAdapter, DeRequest, DeaError};
use crate::count_table::CountTable;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const RUN_DEA_R: &str = include_str!("run_dea.R");

/// Runs edgeR / DESeq2 through an `Rscript` subprocess.
#[derive(Debug, Clone)]
pub struct RscriptAdapter {
    /// Executable used to run the driver script.
    pub rscript: String,
    /// Driver script to use instead of the bundled one.
    pub script: Option<PathBuf>,
}

impl RscriptAdapter {
    pub fn new(rscript: impl Into<String>) -> Self {
        RscriptAdapter {
            rscript: rscript.into(),
            script: None,
        }
    }
}

impl DeAdapter for RscriptAdapter {
    fn run_dea(
        &self,
        matrix: &CountTable,
        outfile: &Path,
        request: &DeRequest<'_>,
    ) -> Result<(), DeaError> {
        if !request.overwrite && outfile.exists() {
            info!("{} exists, skipping DE call", outfile.display());
            return Ok(());
        }

        let scratch = tempfile::Builder::new().prefix("dea").tempdir()?;
        let counts_path = scratch.path().join("counts.csv");
        matrix
            .write_csv(&counts_path)
            .map_err(|e| DeaError::Input(e.to_string()))?;

        let script = match &self.script {
            Some(path) => path.clone(),
            None => {
                let path = scratch.path().join("run_dea.R");
                fs::write(&path, RUN_DEA_R)?;
                path
            }
        };

        info!(
            "Calling {} with {} ({} genes x {} samples, design {})",
            self.rscript,
            request.method,
            matrix.dimensions().0,
            matrix.dimensions().1,
            request.design
        );
        let output = Command::new(&self.rscript)
            .arg(&script)
            .arg(&counts_path)
            .arg(outfile)
            .arg(request.method.as_str())
            .arg(request.design)
            .arg(request.lfc.to_string())
            .arg(if request.overwrite { "TRUE" } else { "FALSE" })
            .output()?;
        debug!("{}", String::from_utf8_lossy(&output.stdout));

        if !output.status.success() {
            return Err(DeaError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !outfile.is_file() {
            return Err(DeaError::MissingOutput(outfile.display().to_string()));
        }
        Ok(())
    }
}
