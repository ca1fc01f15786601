//! In-process DE adapter for tests.

use super::{DeAdapter, DeRequest, DeaError};
use crate::count_table::CountTable;
use crate::results::{ResultTable, FDR_COLUMN, LOGFC_COLUMN};
use ndarray::{s, Array2, Axis};
use std::cell::{Cell, RefCell};
use std::path::Path;

/// Writes `logFC = log2((mean(second half) + 1) / (mean(first half) + 1))`
/// per gene. The first `fail_first` calls fail like a rank-deficient fit.
#[derive(Debug, Default)]
pub struct MockAdapter {
    pub fail_first: Cell<u32>,
    pub calls: Cell<u32>,
    /// Design argument of every call, with whether that path existed.
    pub designs: RefCell<Vec<(String, bool)>>,
    pub samples: RefCell<Vec<Vec<String>>>,
}

impl MockAdapter {
    pub fn failing(times: u32) -> Self {
        MockAdapter {
            fail_first: Cell::new(times),
            ..Default::default()
        }
    }
}

impl DeAdapter for MockAdapter {
    fn run_dea(
        &self,
        matrix: &CountTable,
        outfile: &Path,
        request: &DeRequest<'_>,
    ) -> Result<(), DeaError> {
        self.calls.set(self.calls.get() + 1);
        self.designs
            .borrow_mut()
            .push((request.design.to_string(), Path::new(request.design).is_file()));
        self.samples.borrow_mut().push(matrix.sample_names().to_vec());

        if self.fail_first.get() > 0 {
            self.fail_first.set(self.fail_first.get() - 1);
            return Err(DeaError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "design matrix not of full rank".to_string(),
            });
        }

        let n = matrix.n_samples() / 2;
        let counts = &matrix.counts;
        let control = counts.slice(s![.., ..n]).mean_axis(Axis(1));
        let treatment = counts.slice(s![.., n..]).mean_axis(Axis(1));
        let (Some(control), Some(treatment)) = (control, treatment) else {
            return Err(DeaError::Input("empty condition block".to_string()));
        };

        let genes = matrix.feature_names().len();
        let values = Array2::from_shape_fn((genes, 2), |(r, c)| {
            if c == 0 {
                ((treatment[r] + 1.0) / (control[r] + 1.0)).log2()
            } else {
                0.5
            }
        });
        let table = ResultTable::new(
            matrix.feature_names().to_vec(),
            vec![LOGFC_COLUMN.to_string(), FDR_COLUMN.to_string()],
            values,
            None,
        )
        .map_err(|e| DeaError::Input(e.to_string()))?;
        table
            .write_csv(outfile)
            .map_err(|e| DeaError::Input(e.to_string()))?;
        Ok(())
    }
}
