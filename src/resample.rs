//! Bootstrap resampling of count matrix columns.
//!
//! Every draw uses its own `StdRng` seeded from the trial index (and attempt
//! number), so trial `k` yields the same sub-matrix in any process.

use crate::count_table::CountTable;
use crate::design::{Design, GroupLayout};
use crate::error::Result;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed offset between successive attempts of the same trial.
pub const ATTEMPT_SEED_STRIDE: u64 = 1000;

/// One resampled sub-matrix together with the original columns it was built from.
#[derive(Debug, Clone)]
pub struct Resample {
    /// Positions into the original matrix, in sub-matrix column order.
    pub positions: Vec<usize>,
    pub matrix: CountTable,
}

impl Resample {
    /// Original sample names of the selected columns (repeats included).
    pub fn source_samples<'a>(&self, original: &'a CountTable) -> Vec<&'a str> {
        self.positions
            .iter()
            .map(|&p| original.sample_names()[p].as_str())
            .collect()
    }
}

/// Seed for `attempt` (1-based) of `trial`. The first attempt uses the trial
/// index itself.
pub fn seed_for(trial: u32, attempt: u32) -> u64 {
    u64::from(trial) + u64::from(attempt.saturating_sub(1)) * ATTEMPT_SEED_STRIDE
}

/// Draws column positions for one bootstrap sample.
pub fn draw_positions<R: Rng>(design: &Design, layout: &GroupLayout, rng: &mut R) -> Vec<usize> {
    match design {
        Design::Paired => {
            let n = layout.control.len();
            let drawn: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
            let mut positions: Vec<usize> = drawn
                .iter()
                .map(|&i| layout.control[i])
                .chain(drawn.iter().map(|&i| layout.treatment[i]))
                .collect();
            positions.sort_unstable();
            positions
        }
        Design::Unpaired | Design::Custom { .. } => {
            let mut positions = draw_group(&layout.control, rng);
            positions.extend(draw_group(&layout.treatment, rng));
            positions
        }
    }
}

fn draw_group<R: Rng>(group: &[usize], rng: &mut R) -> Vec<usize> {
    (0..group.len())
        .map(|_| group[rng.random_range(0..group.len())])
        .collect()
}

/// Resamples `matrix` for a bootstrap draw seeded with `seed`.
pub fn resample(matrix: &CountTable, design: &Design, seed: u64) -> Result<Resample> {
    let layout = design.layout(matrix)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let positions = draw_positions(design, &layout, &mut rng);
    debug!("Seed {} drew columns {:?}", seed, positions);
    let sub = matrix.select_columns(&positions)?;
    Ok(Resample {
        positions,
        matrix: sub,
    })
}

/// Resample for `trial`/`attempt`. Trial 0 is the untouched original matrix.
pub fn resample_trial(
    matrix: &CountTable,
    design: &Design,
    trial: u32,
    attempt: u32,
) -> Result<Resample> {
    if trial == 0 {
        design.layout(matrix)?;
        return Ok(Resample {
            positions: (0..matrix.n_samples()).collect(),
            matrix: matrix.clone(),
        });
    }
    resample(matrix, design, seed_for(trial, attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count_table::tests::create_test_count_table;
    use ndarray::Array2;
    use std::collections::HashSet;

    fn wide_table(n: usize) -> CountTable {
        let samples = (0..n).map(|i| format!("s{}_", i)).collect();
        CountTable::from_parts(
            "",
            vec!["g1".to_string(), "g2".to_string()],
            samples,
            Array2::from_shape_fn((2, n), |(r, c)| (r * n + c) as f64),
        )
        .unwrap()
    }

    #[test]
    fn test_same_seed_same_resample() {
        let matrix = wide_table(10);
        for design in [Design::Paired, Design::Unpaired] {
            for trial in 1..20 {
                let a = resample_trial(&matrix, &design, trial, 1).unwrap();
                let b = resample_trial(&matrix, &design, trial, 1).unwrap();
                assert_eq!(a.positions, b.positions);
                assert_eq!(a.matrix.sample_names(), b.matrix.sample_names());
                assert_eq!(a.matrix.counts, b.matrix.counts);
            }
        }
    }

    #[test]
    fn test_attempts_use_distinct_seeds() {
        assert_eq!(seed_for(7, 1), 7);
        assert_eq!(seed_for(7, 2), 1007);
        assert_eq!(seed_for(7, 3), 2007);
    }

    #[test]
    fn test_paired_resample_keeps_pairs() {
        let matrix = wide_table(12);
        let n = 6;
        for trial in 1..50 {
            let draw = resample_trial(&matrix, &Design::Paired, trial, 1).unwrap();
            let (control, treatment): (Vec<usize>, Vec<usize>) =
                draw.positions.iter().partition(|&&p| p < n);
            assert_eq!(control.len(), n);
            let shifted: Vec<usize> = control.iter().map(|p| p + n).collect();
            assert_eq!(shifted, treatment);
            assert!(draw.positions.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_unpaired_resample_stays_within_groups() {
        let matrix = wide_table(8);
        for trial in 1..50 {
            let draw = resample_trial(&matrix, &Design::Unpaired, trial, 1).unwrap();
            assert!(draw.positions[..4].iter().all(|&p| p < 4));
            assert!(draw.positions[4..].iter().all(|&p| p >= 4));
        }
    }

    #[test]
    fn test_suffixed_names_distinct_with_repeats() {
        let matrix = wide_table(6);
        let mut saw_repeat = false;
        for trial in 1..30 {
            let draw = resample_trial(&matrix, &Design::Unpaired, trial, 1).unwrap();
            let unique_positions: HashSet<_> = draw.positions.iter().collect();
            saw_repeat |= unique_positions.len() < draw.positions.len();
            let names: HashSet<_> = draw.matrix.sample_names().iter().collect();
            assert_eq!(names.len(), draw.positions.len());
        }
        assert!(saw_repeat);
    }

    #[test]
    fn test_trial_zero_is_identity() {
        let matrix = create_test_count_table();
        let draw = resample_trial(&matrix, &Design::Paired, 0, 1).unwrap();
        assert_eq!(draw.positions, vec![0, 1, 2, 3]);
        assert_eq!(draw.matrix.sample_names(), matrix.sample_names());
        assert_eq!(draw.source_samples(&matrix), vec!["C1", "C2", "T1", "T2"]);
    }
}
