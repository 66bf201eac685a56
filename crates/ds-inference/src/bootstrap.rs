//! Bootstrap resampling of combinatorial count vectors.
//!
//! Two interchangeable strategies:
//!
//! - **exact** multinomial accept/reject sampling, which reproduces the
//!   exact multinomial variance including the negative cross-bin
//!   correlation, at O(trials) cost per replica;
//! - **fast** independent Poisson sampling per bin, which approximates the
//!   multinomial for large counts but biases the variance estimate for
//!   low-count bins. Both modes are kept on purpose; downstream tests depend
//!   on the documented discrepancy.
//!
//! Sampling is deterministic: replica `j` uses seed `seed + j`, so replicas
//! are independent of each other and of the iteration order.

use crate::beamgas::{self, TriggerMaskScales};
use ds_comb::vecops;
use ds_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use rayon::prelude::*;

/// One exact multinomial replica: draw a uniform bin, accept it with its
/// probability, repeat until `n_trials` draws were accepted. The output
/// total equals `n_trials` exactly.
pub fn sample_exact(probs: &[f64], n_trials: u64, rng: &mut impl Rng) -> Vec<f64> {
    let mut counts = vec![0.0; probs.len()];
    let mut accepted = 0;
    while accepted < n_trials {
        let bin = rng.gen_range(0..probs.len());
        if rng.gen::<f64>() < probs[bin] {
            counts[bin] += 1.0;
            accepted += 1;
        }
    }
    counts
}

/// One Poisson-approximate replica: each bin drawn independently from
/// `Poisson(probs[bin] * n_trials)`.
pub fn sample_fast(probs: &[f64], n_trials: u64, rng: &mut impl Rng) -> Vec<f64> {
    probs
        .iter()
        .map(|&p| {
            let lambda = p * n_trials as f64;
            if lambda <= 0.0 {
                0.0
            } else {
                // Safe: lambda > 0 by the guard above.
                Poisson::new(lambda).expect("Poisson::new(lambda>0)").sample(rng)
            }
        })
        .collect()
}

/// Replica matrix `[bins][n_samples]`: column `j` is bootstrap replica `j`.
///
/// `probs` is renormalized internally; `n_trials` should be the rounded
/// observed total. Replicas are generated in parallel, seeded `seed + j`.
pub fn sample_matrix(
    probs: &[f64],
    n_trials: u64,
    n_samples: usize,
    fast: bool,
    seed: u64,
) -> Vec<Vec<f64>> {
    let probs = vecops::normalized(probs);
    let columns: Vec<Vec<f64>> = (0..n_samples)
        .into_par_iter()
        .map(|j| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(j as u64));
            if fast {
                sample_fast(&probs, n_trials, &mut rng)
            } else {
                sample_exact(&probs, n_trials, &mut rng)
            }
        })
        .collect();

    let mut matrix = vec![vec![0.0; n_samples]; probs.len()];
    for (j, col) in columns.iter().enumerate() {
        vecops::set_column(&mut matrix, col, j);
    }
    matrix
}

/// Resample a count vector into a replica matrix using its own empirical
/// distribution and rounded total.
pub fn resample_counts(counts: &[f64], n_samples: usize, fast: bool, seed: u64) -> Vec<Vec<f64>> {
    let n_trials = vecops::total(counts).round().max(0.0) as u64;
    sample_matrix(counts, n_trials, n_samples, fast, seed)
}

/// Beam-gas corrected replica matrix.
///
/// All four trigger-mask vectors are resampled independently and the
/// subtraction is applied per replica, so the statistical uncertainty of the
/// background masks propagates into every downstream stage. Mask seeds are
/// offset by the sample count so the four streams never overlap.
pub fn corrected_replicas(
    beam_beam: &[f64],
    a_side: &[f64],
    c_side: &[f64],
    empty: &[f64],
    scales: &TriggerMaskScales,
    n_samples: usize,
    fast: bool,
    seed: u64,
) -> Result<Vec<Vec<f64>>> {
    let n = beam_beam.len();
    if a_side.len() != n || c_side.len() != n || empty.len() != n {
        return Err(Error::Config(format!(
            "bootstrap mask length mismatch: B={}, A={}, C={}, E={}",
            n,
            a_side.len(),
            c_side.len(),
            empty.len()
        )));
    }

    let stride = n_samples as u64;
    let boot_b = resample_counts(beam_beam, n_samples, fast, seed);
    let boot_a = resample_counts(a_side, n_samples, fast, seed.wrapping_add(stride));
    let boot_c = resample_counts(c_side, n_samples, fast, seed.wrapping_add(2 * stride));
    let boot_e = resample_counts(empty, n_samples, fast, seed.wrapping_add(3 * stride));

    let mut matrix = vec![vec![0.0; n_samples]; n];
    for j in 0..n_samples {
        let corrected = beamgas::subtract(
            &vecops::column(&boot_b, j),
            &vecops::column(&boot_a, j),
            &vecops::column(&boot_c, j),
            &vecops::column(&boot_e, j),
            scales,
        )?;
        vecops::set_column(&mut matrix, &corrected.counts, j);
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_total_is_exact() {
        let probs = vecops::normalized(&[10.0, 30.0, 40.0, 20.0]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5 {
            let v = sample_exact(&probs, 500, &mut rng);
            assert_eq!(vecops::total(&v), 500.0);
        }
    }

    #[test]
    fn fast_total_within_poisson_tolerance() {
        let probs = vecops::normalized(&[10.0, 30.0, 40.0, 20.0]);
        let mut rng = StdRng::seed_from_u64(7);
        let n = 100_000u64;
        let v = sample_fast(&probs, n, &mut rng);
        // Total is Poisson(n): 5 sigma window.
        let tol = 5.0 * (n as f64).sqrt();
        assert!((vecops::total(&v) - n as f64).abs() < tol);
    }

    #[test]
    fn sample_matrix_is_deterministic() {
        let probs = [0.1, 0.2, 0.3, 0.4];
        let m1 = sample_matrix(&probs, 200, 8, false, 42);
        let m2 = sample_matrix(&probs, 200, 8, false, 42);
        assert_eq!(m1, m2);
        let m3 = sample_matrix(&probs, 200, 8, false, 43);
        assert_ne!(m1, m3);
    }

    #[test]
    fn sample_matrix_shape_and_orientation() {
        let probs = [0.5, 0.5];
        let m = sample_matrix(&probs, 100, 16, true, 1);
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].len(), 16);
    }

    #[test]
    fn exact_replica_means_track_probabilities() {
        let probs = vecops::normalized(&[1.0, 3.0]);
        let m = sample_matrix(&probs, 10_000, 50, false, 11);
        let mean0 = vecops::total(&m[0]) / 50.0;
        assert!((mean0 / 10_000.0 - probs[0]).abs() < 0.02);
    }

    #[test]
    fn corrected_replicas_stay_non_negative() {
        let b = vec![50.0, 80.0, 10.0, 5.0];
        let a = vec![5.0, 2.0, 8.0, 4.0];
        let c = vec![4.0, 3.0, 7.0, 4.0];
        let e = vec![1.0, 1.0, 1.0, 1.0];
        let scales = TriggerMaskScales { a_side: 1.0, c_side: 1.0, empty: 0.5 };
        let m = corrected_replicas(&b, &a, &c, &e, &scales, 20, false, 3).unwrap();
        for row in &m {
            assert!(row.iter().all(|&v| v >= 0.0));
        }
    }
}
