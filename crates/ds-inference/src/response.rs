//! Detector response training and iterative Bayesian unfolding.
//!
//! The response matrix accumulates simulated `(measured, truth)` pairs; an
//! event lost to efficiency/acceptance (measured in the reserved 0-bin)
//! contributes only to the truth-side marginal via [`ResponseMatrix::miss`].
//! Unfolding is the iterative Bayesian (expectation-maximization) scheme
//! with a fixed iteration count; the count is a regularization parameter,
//! swept 1..=25 for systematic studies, not a convergence criterion.

use ds_comb::vecops::{self, EPS};
use ds_core::{Error, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trained detector response: `[measured][truth]` accumulations plus the
/// truth marginal including missed events.
#[derive(Debug, Clone)]
pub struct ResponseMatrix {
    counts: DMatrix<f64>,
    truth: Vec<f64>,
    n_bins: usize,
}

/// Unfolded counts plus the sanity diagnostics of the inversion.
#[derive(Debug, Clone)]
pub struct UnfoldedCounts {
    /// Reconstructed truth-level counts.
    pub counts: Vec<f64>,
    /// Total of the measured input.
    pub total_measured: f64,
    /// Total of the reconstructed output.
    pub total_unfolded: f64,
    /// False when the reconstructed total escapes the efficiency-consistent
    /// band or any bin is non-finite. Violations are surfaced, not silently
    /// accepted; callers decide whether to keep the result.
    pub within_bounds: bool,
}

impl ResponseMatrix {
    /// Empty response over `n_bins` combinatorial bins.
    pub fn new(n_bins: usize) -> Result<Self> {
        if n_bins == 0 || !n_bins.is_power_of_two() {
            return Err(Error::Config(format!(
                "response dimension must be a power of two, got {n_bins}"
            )));
        }
        Ok(Self { counts: DMatrix::zeros(n_bins, n_bins), truth: vec![0.0; n_bins], n_bins })
    }

    /// Number of combinatorial bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Accumulate one measured event with unit weight.
    pub fn fill(&mut self, measured: usize, truth: usize) {
        self.fill_weighted(measured, truth, 1.0);
    }

    /// Accumulate one measured event with the given weight.
    pub fn fill_weighted(&mut self, measured: usize, truth: usize, weight: f64) {
        self.counts[(measured, truth)] += weight;
        self.truth[truth] += weight;
    }

    /// Accumulate an event lost entirely at detector level.
    pub fn miss(&mut self, truth: usize) {
        self.miss_weighted(truth, 1.0);
    }

    /// Weighted variant of [`ResponseMatrix::miss`].
    pub fn miss_weighted(&mut self, truth: usize, weight: f64) {
        self.truth[truth] += weight;
    }

    /// Drop all accumulated training data.
    pub fn reset(&mut self) {
        self.counts.fill(0.0);
        self.truth.fill(0.0);
    }

    /// Per-truth-bin detection efficiency `sum_m counts[m][t] / truth[t]`.
    pub fn efficiencies(&self) -> Vec<f64> {
        (0..self.n_bins)
            .map(|t| {
                if self.truth[t] > EPS {
                    self.counts.column(t).sum() / self.truth[t]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Truth marginal of the training sample (the initial unfolding prior).
    pub fn truth_marginal(&self) -> &[f64] {
        &self.truth
    }

    /// Measured marginal of the training sample.
    pub fn measured_marginal(&self) -> Vec<f64> {
        (0..self.n_bins).map(|m| self.counts.row(m).sum()).collect()
    }

    /// Iterative Bayesian unfolding of a measured count vector.
    ///
    /// Starts from the training truth marginal as prior and applies the
    /// Bayes inversion `iterations` times. Zero-efficiency truth bins stay
    /// at zero rather than dividing by a near-zero normalizer.
    pub fn unfold(&self, measured: &[f64], iterations: usize) -> Result<UnfoldedCounts> {
        if measured.len() != self.n_bins {
            return Err(Error::Config(format!(
                "unfold input length {} does not match response dimension {}",
                measured.len(),
                self.n_bins
            )));
        }
        if iterations == 0 {
            return Err(Error::Config("unfold iteration count must be positive".into()));
        }

        let n = self.n_bins;
        let eff = self.efficiencies();

        // Conditional response P(m|t).
        let mut p_mt = DMatrix::zeros(n, n);
        for t in 0..n {
            if self.truth[t] > EPS {
                for m in 0..n {
                    p_mt[(m, t)] = self.counts[(m, t)] / self.truth[t];
                }
            }
        }

        let mut prior = vecops::normalized(&self.truth);
        let mut reconstructed = vec![0.0; n];

        for _ in 0..iterations {
            // Folded expectation per measured bin under the current prior.
            let mut denom = vec![0.0; n];
            for m in 0..n {
                for t in 0..n {
                    denom[m] += p_mt[(m, t)] * prior[t];
                }
            }

            for t in 0..n {
                let mut acc = 0.0;
                for m in 0..n {
                    if denom[m] > EPS {
                        acc += p_mt[(m, t)] * prior[t] / denom[m] * measured[m];
                    }
                }
                reconstructed[t] = if eff[t] > EPS { acc / eff[t] } else { 0.0 };
            }
            prior = vecops::normalized(&reconstructed);
        }

        let total_measured = vecops::total(measured);
        let total_unfolded = vecops::total(&reconstructed);
        let within_bounds = self.check_bounds(total_measured, total_unfolded, &reconstructed);
        if !within_bounds {
            log::warn!(
                "unfolded total {total_unfolded:.1} outside sanity band for measured total \
                 {total_measured:.1}"
            );
        }

        Ok(UnfoldedCounts { counts: reconstructed, total_measured, total_unfolded, within_bounds })
    }

    /// Unfold every column of a `[bins][samples]` replica matrix in
    /// parallel. Cancellation is checked between replicas; a cancelled run
    /// returns a computation error.
    pub fn unfold_replicas(
        &self,
        replicas: &[Vec<f64>],
        iterations: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<Vec<f64>>> {
        let n_samples = replicas.first().map_or(0, |row| row.len());
        let columns: Vec<Result<Vec<f64>>> = (0..n_samples)
            .into_par_iter()
            .map(|j| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(Error::Computation("unfolding cancelled".into()));
                }
                Ok(self.unfold(&vecops::column(replicas, j), iterations)?.counts)
            })
            .collect();

        let mut matrix = vec![vec![0.0; n_samples]; self.n_bins];
        for (j, col) in columns.into_iter().enumerate() {
            vecops::set_column(&mut matrix, &col?, j);
        }
        Ok(matrix)
    }

    /// The reconstructed total must stay inside the band implied by the
    /// per-bin efficiencies: no lower than the measured total and no higher
    /// than the measured total inflated by the worst relevant efficiency,
    /// with a 50% margin on either side.
    fn check_bounds(&self, total_measured: f64, total_unfolded: f64, bins: &[f64]) -> bool {
        if !total_unfolded.is_finite() || bins.iter().any(|b| !b.is_finite() || *b < -EPS) {
            return false;
        }
        if total_measured <= EPS {
            return total_unfolded.abs() <= EPS;
        }
        let min_eff = self
            .efficiencies()
            .iter()
            .copied()
            .filter(|&e| e > EPS)
            .fold(1.0_f64, f64::min)
            .max(EPS);
        let upper = total_measured / min_eff * 1.5;
        let lower = total_measured * 0.5;
        (lower..=upper).contains(&total_unfolded)
    }
}
