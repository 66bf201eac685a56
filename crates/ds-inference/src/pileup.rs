//! Multiplicity pileup inversion.
//!
//! Overlapping interactions within one trigger merge combinations by bitwise
//! OR and distort the observed rate vector. The correction models the number
//! of interactions per recorded trigger as a zero-truncated Poisson with
//! mean `mu = -ln(1 - R)`, where `R` is the global interaction probability
//! per bunch crossing, truncated at double interactions (triples and beyond
//! are lumped into the double term).
//!
//! With a fixed reference combination distribution `r` the map is linear:
//!
//! `A(R) = q1 I + q2 C`,  `C[m][i] = sum_j r_j [i OR j == m]`
//!
//! Columns of `A` sum to 1, so the map is count-preserving. The forward
//! direction applies `A x`; the inverse solves `A y = x` by matrix
//! inversion. Per-rate matrices are cached by an integer quantization of
//! `R`, so mapping many bootstrap replicas at the same rate pays the
//! construction cost once.

use ds_comb::vecops;
use ds_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// Direction of the pileup map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PileupMap {
    /// Apply the pileup distortion (`A x`).
    Forward,
    /// Undo the pileup distortion (solve `A y = x`).
    Inverse,
}

/// Rate quantization granularity for the matrix cache.
const RATE_QUANTUM: f64 = 1e-6;

struct CachedRate {
    forward: DMatrix<f64>,
    inverse: Option<DMatrix<f64>>,
}

/// Cached per-rate pileup transfer matrices over a fixed reference
/// combination distribution.
pub struct PileupInverter {
    reference: Vec<f64>,
    enforce_positivity: bool,
    cache: HashMap<i64, CachedRate>,
    clamped_bins: usize,
}

impl PileupInverter {
    /// Build an inverter over the reference combination distribution
    /// (typically the measured corrected rates). The reference is
    /// normalized internally; it must be a power-of-two-length vector.
    pub fn new(reference_counts: &[f64], enforce_positivity: bool) -> Result<Self> {
        let n = reference_counts.len();
        if n == 0 || !n.is_power_of_two() {
            return Err(Error::Config(format!(
                "pileup reference length must be a power of two, got {n}"
            )));
        }
        Ok(Self {
            reference: vecops::normalized(reference_counts),
            enforce_positivity,
            cache: HashMap::new(),
            clamped_bins: 0,
        })
    }

    /// Zero-truncated Poisson mean from the per-crossing interaction
    /// probability `R`.
    pub fn mu_from_rate(rate: f64) -> f64 {
        -(1.0 - rate).ln()
    }

    /// Cumulative number of bins clamped at zero by inverse maps.
    pub fn clamped_bins(&self) -> usize {
        self.clamped_bins
    }

    /// Map a count vector through the pileup model at the given rate.
    ///
    /// Degenerate rates (outside `(0, 1)`) and singular transfer matrices
    /// are recovered by returning the input unchanged, with a warning; a
    /// numerically unstable inverse is never guessed.
    pub fn map_counts(&mut self, map: PileupMap, counts: &[f64], rate: f64) -> Vec<f64> {
        if counts.len() != self.reference.len() {
            log::warn!(
                "pileup map length mismatch ({} vs reference {}), returning input",
                counts.len(),
                self.reference.len()
            );
            return counts.to_vec();
        }
        if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
            log::warn!("degenerate pileup rate {rate}, returning input unchanged");
            return counts.to_vec();
        }

        let key = (rate / RATE_QUANTUM).round() as i64;
        if !self.cache.contains_key(&key) {
            let forward = Self::transfer_matrix(&self.reference, Self::mu_from_rate(rate));
            let inverse = forward.clone().try_inverse();
            if inverse.is_none() {
                log::warn!("singular pileup transfer matrix at rate {rate}");
            }
            self.cache.insert(key, CachedRate { forward, inverse });
        }
        let cached = &self.cache[&key];

        let x = DVector::from_column_slice(counts);
        let mapped = match map {
            PileupMap::Forward => &cached.forward * x,
            PileupMap::Inverse => match &cached.inverse {
                Some(inv) => inv * x,
                None => return counts.to_vec(),
            },
        };

        let mut out: Vec<f64> = mapped.iter().copied().collect();
        if self.enforce_positivity && map == PileupMap::Inverse {
            for y in out.iter_mut() {
                if *y < 0.0 {
                    *y = 0.0;
                    self.clamped_bins += 1;
                }
            }
        }
        out
    }

    /// Apply the inverse map to every column of a `[bins][samples]` replica
    /// matrix at a single rate.
    pub fn correct_replicas(&mut self, matrix: &mut [Vec<f64>], rate: f64) {
        let n_samples = matrix.first().map_or(0, |row| row.len());
        for j in 0..n_samples {
            let corrected = self.map_counts(PileupMap::Inverse, &vecops::column(matrix, j), rate);
            vecops::set_column(matrix, &corrected, j);
        }
    }

    /// `A = q1 I + q2 C` with `C` the OR-convolution against the reference.
    fn transfer_matrix(reference: &[f64], mu: f64) -> DMatrix<f64> {
        let n = reference.len();
        let p1 = mu * (-mu).exp();
        let trunc = 1.0 - (-mu).exp();
        let q1 = p1 / trunc;
        let q2 = 1.0 - q1;

        let mut a = DMatrix::zeros(n, n);
        for i in 0..n {
            a[(i, i)] += q1;
            for (j, &r_j) in reference.iter().enumerate() {
                a[(i | j, i)] += q2 * r_j;
            }
        }
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reference() -> Vec<f64> {
        vec![0.0, 400.0, 300.0, 100.0, 150.0, 30.0, 15.0, 5.0]
    }

    #[test]
    fn transfer_columns_sum_to_one() {
        let r = vecops::normalized(&reference());
        let a = PileupInverter::transfer_matrix(&r, 0.1);
        for j in 0..a.ncols() {
            let col_sum: f64 = (0..a.nrows()).map(|i| a[(i, j)]).sum();
            assert_relative_eq!(col_sum, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn forward_then_inverse_round_trips() {
        let mut pu = PileupInverter::new(&reference(), false).unwrap();
        let x = reference();
        let rate = 0.05;
        let folded = pu.map_counts(PileupMap::Forward, &x, rate);
        let unfolded = pu.map_counts(PileupMap::Inverse, &folded, rate);
        for (a, b) in x.iter().zip(&unfolded) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn forward_preserves_total_count() {
        let mut pu = PileupInverter::new(&reference(), false).unwrap();
        let x = reference();
        let folded = pu.map_counts(PileupMap::Forward, &x, 0.2);
        assert_relative_eq!(vecops::total(&folded), vecops::total(&x), epsilon = 1e-6);
    }

    #[test]
    fn degenerate_rate_returns_input() {
        let mut pu = PileupInverter::new(&reference(), true).unwrap();
        let x = reference();
        assert_eq!(pu.map_counts(PileupMap::Inverse, &x, 0.0), x);
        assert_eq!(pu.map_counts(PileupMap::Inverse, &x, 1.0), x);
        assert_eq!(pu.map_counts(PileupMap::Inverse, &x, f64::NAN), x);
    }

    #[test]
    fn positivity_clamp_is_counted() {
        let mut pu = PileupInverter::new(&reference(), true).unwrap();
        // A vector inconsistent with the pileup model can invert below zero.
        let x = vec![0.0, 0.0, 0.0, 500.0, 0.0, 0.0, 0.0, 1.0];
        let y = pu.map_counts(PileupMap::Inverse, &x, 0.3);
        assert!(y.iter().all(|&v| v >= 0.0));
        // Not asserting a specific count, only the bookkeeping invariant.
        assert!(pu.clamped_bins() == 0 || y.contains(&0.0));
    }

    #[test]
    fn rejects_non_power_of_two_reference() {
        assert!(PileupInverter::new(&[1.0, 2.0, 3.0], true).is_err());
    }

    #[test]
    fn mu_from_rate_monotone() {
        assert!(PileupInverter::mu_from_rate(0.2) > PileupInverter::mu_from_rate(0.1));
        assert_relative_eq!(
            1.0 - (-PileupInverter::mu_from_rate(0.3)).exp(),
            0.3,
            epsilon = 1e-12
        );
    }
}
