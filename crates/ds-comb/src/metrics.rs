//! Statistical comparison metrics between combinatorial count/probability
//! vectors: KL divergence, Kolmogorov-Smirnov, chi-square, Shannon entropy,
//! and the multinomial mixture log-likelihood used by the fitter.

use crate::vecops::{EPS, normalized};
use nalgebra::DMatrix;

/// Kullback-Leibler divergence `sum_i p_i log(p_i / q_i)`.
///
/// Bins where either distribution is below the epsilon floor are skipped by
/// convention. This understates the divergence when the supports differ; it
/// is an approximation, not a missing-bin formula.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    assert_eq!(p.len(), q.len());
    p.iter()
        .zip(q)
        .filter(|(&pi, &qi)| pi.abs() > EPS && qi.abs() > EPS)
        .map(|(&pi, &qi)| pi * (pi / qi).ln())
        .sum()
}

/// Kolmogorov-Smirnov statistic between two discrete distributions.
///
/// The empirical CDFs are accumulated in index order, not sorted order: the
/// combinatorial indices form a fixed discrete domain, so this is the
/// fixed-ordering KS variant. Both final CDF values are pinned to 1.
pub fn ks_statistic(p: &[f64], q: &[f64]) -> f64 {
    assert_eq!(p.len(), q.len());
    assert!(!p.is_empty());
    let n = p.len();
    let mut cdf_p = 0.0;
    let mut cdf_q = 0.0;
    let mut ks: f64 = 0.0;
    for i in 0..n {
        if i + 1 == n {
            cdf_p = 1.0;
            cdf_q = 1.0;
        } else {
            cdf_p += p[i];
            cdf_q += q[i];
        }
        ks = ks.max((cdf_p - cdf_q).abs());
    }
    ks
}

/// Bin-by-bin chi-square `sum (obs - exp)^2 / exp` over bins with
/// `|exp| > EPS`.
pub fn chi_square(observed: &[f64], expected: &[f64]) -> f64 {
    assert_eq!(observed.len(), expected.len());
    observed
        .iter()
        .zip(expected)
        .filter(|(_, &e)| e.abs() > EPS)
        .map(|(&o, &e)| (o - e) * (o - e) / e)
        .sum()
}

/// Shannon entropy in bits, `-sum p_i log2(p_i)` over `p_i > EPS`.
pub fn shannon_entropy(p: &[f64]) -> f64 {
    p.iter().filter(|&&pi| pi > EPS).map(|&pi| -pi * pi.log2()).sum()
}

/// Negative log-likelihood of a multinomial mixture.
///
/// `-sum_k n_k log(sum_s p_s F[k][s])` with the fraction vector normalized
/// to sum 1 before evaluation. Non-extended: the total event count is not a
/// fit parameter. Bins whose mixture probability falls below the epsilon
/// floor contribute nothing.
pub fn multinomial_mixture_nll(counts: &[f64], fractions: &[f64], density: &DMatrix<f64>) -> f64 {
    assert_eq!(counts.len(), density.nrows());
    assert_eq!(fractions.len(), density.ncols());
    let p = normalized(fractions);
    let mut log_l = 0.0;
    for (k, &n_k) in counts.iter().enumerate() {
        let mix: f64 = p.iter().enumerate().map(|(s, &ps)| ps * density[(k, s)]).sum();
        if mix > EPS {
            log_l += n_k * mix.ln();
        }
    }
    -log_l
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kl_zero_for_identical_distributions() {
        let p = [0.1, 0.2, 0.3, 0.4];
        assert_relative_eq!(kl_divergence(&p, &p), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn kl_positive_for_distinct_distributions() {
        let p = [0.5, 0.5, 0.0, 0.0];
        let q = [0.25, 0.25, 0.25, 0.25];
        assert!(kl_divergence(&p, &q) > 0.0);
    }

    #[test]
    fn ks_symmetric() {
        let p = [0.1, 0.4, 0.3, 0.2];
        let q = [0.25, 0.25, 0.25, 0.25];
        assert_relative_eq!(ks_statistic(&p, &q), ks_statistic(&q, &p), epsilon = 1e-12);
    }

    #[test]
    fn ks_zero_for_identical() {
        let p = [0.1, 0.4, 0.3, 0.2];
        assert_relative_eq!(ks_statistic(&p, &p), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn chi_square_skips_empty_expectation() {
        let obs = [10.0, 5.0];
        let exp = [10.0, 0.0];
        assert_relative_eq!(chi_square(&obs, &exp), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn entropy_of_uniform_is_log2_n() {
        let p = [0.25; 4];
        assert_relative_eq!(shannon_entropy(&p), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn entropy_of_point_mass_is_zero() {
        let p = [1.0, 0.0, 0.0];
        assert_relative_eq!(shannon_entropy(&p), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn mixture_nll_prefers_true_fractions() {
        // Two well-separated processes; counts generated from p = [0.7, 0.3].
        let f = DMatrix::from_row_slice(4, 2, &[0.6, 0.1, 0.3, 0.1, 0.05, 0.4, 0.05, 0.4]);
        let truth = [0.7, 0.3];
        let counts: Vec<f64> = (0..4)
            .map(|k| 1000.0 * (f[(k, 0)] * truth[0] + f[(k, 1)] * truth[1]))
            .collect();

        let nll_true = multinomial_mixture_nll(&counts, &truth, &f);
        let nll_off = multinomial_mixture_nll(&counts, &[0.3, 0.7], &f);
        assert!(nll_true < nll_off);
    }

    #[test]
    fn mixture_nll_normalizes_fractions() {
        let f = DMatrix::from_row_slice(2, 2, &[0.8, 0.2, 0.2, 0.8]);
        let counts = [80.0, 20.0];
        let a = multinomial_mixture_nll(&counts, &[0.5, 0.5], &f);
        let b = multinomial_mixture_nll(&counts, &[2.0, 2.0], &f);
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
}
