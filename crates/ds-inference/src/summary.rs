//! Bootstrap sample summaries: mean/stddev and percentile confidence
//! intervals over per-replica scalars.

use ds_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, Normal};

const PROB_EPS: f64 = 1e-12;

/// Mean and (population) standard deviation of a replica sample.
pub fn mean_stddev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Quantile of pre-sorted data via linear interpolation. `q=0` is the
/// minimum, `q=1` the maximum; empty input yields `NaN`.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Quantile via sorting + linear interpolation.
pub fn quantile_linear(data: &[f64], q: f64) -> f64 {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    quantile_linear_sorted(&v, q)
}

/// Percentile bootstrap interval at the given confidence level.
pub fn percentile_interval(samples: &[f64], conf_level: f64) -> Result<(f64, f64)> {
    if samples.len() < 2 {
        return Err(Error::Config("percentile_interval requires at least 2 samples".into()));
    }
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Config(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    let alpha = (1.0 - conf_level) / 2.0;
    let lo = quantile_linear(samples, alpha);
    let hi = quantile_linear(samples, 1.0 - alpha);
    Ok((lo.min(hi), lo.max(hi)))
}

/// Bias-corrected percentile interval.
///
/// The bias constant `z0` comes from the fraction of replicas below the
/// central estimate (mid-rank ties). No acceleration term: the replica
/// fractions are bounded statistics with mild skew, and jackknife
/// leave-one-out over raw events is not available downstream of the
/// correction chain.
pub fn bias_corrected_interval(
    theta_hat: f64,
    samples: &[f64],
    conf_level: f64,
) -> Result<(f64, f64)> {
    if samples.len() < 2 {
        return Err(Error::Config("bias_corrected_interval requires at least 2 samples".into()));
    }
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Config(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    if !theta_hat.is_finite() {
        return Err(Error::Config("theta_hat must be finite".into()));
    }

    let normal = Normal::new(0.0, 1.0).expect("standard normal should be constructible");
    let mut n_lt = 0usize;
    let mut n_eq = 0usize;
    for &x in samples {
        if x < theta_hat {
            n_lt += 1;
        } else if x == theta_hat {
            n_eq += 1;
        }
    }
    let p = ((n_lt as f64 + 0.5 * n_eq as f64) / samples.len() as f64)
        .clamp(PROB_EPS, 1.0 - PROB_EPS);
    let z0 = normal.inverse_cdf(p);

    let alpha = (1.0 - conf_level) / 2.0;
    let z_lo = normal.inverse_cdf(alpha.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let z_hi = normal.inverse_cdf((1.0 - alpha).clamp(PROB_EPS, 1.0 - PROB_EPS));
    let q_lo = normal.cdf(2.0 * z0 + z_lo).clamp(PROB_EPS, 1.0 - PROB_EPS);
    let q_hi = normal.cdf(2.0 * z0 + z_hi).clamp(PROB_EPS, 1.0 - PROB_EPS);

    let lo = quantile_linear(samples, q_lo);
    let hi = quantile_linear(samples, q_hi);
    Ok((lo.min(hi), lo.max(hi)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantile_edges() {
        let s = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(quantile_linear_sorted(&s, 0.0), 1.0);
        assert_relative_eq!(quantile_linear_sorted(&s, 1.0), 5.0);
        assert_relative_eq!(quantile_linear_sorted(&s, 0.5), 3.0);
    }

    #[test]
    fn mean_stddev_constant_sample() {
        let (m, s) = mean_stddev(&[2.0, 2.0, 2.0]);
        assert_relative_eq!(m, 2.0);
        assert_relative_eq!(s, 0.0);
    }

    #[test]
    fn percentile_interval_ordering() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let (lo, hi) = percentile_interval(&xs, 0.8).unwrap();
        assert!(lo < hi);
        assert!(lo >= 1.0 && hi <= 10.0);
    }

    #[test]
    fn bias_corrected_reduces_to_percentile_for_median_centered() {
        let xs: Vec<f64> = (1..=101).map(|i| i as f64).collect();
        let (plo, phi) = percentile_interval(&xs, 0.9).unwrap();
        let (blo, bhi) = bias_corrected_interval(51.0, &xs, 0.9).unwrap();
        assert_relative_eq!(plo, blo, epsilon = 1.0);
        assert_relative_eq!(phi, bhi, epsilon = 1.0);
    }

    #[test]
    fn interval_rejects_degenerate_input() {
        assert!(percentile_interval(&[1.0], 0.9).is_err());
        assert!(percentile_interval(&[1.0, 2.0], 1.5).is_err());
    }
}
