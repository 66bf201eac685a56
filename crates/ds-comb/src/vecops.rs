//! Vector operations shared by the correction and fitting layers.

use nalgebra::DMatrix;

/// Epsilon floor guarding divisions and logarithms throughout the pipeline.
pub const EPS: f64 = 1e-12;

/// Sum of all components.
pub fn total(v: &[f64]) -> f64 {
    v.iter().sum()
}

/// Euclidean norm.
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Vector normalized to sum 1 (epsilon-guarded against a zero-sum input).
pub fn normalized(v: &[f64]) -> Vec<f64> {
    let sum = total(v) + EPS;
    v.iter().map(|x| x / sum).collect()
}

/// Vector with every component scaled.
pub fn scaled(v: &[f64], scale: f64) -> Vec<f64> {
    v.iter().map(|x| x * scale).collect()
}

/// Linearly spaced vector from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Column `j` of a `[rows][cols]` matrix stored as row vectors.
pub fn column(matrix: &[Vec<f64>], j: usize) -> Vec<f64> {
    matrix.iter().map(|row| row[j]).collect()
}

/// Overwrite column `j` of a `[rows][cols]` matrix stored as row vectors.
pub fn set_column(matrix: &mut [Vec<f64>], values: &[f64], j: usize) {
    for (row, &v) in matrix.iter_mut().zip(values) {
        row[j] = v;
    }
}

/// Diffractive xi = M^2/s to average rapidity gap.
pub fn xi_to_delta_y(xi: f64) -> f64 {
    -(xi + EPS).ln()
}

/// Average rapidity gap back to diffractive xi.
pub fn delta_y_to_xi(delta_y: f64) -> f64 {
    (-delta_y).exp()
}

/// Model-reconstructed count vector `x_hat[i] = sum_j F[i][j] p[j] scale`.
///
/// `density` is the `2^d x C` process likelihood matrix, `fractions` the
/// length-C process fraction vector.
pub fn synthesize_counts(density: &DMatrix<f64>, fractions: &[f64], scale: f64) -> Vec<f64> {
    assert_eq!(density.ncols(), fractions.len());
    (0..density.nrows())
        .map(|i| {
            fractions.iter().enumerate().map(|(j, &p)| density[(i, j)] * p * scale).sum::<f64>()
        })
        .collect()
}

/// Per-bin binomial errors `sqrt(p_i (1 - p_i) N)` of a count vector.
pub fn binomial_errors(counts: &[f64]) -> Vec<f64> {
    let n = total(counts);
    let probs = normalized(counts);
    probs.iter().map(|&p| (p * (1.0 - p) * n).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalized_sums_to_one() {
        let v = normalized(&[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(total(&v), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn linspace_endpoints() {
        let v = linspace(0.0, 0.15, 30);
        assert_eq!(v.len(), 30);
        assert_relative_eq!(v[0], 0.0);
        assert_relative_eq!(v[29], 0.15, epsilon = 1e-12);
    }

    #[test]
    fn column_roundtrip() {
        let mut m = vec![vec![0.0; 3]; 4];
        set_column(&mut m, &[1.0, 2.0, 3.0, 4.0], 1);
        assert_eq!(column(&m, 1), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(column(&m, 0), vec![0.0; 4]);
    }

    #[test]
    fn xi_delta_y_inverse_pair() {
        for &xi in &[1e-4, 0.01, 0.05, 0.5] {
            assert_relative_eq!(delta_y_to_xi(xi_to_delta_y(xi)), xi, epsilon = 1e-6);
        }
    }

    #[test]
    fn synthesize_counts_matches_manual_product() {
        let f = DMatrix::from_row_slice(3, 2, &[0.5, 0.1, 0.3, 0.2, 0.2, 0.7]);
        let x = synthesize_counts(&f, &[0.6, 0.4], 100.0);
        assert_relative_eq!(x[0], (0.5 * 0.6 + 0.1 * 0.4) * 100.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], (0.2 * 0.6 + 0.7 * 0.4) * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn binomial_errors_vanish_for_certain_bin() {
        let err = binomial_errors(&[100.0, 0.0]);
        assert!(err[0] < 1e-3);
        assert!(err[1] < 1e-3);
    }
}
