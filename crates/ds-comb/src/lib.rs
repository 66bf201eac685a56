//! # ds-comb
//!
//! Combinatorial bit-vector algebra and statistical comparison metrics.
//!
//! Everything here is pure and stateless: index/bit-vector bijections, Gray
//! transforms, the left-right reflection permutation, shared vector
//! operations, and the divergence/distance metrics consumed by the mixture
//! fitter and its tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Index <-> bit-vector bijections, Gray codes, reflection sequences.
pub mod bits;
/// KL divergence, KS statistic, chi-square, entropy, mixture likelihood.
pub mod metrics;
/// Shared vector/matrix helpers and kinematic conversions.
pub mod vecops;

pub use bits::{
    binary_matrix, bits_to_index, gray_decode, gray_encode, index_to_bits, left_right_reflection,
};
pub use metrics::{
    chi_square, kl_divergence, ks_statistic, multinomial_mixture_nll, shannon_entropy,
};
pub use vecops::EPS;
