//! # ds-inference
//!
//! The statistical core of DiffSigma: beam-gas subtraction, bootstrap
//! resampling, pileup inversion, iterative Bayesian unfolding, and the
//! EM + L-BFGS mixture fitter with bootstrap uncertainty propagation,
//! parameter-grid scanning, and total-inelastic extrapolation.
//!
//! ## Architecture
//!
//! Every stage consumes and produces plain count vectors (or `[bins][samples]`
//! replica matrices), so stages compose in any order the physics requires.
//! Shared read-only inputs (the response matrix, the likelihood densities)
//! are never mutated during a fit; model regeneration happens only between
//! whole-pipeline runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Beam-gas background subtraction.
pub mod beamgas;
/// Multinomial/Poisson bootstrap replica generation.
pub mod bootstrap;
/// Total-inelastic variational extrapolation.
pub mod extrapolate;
/// The EM + L-BFGS mixture fitter.
pub mod mixture;
/// Simulated process model and likelihood densities.
pub mod model;
/// Bounded L-BFGS wrapper.
pub mod optimizer;
/// End-to-end pipeline orchestration.
pub mod pipeline;
/// Pileup transfer matrices and inversion.
pub mod pileup;
/// Response-matrix training and iterative Bayesian unfolding.
pub mod response;
/// The (delta, xi_max) parameter grid scan.
pub mod scan;
/// Bootstrap sample summaries and confidence intervals.
pub mod summary;

pub use beamgas::{CorrectedCounts, TriggerMaskScales};
pub use mixture::{FitInputs, MixtureFit, MixtureFitOptions};
pub use model::{ModelPoint, ProcessModel, SimEvent, VisibleNormalization};
pub use pileup::{PileupInverter, PileupMap};
pub use pipeline::{AnalysisReport, DataSource};
pub use response::{ResponseMatrix, UnfoldedCounts};
pub use scan::{GridPoint, LevelScan};
