//! # ds-core
//!
//! Core types for DiffSigma: the error taxonomy, process classes, extraction
//! levels, cross-section results, and the analysis configuration surface.
//!
//! ## Architecture
//!
//! Downstream crates (`ds-comb`, `ds-inference`, `ds-cli`) depend on these
//! types only; no numerical code lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Analysis configuration structs (replaces process-wide mode globals).
pub mod config;
/// Error taxonomy and `Result` alias.
pub mod error;
/// Process classes, extraction levels, cross-section results.
pub mod types;

pub use config::{AnalysisConfig, DdCutoffMode, FoldingMode};
pub use error::{Error, Result};
pub use types::{CrossSection, ExtractionLevel, N_PROCESSES, ProcessClass};
