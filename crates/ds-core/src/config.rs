//! Analysis configuration.
//!
//! All process-wide mode flags live here and are threaded through
//! constructors explicitly; there are no module-level globals.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which final-state particles define generator-level acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldingMode {
    /// Charged particles only.
    Charged,
    /// Charged or neutral particles.
    ChargedAndNeutral,
    /// Neutral particles only.
    Neutral,
}

/// Double-diffractive kinematic cutoff convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdCutoffMode {
    /// Combined limit on the product of the two system masses.
    Product,
    /// Separate limit per system.
    PerSystem,
}

/// Full configuration surface of the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Number of bootstrap replicas used for statistical uncertainty.
    pub n_bootstrap: usize,
    /// Fixed number of EM iterations per replica fit.
    pub n_em_iter: usize,
    /// Fixed unfolding iteration count for the central result.
    pub unfold_iterations: usize,
    /// Optional iteration sweep for unfolding systematics (inclusive range).
    pub unfold_sweep: Option<(usize, usize)>,
    /// Refine each EM result with a bounded L-BFGS minimization of the exact
    /// mixture likelihood.
    pub refine_with_lbfgs: bool,
    /// Scan the (delta, xi_max) model parameter grid; when false only the
    /// default point is fitted.
    pub scan_parameters: bool,
    /// Grid discretization per scan axis.
    pub scan_grid: usize,
    /// Poisson-approximate bootstrap sampling instead of exact multinomial.
    pub fast_bootstrap: bool,
    /// Apply the beam-gas subtraction; when false the scale factors are
    /// treated as zero.
    pub beam_gas_correction: bool,
    /// Exclude central diffraction from the simulation and hold its fraction
    /// fixed in the refinement step.
    pub skip_central_diffraction: bool,
    /// Generator-level acceptance definition.
    pub folding_mode: FoldingMode,
    /// Double-diffractive cutoff convention.
    pub dd_cutoff_mode: DdCutoffMode,
    /// Default Pomeron delta when the scan is disabled.
    pub pomeron_delta: f64,
    /// Default xi cutoff when the scan is disabled.
    pub xi_max: f64,
    /// Clamp negative bins produced by the pileup inversion to zero.
    pub enforce_positivity: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            n_bootstrap: 200,
            n_em_iter: 50,
            unfold_iterations: 5,
            unfold_sweep: None,
            refine_with_lbfgs: true,
            scan_parameters: true,
            scan_grid: 30,
            fast_bootstrap: false,
            beam_gas_correction: true,
            skip_central_diffraction: false,
            folding_mode: FoldingMode::Charged,
            dd_cutoff_mode: DdCutoffMode::Product,
            pomeron_delta: 0.085,
            xi_max: 0.05,
            enforce_positivity: true,
        }
    }
}

impl AnalysisConfig {
    /// Validate parameter ranges. Called once at load time.
    pub fn validate(&self) -> Result<()> {
        if self.n_bootstrap < 2 {
            return Err(Error::Config(format!(
                "n_bootstrap must be at least 2, got {}",
                self.n_bootstrap
            )));
        }
        if self.n_em_iter == 0 {
            return Err(Error::Config("n_em_iter must be positive".into()));
        }
        if self.unfold_iterations == 0 || self.unfold_iterations > 25 {
            return Err(Error::Config(format!(
                "unfold_iterations must be in 1..=25, got {}",
                self.unfold_iterations
            )));
        }
        if let Some((lo, hi)) = self.unfold_sweep {
            if lo == 0 || hi > 25 || lo > hi {
                return Err(Error::Config(format!(
                    "unfold_sweep must be a non-empty subrange of 1..=25, got {lo}..={hi}"
                )));
            }
        }
        if self.scan_parameters && self.scan_grid < 2 {
            return Err(Error::Config(format!(
                "scan_grid must be at least 2 when scanning, got {}",
                self.scan_grid
            )));
        }
        if !(0.0..1.0).contains(&self.xi_max) || self.xi_max == 0.0 {
            return Err(Error::Config(format!("xi_max must be in (0, 1), got {}", self.xi_max)));
        }
        if !self.pomeron_delta.is_finite() || self.pomeron_delta < 0.0 {
            return Err(Error::Config(format!(
                "pomeron_delta must be finite and non-negative, got {}",
                self.pomeron_delta
            )));
        }
        Ok(())
    }
}
