//! Common data types for DiffSigma

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Physical production mechanisms whose relative rates are the fit target.
///
/// The order is fixed and matches the column order of every process
/// likelihood matrix in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessClass {
    /// Single-diffractive, left-side system
    SdLeft,
    /// Single-diffractive, right-side system
    SdRight,
    /// Double-diffractive
    DoubleDiffractive,
    /// Central-diffractive
    CentralDiffractive,
    /// Non-diffractive
    NonDiffractive,
}

/// Number of process classes (matrix columns).
pub const N_PROCESSES: usize = 5;

impl ProcessClass {
    /// All process classes in column order.
    pub const ALL: [ProcessClass; N_PROCESSES] = [
        ProcessClass::SdLeft,
        ProcessClass::SdRight,
        ProcessClass::DoubleDiffractive,
        ProcessClass::CentralDiffractive,
        ProcessClass::NonDiffractive,
    ];

    /// Column index of this process class.
    pub fn index(self) -> usize {
        match self {
            ProcessClass::SdLeft => 0,
            ProcessClass::SdRight => 1,
            ProcessClass::DoubleDiffractive => 2,
            ProcessClass::CentralDiffractive => 3,
            ProcessClass::NonDiffractive => 4,
        }
    }

    /// Process class from a column index.
    pub fn from_index(index: usize) -> Result<ProcessClass> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| Error::Config(format!("invalid process index {index}, expected 0..5")))
    }

    /// Short label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            ProcessClass::SdLeft => "SDL",
            ProcessClass::SdRight => "SDR",
            ProcessClass::DoubleDiffractive => "DD",
            ProcessClass::CentralDiffractive => "CD",
            ProcessClass::NonDiffractive => "ND",
        }
    }
}

/// How much detector/acceptance correction has been applied before the
/// mixture fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionLevel {
    /// Detector-level, beam-gas and pileup corrected only.
    Visible,
    /// Unfolded to the fiducial (generator) level, 0-bin excluded.
    FiducialUnfolded,
    /// Unfolded and extrapolated to the total inelastic, 0-bin included.
    TotalUnfolded,
}

impl ExtractionLevel {
    /// All levels, in pipeline order.
    pub const ALL: [ExtractionLevel; 3] = [
        ExtractionLevel::Visible,
        ExtractionLevel::FiducialUnfolded,
        ExtractionLevel::TotalUnfolded,
    ];

    /// Numeric level identifier (1, 2 or 3).
    pub fn number(self) -> u8 {
        match self {
            ExtractionLevel::Visible => 1,
            ExtractionLevel::FiducialUnfolded => 2,
            ExtractionLevel::TotalUnfolded => 3,
        }
    }

    /// Parse a numeric level. Anything outside {1,2,3} is a caller contract
    /// violation.
    pub fn from_number(level: u8) -> Result<ExtractionLevel> {
        match level {
            1 => Ok(ExtractionLevel::Visible),
            2 => Ok(ExtractionLevel::FiducialUnfolded),
            3 => Ok(ExtractionLevel::TotalUnfolded),
            other => Err(Error::Config(format!(
                "invalid extraction level {other}, expected 1 (visible), 2 (fiducial) or 3 (total)"
            ))),
        }
    }
}

/// Integrated cross-section result for one process class at one extraction
/// level and one model grid point. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSection {
    /// Process class this entry belongs to.
    pub process: ProcessClass,
    /// Central value [mb].
    pub value: f64,
    /// Statistical uncertainty from the bootstrap spread [mb].
    pub stat: f64,
    /// Luminosity (normalization scale) uncertainty [mb].
    pub lumi: f64,
    /// Simulated efficiency x acceptance of the process; exactly 0 marks a
    /// process absent from the simulation.
    pub eff: f64,
    /// Mean negative log-likelihood of the fit across replicas.
    pub neg_log_l: f64,
    /// Mean Kullback-Leibler divergence data vs. model.
    pub kl: f64,
    /// Mean Kolmogorov-Smirnov statistic data vs. model.
    pub ks: f64,
    /// Mean chi-square data vs. model.
    pub chi2: f64,
    /// Pomeron delta re-weighting parameter of the model grid point.
    pub delta: f64,
    /// Kinematic xi cutoff of the model grid point.
    pub xi_max: f64,
}

impl CrossSection {
    /// One-line report string.
    pub fn summary(&self) -> String {
        format!(
            "{}: {:.2} +- {:.2} (stat) +- {:.2} (lumi) mb",
            self.process.label(),
            self.value,
            self.stat,
            self.lumi
        )
    }
}
