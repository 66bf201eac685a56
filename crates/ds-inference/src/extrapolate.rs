//! Variational total-inelastic extrapolation.
//!
//! Given fitted per-process visible cross sections, a 2D grid over
//! single-diffractive detection-efficiency hypotheses finds, for each
//! candidate total inelastic cross section, the `(eff_SDL, eff_SDR)` pair
//! minimizing a penalized least-squares objective: the squared deviation of
//! `sum_process value/eff` from the candidate, plus a symmetry penalty
//! forcing the SDL-derived and SDR-derived totals to agree. The
//! double-diffractive efficiency follows by inclusion-exclusion assuming
//! the two sides are independent:
//!
//! `eff_DD = eff_SDL + eff_SDR - eff_SDL * eff_SDR`
//!
//! Central-diffraction and non-diffractive efficiencies are taken from the
//! simulation and held fixed.

use ds_comb::vecops::EPS;
use ds_core::{Error, N_PROCESSES, ProcessClass, Result};
use serde::Serialize;

/// Grid and objective parameters of the extrapolation scan.
#[derive(Debug, Clone, Copy)]
pub struct ExtrapolationConfig {
    /// Upper end of the candidate total-inelastic range [mb].
    pub sigma_max: f64,
    /// Candidate step [mb].
    pub sigma_step: f64,
    /// Minimum single-diffractive efficiency hypothesis.
    pub eff_min: f64,
    /// Efficiency grid step.
    pub eff_step: f64,
    /// Weight of the left/right symmetry penalty. Exactly zero invites
    /// floating-point trouble in flat regions; keep it small but positive.
    pub lambda: f64,
}

impl Default for ExtrapolationConfig {
    fn default() -> Self {
        Self { sigma_max: 95.0, sigma_step: 0.01, eff_min: 0.5, eff_step: 0.005, lambda: 0.05 }
    }
}

/// One candidate total with its optimal efficiency hypothesis.
#[derive(Debug, Clone, Serialize)]
pub struct ExtrapolationPoint {
    /// Candidate total inelastic cross section [mb].
    pub sigma_total: f64,
    /// Minimized penalized objective at this candidate.
    pub objective: f64,
    /// Best efficiencies per process [SDL, SDR, DD, CD, ND].
    pub efficiencies: [f64; N_PROCESSES],
    /// Extrapolated per-process totals `value / eff` [mb].
    pub totals: [f64; N_PROCESSES],
}

/// Scan candidate totals from `sigma_visible` up to the configured maximum.
///
/// `visible` holds the five fitted process cross sections [mb];
/// `fixed_eff_cd` / `fixed_eff_nd` come from the simulation.
pub fn scan_total_inelastic(
    visible: &[f64],
    fixed_eff_cd: f64,
    fixed_eff_nd: f64,
    sigma_visible: f64,
    config: &ExtrapolationConfig,
) -> Result<Vec<ExtrapolationPoint>> {
    if visible.len() != N_PROCESSES {
        return Err(Error::Config(format!(
            "extrapolation needs {N_PROCESSES} process values, got {}",
            visible.len()
        )));
    }
    if !(sigma_visible > 0.0 && sigma_visible < config.sigma_max) {
        return Err(Error::Config(format!(
            "visible cross section {sigma_visible} outside (0, {})",
            config.sigma_max
        )));
    }

    let sdl = visible[ProcessClass::SdLeft.index()];
    let sdr = visible[ProcessClass::SdRight.index()];
    let dd = visible[ProcessClass::DoubleDiffractive.index()];
    let cd = visible[ProcessClass::CentralDiffractive.index()];
    let nd = visible[ProcessClass::NonDiffractive.index()];
    let eff_cd = fixed_eff_cd + EPS;
    let eff_nd = fixed_eff_nd + EPS;

    let mut points = Vec::new();
    let mut sigma_total = sigma_visible;
    while sigma_total <= config.sigma_max {
        let mut best_objective = f64::MAX;
        let mut best_eff = [0.0, 0.0, 0.0, fixed_eff_cd, fixed_eff_nd];

        let mut eff_sdl = config.eff_min;
        while eff_sdl < 0.99 {
            let mut eff_sdr = config.eff_min;
            while eff_sdr < 0.99 {
                let eff_dd = eff_sdl + eff_sdr - eff_sdl * eff_sdr;

                let total_sum =
                    sdl / eff_sdl + sdr / eff_sdr + dd / eff_dd + cd / eff_cd + nd / eff_nd;
                let main_term = (total_sum - sigma_total) * (total_sum - sigma_total);
                let asym = sdl / eff_sdl - sdr / eff_sdr;
                let objective =
                    (main_term + config.lambda * asym * asym) / (sigma_total * sigma_total);

                if objective < best_objective {
                    best_objective = objective;
                    best_eff[0] = eff_sdl;
                    best_eff[1] = eff_sdr;
                    best_eff[2] = eff_dd;
                }
                eff_sdr += config.eff_step;
            }
            eff_sdl += config.eff_step;
        }

        points.push(ExtrapolationPoint {
            sigma_total,
            objective: best_objective,
            efficiencies: best_eff,
            totals: [
                sdl / (best_eff[0] + EPS),
                sdr / (best_eff[1] + EPS),
                dd / (best_eff[2] + EPS),
                cd / eff_cd,
                nd / eff_nd,
            ],
        });
        sigma_total += config.sigma_step;
    }
    Ok(points)
}

/// The candidate minimizing the penalized objective.
pub fn best_point(points: &[ExtrapolationPoint]) -> Option<&ExtrapolationPoint> {
    points.iter().min_by(|a, b| a.objective.total_cmp(&b.objective))
}
