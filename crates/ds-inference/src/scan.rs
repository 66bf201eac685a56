//! The (Pomeron delta, xi_max) model parameter grid scan.
//!
//! Every grid point regenerates the process model (mass re-weighting plus
//! kinematic cutoff) and reruns the mixture fit at all three extraction
//! levels. The KL-divergence surface selects the best-fitting model point,
//! which is refitted as the final round together with the total-inelastic
//! extrapolation. Model regeneration mutates shared state, so grid points
//! run sequentially; all replica-level work inside each point is parallel.

use crate::extrapolate::{
    ExtrapolationConfig, ExtrapolationPoint, best_point, scan_total_inelastic,
};
use crate::mixture::{self, FitInputs, MixtureFitOptions};
use crate::model::{ModelPoint, ProcessModel};
use ds_comb::vecops::{delta_y_to_xi, linspace, xi_to_delta_y};
use ds_core::{
    AnalysisConfig, CrossSection, Error, ExtractionLevel, N_PROCESSES, Result,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Replica matrix and physical normalization of one extraction level.
pub struct LevelInputs {
    /// Bootstrap replica matrix `[bins][n_replicas]`.
    pub replicas: Vec<Vec<f64>>,
    /// Physical normalization [mb].
    pub normalization: f64,
    /// Absolute normalization uncertainty [mb].
    pub normalization_error: f64,
}

/// Per-level inputs in extraction-level order (visible, fiducial, total).
pub struct ScanInputs {
    /// One entry per extraction level.
    pub levels: [LevelInputs; 3],
    /// Grid parameters of the final-round total-inelastic extrapolation.
    pub extrapolation: ExtrapolationConfig,
}

/// One fitted grid point of one extraction level.
#[derive(Debug, Clone, Serialize)]
pub struct GridPoint {
    /// Pomeron delta of this point.
    pub delta: f64,
    /// xi cutoff of this point.
    pub xi_max: f64,
    /// Equivalent minimum rapidity gap.
    pub delta_y: f64,
    /// Mean negative log-likelihood across replicas.
    pub mean_neg_log_l: f64,
    /// Mean KL divergence across replicas.
    pub mean_kl: f64,
    /// Mean KS statistic across replicas.
    pub mean_ks: f64,
    /// Mean chi-square across replicas.
    pub mean_chi2: f64,
    /// Per-process cross sections at this point.
    pub cross_sections: Vec<CrossSection>,
}

/// Total-inelastic extrapolation attached to a final round.
#[derive(Debug, Clone, Serialize)]
pub struct ExtrapolationResult {
    /// Full candidate curve for offline review.
    pub points: Vec<ExtrapolationPoint>,
    /// The objective-minimizing candidate.
    pub best: ExtrapolationPoint,
}

/// Scan outcome of one extraction level.
#[derive(Debug, Clone, Serialize)]
pub struct LevelScan {
    /// Extraction level.
    pub level: ExtractionLevel,
    /// All fitted grid points, row-major in (delta, xi) order.
    pub grid: Vec<GridPoint>,
    /// KL-optimal delta.
    pub best_delta: f64,
    /// KL-optimal xi cutoff.
    pub best_xi_max: f64,
    /// Final-round cross sections at the optimal point.
    pub final_cross_sections: Vec<CrossSection>,
    /// Final-round per-process efficiencies.
    pub final_efficiencies: Vec<f64>,
    /// Total-inelastic extrapolation of the final round, when applicable.
    pub extrapolation: Option<ExtrapolationResult>,
}

fn fit_level(
    model: &ProcessModel,
    inputs: &ScanInputs,
    level: ExtractionLevel,
    point: ModelPoint,
    options: &MixtureFitOptions,
    cancel: &AtomicBool,
) -> Result<mixture::MixtureFit> {
    let level_inputs = &inputs.levels[(level.number() - 1) as usize];
    let density = match level {
        ExtractionLevel::Visible => model.detector_density(),
        ExtractionLevel::FiducialUnfolded | ExtractionLevel::TotalUnfolded => {
            model.generator_density()
        }
    };
    mixture::fit(
        &FitInputs {
            replicas: &level_inputs.replicas,
            density,
            level,
            normalization: level_inputs.normalization,
            normalization_error: level_inputs.normalization_error,
            delta: point.delta,
            xi_max: point.xi_max,
        },
        options,
        cancel,
    )
}

/// Run the grid scan over all three extraction levels.
pub fn run_scan(
    model: &mut ProcessModel,
    inputs: &ScanInputs,
    config: &AnalysisConfig,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<Vec<LevelScan>> {
    let (delta_range, delta_y_range) = if config.scan_parameters {
        // The gap grid avoids an exact zero lower bound, which would map to
        // an unphysical xi cutoff.
        (linspace(0.0, 0.15, config.scan_grid), linspace(1e-3, 7.0, config.scan_grid))
    } else {
        (vec![config.pomeron_delta], vec![xi_to_delta_y(config.xi_max)])
    };
    let ximax_range: Vec<f64> = delta_y_range.iter().map(|&dy| delta_y_to_xi(dy)).collect();

    let options = MixtureFitOptions {
        n_em_iter: config.n_em_iter,
        refine_with_lbfgs: config.refine_with_lbfgs,
        skip_central_diffraction: config.skip_central_diffraction,
        seed,
    };

    let mut grids: [Vec<GridPoint>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for &delta in &delta_range {
        for (&xi_max, &delta_y) in ximax_range.iter().zip(&delta_y_range) {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Computation("parameter scan cancelled".into()));
            }
            let point = ModelPoint { delta, xi_max };
            model.generate(point)?;

            for level in ExtractionLevel::ALL {
                let fit = fit_level(model, inputs, level, point, &options, cancel)?;
                grids[(level.number() - 1) as usize].push(GridPoint {
                    delta,
                    xi_max,
                    delta_y,
                    mean_neg_log_l: fit.mean_neg_log_l,
                    mean_kl: fit.mean_kl,
                    mean_ks: fit.mean_ks,
                    mean_chi2: fit.mean_chi2,
                    cross_sections: fit.cross_sections,
                });
            }
        }
    }

    // Final round: refit each level at its KL-optimal point, with the
    // extrapolation attached.
    let mut scans = Vec::with_capacity(3);
    for level in ExtractionLevel::ALL {
        let grid = std::mem::take(&mut grids[(level.number() - 1) as usize]);
        let best = grid
            .iter()
            .min_by(|a, b| a.mean_kl.total_cmp(&b.mean_kl))
            .ok_or_else(|| Error::Computation("empty scan grid".into()))?;
        let best_point_model = ModelPoint { delta: best.delta, xi_max: best.xi_max };
        log::info!(
            "level {} optimal grid point: delta = {:.4}, xi_max = {:.4}",
            level.number(),
            best.delta,
            best.xi_max
        );

        model.generate(best_point_model)?;
        let fit = fit_level(model, inputs, level, best_point_model, &options, cancel)?;
        // The extrapolation defines the total level; the fits inside the
        // acceptance extrapolate per process via their efficiencies instead.
        let extrapolation = if level == ExtractionLevel::TotalUnfolded {
            extrapolate_final(&fit, inputs, level)
        } else {
            None
        };

        scans.push(LevelScan {
            level,
            grid,
            best_delta: best_point_model.delta,
            best_xi_max: best_point_model.xi_max,
            final_cross_sections: fit.cross_sections,
            final_efficiencies: fit.efficiencies,
            extrapolation,
        });
    }
    Ok(scans)
}

fn extrapolate_final(
    fit: &mixture::MixtureFit,
    inputs: &ScanInputs,
    level: ExtractionLevel,
) -> Option<ExtrapolationResult> {
    if fit.cross_sections.len() != N_PROCESSES {
        return None;
    }
    let values: Vec<f64> = fit.cross_sections.iter().map(|xs| xs.value).collect();
    let sigma_visible = inputs.levels[(level.number() - 1) as usize].normalization;
    match scan_total_inelastic(
        &values,
        fit.efficiencies[ds_core::ProcessClass::CentralDiffractive.index()],
        fit.efficiencies[ds_core::ProcessClass::NonDiffractive.index()],
        sigma_visible,
        &inputs.extrapolation,
    ) {
        Ok(points) => {
            let best = best_point(&points)?.clone();
            Some(ExtrapolationResult { points, best })
        }
        Err(e) => {
            log::warn!("total-inelastic extrapolation skipped: {e}");
            None
        }
    }
}
