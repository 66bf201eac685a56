//! End-to-end extraction pipeline.
//!
//! Wires the correction chain in order: beam-gas subtraction -> bootstrap
//! replica generation -> pileup inversion -> unfolding -> the parameter
//! scan with the mixture fit at all three extraction levels. The measured
//! side and the simulated model are kept on an equal footing: everything
//! the fit consumes is a count vector or a likelihood density, regardless
//! of origin.

use crate::beamgas::{self, TriggerMaskScales};
use crate::bootstrap;
use crate::extrapolate::ExtrapolationConfig;
use crate::model::{ModelPoint, ProcessModel, VisibleNormalization, visible_normalization};
use crate::pileup::{PileupInverter, PileupMap};
use crate::scan::{self, LevelInputs, LevelScan, ScanInputs};
use ds_comb::vecops;
use ds_core::{AnalysisConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// Measured trigger-mask rate vectors and run constants of one data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    /// Beam-beam mask rates, one entry per combinatorial index.
    pub beam_beam: Vec<f64>,
    /// A-side beam-empty mask rates.
    pub a_side: Vec<f64>,
    /// C-side beam-empty mask rates.
    pub c_side: Vec<f64>,
    /// Empty-empty mask rates.
    pub empty: Vec<f64>,
    /// A-side beam-gas scale factor.
    pub scale_a: f64,
    /// C-side beam-gas scale factor.
    pub scale_c: f64,
    /// Empty-empty beam-gas scale factor.
    pub scale_e: f64,
    /// Global interaction probability per bunch crossing; `None` disables
    /// the pileup correction.
    pub interaction_rate: Option<f64>,
    /// Luminosity reference cross section (van der Meer scan result) [mb].
    pub sigma_reference: f64,
    /// Uncertainty on the luminosity reference [mb].
    pub sigma_reference_error: f64,
    /// Combinations the luminosity reference corresponds to (coincidence
    /// trigger subset); empty anchors the reference to the full sum.
    pub reference_bins: Vec<usize>,
}

/// Central unfolding totals for one swept iteration count.
#[derive(Debug, Clone, Serialize)]
pub struct UnfoldSweepPoint {
    /// Iteration count of this sweep step.
    pub iterations: usize,
    /// Reconstructed total at this step.
    pub total_unfolded: f64,
    /// Whether the sanity bound held.
    pub within_bounds: bool,
}

/// Everything the pipeline produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Visible cross-section normalization of the corrected data.
    pub visible: VisibleNormalization,
    /// Unfolded + extrapolated total inelastic cross section [mb].
    pub sigma_tot_unfolded: f64,
    /// Unfolded fiducial inelastic cross section [mb].
    pub sigma_fid_unfolded: f64,
    /// Bins clamped at zero by the beam-gas subtraction (QA).
    pub beam_gas_clamped_bins: usize,
    /// Bins clamped at zero by the pileup inversion (QA).
    pub pileup_clamped_bins: usize,
    /// Whether the central unfolding stayed inside its sanity band.
    pub unfold_within_bounds: bool,
    /// Central unfolding totals across the systematic iteration sweep.
    pub unfold_sweep: Vec<UnfoldSweepPoint>,
    /// Scan results per extraction level.
    pub levels: Vec<LevelScan>,
}

/// Run the full extraction against one data source and one simulated model.
pub fn run(
    data: &DataSource,
    model: &mut ProcessModel,
    config: &AnalysisConfig,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<AnalysisReport> {
    config.validate()?;
    if data.beam_beam.len() != model.n_bins() {
        return Err(Error::Config(format!(
            "data has {} bins but the model has {}",
            data.beam_beam.len(),
            model.n_bins()
        )));
    }

    let scales = if config.beam_gas_correction {
        TriggerMaskScales { a_side: data.scale_a, c_side: data.scale_c, empty: data.scale_e }
    } else {
        log::info!("beam-gas correction disabled");
        TriggerMaskScales::OFF
    };

    // Central corrected vector plus beam-gas-aware replicas.
    let corrected =
        beamgas::subtract(&data.beam_beam, &data.a_side, &data.c_side, &data.empty, &scales)?;
    let mut replicas = bootstrap::corrected_replicas(
        &data.beam_beam,
        &data.a_side,
        &data.c_side,
        &data.empty,
        &scales,
        config.n_bootstrap,
        config.fast_bootstrap,
        seed,
    )?;

    // Pileup inversion of the central vector and every replica.
    let mut central = corrected.counts.clone();
    let mut pileup_clamped_bins = 0;
    if let Some(rate) = data.interaction_rate {
        let mut inverter = PileupInverter::new(&corrected.counts, config.enforce_positivity)?;
        central = inverter.map_counts(PileupMap::Inverse, &central, rate);
        inverter.correct_replicas(&mut replicas, rate);
        pileup_clamped_bins = inverter.clamped_bins();
    }

    // Train the model at the default point; the scan regenerates it later.
    model.generate(ModelPoint { delta: config.pomeron_delta, xi_max: config.xi_max })?;

    let reference_bins =
        if data.reference_bins.is_empty() { None } else { Some(data.reference_bins.as_slice()) };
    let visible = visible_normalization(
        &central,
        reference_bins,
        data.sigma_reference,
        data.sigma_reference_error,
    )?;
    let relative_error = visible.sigma_vis_error / visible.sigma_vis.max(ds_comb::EPS);

    // Central unfolding, including the optional systematic iteration sweep.
    let unfolded = model.response().unfold(&central, config.unfold_iterations)?;
    let mut unfold_sweep = Vec::new();
    if let Some((lo, hi)) = config.unfold_sweep {
        for iterations in lo..=hi {
            let sweep = model.response().unfold(&central, iterations)?;
            unfold_sweep.push(UnfoldSweepPoint {
                iterations,
                total_unfolded: sweep.total_unfolded,
                within_bounds: sweep.within_bounds,
            });
        }
    }

    let unfold_ratio = if unfolded.total_measured > ds_comb::EPS {
        unfolded.total_unfolded / unfolded.total_measured
    } else {
        1.0
    };
    let sigma_tot_unfolded = visible.sigma_vis * unfold_ratio;
    let total_reconstructed = vecops::total(&unfolded.counts);
    let sigma_fid_unfolded = if total_reconstructed > ds_comb::EPS {
        sigma_tot_unfolded * (total_reconstructed - unfolded.counts[0]) / total_reconstructed
    } else {
        0.0
    };

    // Unfold every replica; levels 2 and 3 differ only in the 0-bin.
    let unfolded_replicas =
        model.response().unfold_replicas(&replicas, config.unfold_iterations, cancel)?;
    let mut fiducial_replicas = unfolded_replicas.clone();
    for v in fiducial_replicas[0].iter_mut() {
        *v = 0.0;
    }

    let inputs = ScanInputs {
        levels: [
            LevelInputs {
                replicas,
                normalization: visible.sigma_vis,
                normalization_error: visible.sigma_vis_error,
            },
            LevelInputs {
                replicas: fiducial_replicas,
                normalization: sigma_fid_unfolded,
                normalization_error: sigma_fid_unfolded * relative_error,
            },
            LevelInputs {
                replicas: unfolded_replicas,
                normalization: sigma_tot_unfolded,
                normalization_error: sigma_tot_unfolded * relative_error,
            },
        ],
        extrapolation: ExtrapolationConfig::default(),
    };

    let levels = scan::run_scan(model, &inputs, config, seed, cancel)?;

    Ok(AnalysisReport {
        visible,
        sigma_tot_unfolded,
        sigma_fid_unfolded,
        beam_gas_clamped_bins: corrected.clamped_bins,
        pileup_clamped_bins,
        unfold_within_bounds: unfolded.within_bounds,
        unfold_sweep,
        levels,
    })
}
