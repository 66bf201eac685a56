//! Synthetic closure demo: build a known five-process mixture, push it
//! through the full pipeline, and report how well the fractions come back.

use ds_core::{AnalysisConfig, DdCutoffMode, ProcessClass};
use ds_inference::model::{ModelPoint, ProcessModel, SimEvent};
use ds_inference::pipeline::DataSource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// True process fractions of the demo mixture.
pub const DEMO_FRACTIONS: [f64; 5] = [0.10, 0.10, 0.20, 0.05, 0.55];
/// Per-process detection efficiencies of the demo detector.
pub const DEMO_EFFICIENCIES: [f64; 5] = [0.8, 0.8, 0.9, 0.95, 0.99];

/// Characteristic visible combinations per process class.
const SUPPORTS: [&[usize]; 5] = [
    &[32, 33, 48],
    &[1, 3, 6],
    &[40, 41, 42, 43],
    &[9, 18],
    &[63, 62, 61, 59],
];

/// Generate a simulated event sample of the demo mixture.
pub fn demo_events(n_events: usize, seed: u64) -> Vec<SimEvent> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut events = Vec::with_capacity(n_events);
    for _ in 0..n_events {
        let u: f64 = rng.gen();
        let mut process = ProcessClass::NonDiffractive;
        let mut acc = 0.0;
        for (j, &p) in DEMO_FRACTIONS.iter().enumerate() {
            acc += p;
            if u < acc {
                process = ProcessClass::ALL[j];
                break;
            }
        }
        let j = process.index();

        // Diffractive masses from a crude 1/M^2 spectrum.
        let m2 = 2.0 * (1e4_f64 / 2.0).powf(rng.gen::<f64>());
        let (m2_left, m2_right) = match process {
            ProcessClass::SdLeft => (m2, -1.0),
            ProcessClass::SdRight => (-1.0, m2),
            ProcessClass::DoubleDiffractive => (m2, 2.0 * (1e4_f64 / 2.0).powf(rng.gen::<f64>())),
            _ => (-1.0, -1.0),
        };

        let support = SUPPORTS[j];
        let truth = support[rng.gen_range(0..support.len())];
        let measured = if rng.gen::<f64>() < DEMO_EFFICIENCIES[j] { truth } else { 0 };
        events.push(SimEvent { measured, truth, process, m2_left, m2_right });
    }
    events
}

/// Build the demo model and a matching pseudo-data source.
pub fn demo_setup(
    n_mc_events: usize,
    data_scale: f64,
    seed: u64,
    config: &AnalysisConfig,
) -> anyhow::Result<(ProcessModel, DataSource)> {
    let mut model = ProcessModel::new(
        6,
        demo_events(n_mc_events, seed),
        DdCutoffMode::Product,
        config.skip_central_diffraction,
        config.folding_mode,
    )?;
    model.generate(ModelPoint { delta: config.pomeron_delta, xi_max: config.xi_max })?;

    let x: Vec<f64> =
        model.detector_counts().iter().map(|v| (v * data_scale).round()).collect();
    let n = x.len();
    let data = DataSource {
        beam_beam: x,
        a_side: vec![0.0; n],
        c_side: vec![0.0; n],
        empty: vec![0.0; n],
        scale_a: 0.0,
        scale_c: 0.0,
        scale_e: 0.0,
        interaction_rate: None,
        sigma_reference: 57.8,
        sigma_reference_error: 1.2,
        reference_bins: Vec::new(),
    };
    Ok((model, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_events_are_deterministic() {
        let a = demo_events(500, 9);
        let b = demo_events(500, 9);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.measured, y.measured);
            assert_eq!(x.process, y.process);
        }
    }

    #[test]
    fn demo_fractions_approximate_truth() {
        let events = demo_events(50_000, 4);
        let mut counts = [0usize; 5];
        for ev in &events {
            counts[ev.process.index()] += 1;
        }
        for (j, &want) in DEMO_FRACTIONS.iter().enumerate() {
            let got = counts[j] as f64 / events.len() as f64;
            assert!((got - want).abs() < 0.02, "process {j}: {got} vs {want}");
        }
    }

    #[test]
    fn demo_setup_produces_consistent_shapes() {
        let config = AnalysisConfig::default();
        let (model, data) = demo_setup(20_000, 5.0, 1, &config).unwrap();
        assert_eq!(model.n_bins(), 64);
        assert_eq!(data.beam_beam.len(), 64);
        assert!(data.beam_beam.iter().sum::<f64>() > 0.0);
    }
}
