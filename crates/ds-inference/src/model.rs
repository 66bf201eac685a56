//! Simulated process model: the likelihood density matrices, the unfolding
//! response, and the Pomeron-delta / xi_max re-generation machinery.
//!
//! The model owns a flat list of simulated event records and can be
//! regenerated for any `(delta, xi_max)` grid point: events failing the
//! kinematic cutoff are dropped, survivors are re-weighted by
//! `(M^2)^(-delta)` per diffractive system, and the detector-level and
//! generator-level likelihood matrices, per-process totals, synthetic count
//! vectors, and the response matrix are refilled from scratch.

use crate::response::ResponseMatrix;
use ds_comb::vecops::{self, EPS};
use ds_core::{DdCutoffMode, Error, FoldingMode, N_PROCESSES, ProcessClass, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// CMS collision energy [GeV].
pub const SQRT_S: f64 = 13000.0;
/// Proton mass [GeV].
pub const M_P: f64 = 0.938;
/// Reference total inelastic cross section attached to simulated sources
/// [mb]. Affects simulated-only numbers, never the data extraction.
pub const MC_SIGMA_INEL: f64 = 80.0;

/// Low-mass sanity threshold, proton + pion production [GeV^2]. Events below
/// it carry mass-reconstruction artifacts and are dropped.
fn m2_min() -> f64 {
    (M_P + 0.14) * (M_P + 0.14)
}

/// One simulated event, already reduced to a flat validated record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimEvent {
    /// Detector-level combinatorial index (0 = not measured).
    pub measured: usize,
    /// Generator-level combinatorial index.
    pub truth: usize,
    /// True process class.
    pub process: ProcessClass,
    /// Invariant mass squared of the left diffractive system [GeV^2]
    /// (negative when not applicable).
    pub m2_left: f64,
    /// Invariant mass squared of the right diffractive system [GeV^2].
    pub m2_right: f64,
}

/// Kinematic/model knobs of one grid point.
#[derive(Debug, Clone, Copy)]
pub struct ModelPoint {
    /// Pomeron delta mass re-weighting exponent.
    pub delta: f64,
    /// Maximum xi = M^2/s cutoff.
    pub xi_max: f64,
}

/// Simulated source with its process likelihood densities.
pub struct ProcessModel {
    n_bins: usize,
    events: Vec<SimEvent>,
    dd_cutoff_mode: DdCutoffMode,
    skip_central_diffraction: bool,
    folding_mode: FoldingMode,

    f_det: DMatrix<f64>,
    f_gen: DMatrix<f64>,
    process_counts: Vec<f64>,
    x_det: Vec<f64>,
    x_gen: Vec<f64>,
    response: ResponseMatrix,
}

impl ProcessModel {
    /// Build a model over `2^d` bins from simulated event records.
    ///
    /// `folding_mode` tags which acceptance definition produced the truth
    /// indices; it is carried for reporting and does not transform events.
    pub fn new(
        d: usize,
        events: Vec<SimEvent>,
        dd_cutoff_mode: DdCutoffMode,
        skip_central_diffraction: bool,
        folding_mode: FoldingMode,
    ) -> Result<Self> {
        if d == 0 || d >= usize::BITS as usize {
            return Err(Error::Config(format!("combinatorial dimension {d} out of range")));
        }
        let n_bins = 1usize << d;
        for (k, ev) in events.iter().enumerate() {
            if ev.measured >= n_bins || ev.truth >= n_bins {
                return Err(Error::Config(format!(
                    "event {k} has combination outside [0, {n_bins}): measured={}, truth={}",
                    ev.measured, ev.truth
                )));
            }
        }
        Ok(Self {
            n_bins,
            events,
            dd_cutoff_mode,
            skip_central_diffraction,
            folding_mode,
            f_det: DMatrix::zeros(n_bins, N_PROCESSES),
            f_gen: DMatrix::zeros(n_bins, N_PROCESSES),
            process_counts: vec![0.0; N_PROCESSES],
            x_det: vec![0.0; n_bins],
            x_gen: vec![0.0; n_bins],
            response: ResponseMatrix::new(n_bins)?,
        })
    }

    /// Number of combinatorial bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Acceptance definition tag of this model.
    pub fn folding_mode(&self) -> FoldingMode {
        self.folding_mode
    }

    /// Detector-level likelihood density (columns sum to 1 incl. the 0-bin).
    pub fn detector_density(&self) -> &DMatrix<f64> {
        &self.f_det
    }

    /// Generator-level likelihood density.
    pub fn generator_density(&self) -> &DMatrix<f64> {
        &self.f_gen
    }

    /// Weighted event totals per process after cutoff and re-weighting.
    pub fn process_counts(&self) -> &[f64] {
        &self.process_counts
    }

    /// Synthetic detector-level count vector of the current model point.
    pub fn detector_counts(&self) -> &[f64] {
        &self.x_det
    }

    /// Synthetic generator-level count vector of the current model point.
    pub fn generator_counts(&self) -> &[f64] {
        &self.x_gen
    }

    /// Trained unfolding response of the current model point.
    pub fn response(&self) -> &ResponseMatrix {
        &self.response
    }

    /// Regenerate every derived quantity for a new `(delta, xi_max)` point.
    pub fn generate(&mut self, point: ModelPoint) -> Result<()> {
        if !(point.xi_max > 0.0 && point.xi_max < 1.0) {
            return Err(Error::Config(format!("xi_max must be in (0, 1), got {}", point.xi_max)));
        }
        self.reset();

        for k in 0..self.events.len() {
            let ev = self.events[k];
            if self.skip_central_diffraction && ev.process == ProcessClass::CentralDiffractive {
                continue;
            }
            if !self.passes_mass_cutoff(&ev, point.xi_max) {
                continue;
            }
            let weight = mass_reweight(&ev, point.delta);

            let j = ev.process.index();
            self.process_counts[j] += 1.0;
            self.f_gen[(ev.truth, j)] += weight;
            self.f_det[(ev.measured, j)] += weight;

            // Response training is unweighted: it encodes pure migration.
            if ev.measured != 0 {
                self.response.fill(ev.measured, ev.truth);
            } else {
                self.response.miss(ev.truth);
            }
        }

        self.calculate_densities();
        Ok(())
    }

    /// Column-normalize both densities over the full space (0-bin included,
    /// so inefficiency/non-acceptance stays encoded) and synthesize the
    /// integer count vectors.
    fn calculate_densities(&mut self) {
        for f in [&mut self.f_det, &mut self.f_gen] {
            for j in 0..N_PROCESSES {
                let sum: f64 = f.column(j).sum() + EPS;
                for i in 0..f.nrows() {
                    f[(i, j)] /= sum;
                }
            }
        }
        self.x_det = vecops::synthesize_counts(&self.f_det, &self.process_counts, 1.0)
            .iter()
            .map(|x| x.round())
            .collect();
        self.x_gen = vecops::synthesize_counts(&self.f_gen, &self.process_counts, 1.0)
            .iter()
            .map(|x| x.round())
            .collect();
    }

    fn reset(&mut self) {
        self.f_det.fill(0.0);
        self.f_gen.fill(0.0);
        self.process_counts.fill(0.0);
        self.x_det.fill(0.0);
        self.x_gen.fill(0.0);
        self.response.reset();
    }

    fn passes_mass_cutoff(&self, ev: &SimEvent, xi_max: f64) -> bool {
        let s = SQRT_S * SQRT_S;
        match ev.process {
            ProcessClass::SdLeft | ProcessClass::SdRight => {
                if ev.m2_left > xi_max * s || ev.m2_right > xi_max * s {
                    return false;
                }
                let m2 = if ev.process == ProcessClass::SdLeft { ev.m2_left } else { ev.m2_right };
                m2 >= m2_min()
            }
            ProcessClass::DoubleDiffractive => {
                let pass = match self.dd_cutoff_mode {
                    // Combined limit on the mass product, normalized by the
                    // proton mass scale.
                    DdCutoffMode::Product => {
                        ev.m2_left * ev.m2_right <= xi_max * s * (M_P * M_P)
                    }
                    DdCutoffMode::PerSystem => {
                        ev.m2_left <= xi_max * s && ev.m2_right <= xi_max * s
                    }
                };
                pass && ev.m2_left >= m2_min() && ev.m2_right >= m2_min()
            }
            // No diffractive-mass kinematics to cut on.
            ProcessClass::CentralDiffractive | ProcessClass::NonDiffractive => true,
        }
    }
}

/// Pomeron-delta mass re-weighting `w = (M^2)^(-delta)`; double diffraction
/// weights both systems.
fn mass_reweight(ev: &SimEvent, delta: f64) -> f64 {
    match ev.process {
        ProcessClass::SdLeft => (ev.m2_left + EPS).powf(-delta),
        ProcessClass::SdRight => (ev.m2_right + EPS).powf(-delta),
        ProcessClass::DoubleDiffractive => {
            (ev.m2_left + EPS).powf(-delta) * (ev.m2_right + EPS).powf(-delta)
        }
        ProcessClass::CentralDiffractive | ProcessClass::NonDiffractive => 1.0,
    }
}

/// Visible cross-section normalization attached to a luminosity reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VisibleNormalization {
    /// Visible inelastic cross section [mb].
    pub sigma_vis: f64,
    /// Luminosity (scale) uncertainty on the visible cross section [mb].
    pub sigma_vis_error: f64,
}

/// Scale a corrected rate vector into physical units.
///
/// `reference_bins` selects the combinations the luminosity reference value
/// corresponds to (the coincidence-trigger subset for data); `None` anchors
/// the reference to the full corrected sum (simulated sources, where the
/// reference is the total inelastic). The 0-bin is always excluded from the
/// visible sum.
pub fn visible_normalization(
    corrected: &[f64],
    reference_bins: Option<&[usize]>,
    sigma_reference: f64,
    sigma_reference_error: f64,
) -> Result<VisibleNormalization> {
    if corrected.is_empty() {
        return Err(Error::Config("empty corrected rate vector".into()));
    }
    if !(sigma_reference > 0.0) {
        return Err(Error::Config(format!(
            "reference cross section must be positive, got {sigma_reference}"
        )));
    }

    let reference_sum = match reference_bins {
        Some(bins) => {
            let mut sum = EPS;
            for &b in bins {
                if b >= corrected.len() {
                    return Err(Error::Config(format!(
                        "reference bin {b} outside [0, {})",
                        corrected.len()
                    )));
                }
                sum += corrected[b];
            }
            sum
        }
        None => vecops::total(corrected) + EPS,
    };

    let visible_sum: f64 = corrected.iter().skip(1).sum();
    let sigma_vis = visible_sum * sigma_reference / reference_sum;
    let sigma_vis_error = sigma_vis * (sigma_reference_error / sigma_reference);
    Ok(VisibleNormalization { sigma_vis, sigma_vis_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn event(measured: usize, truth: usize, process: ProcessClass, m2l: f64, m2r: f64) -> SimEvent {
        SimEvent { measured, truth, process, m2_left: m2l, m2_right: m2r }
    }

    fn sample_events() -> Vec<SimEvent> {
        let mut events = Vec::new();
        // SDL events at two masses, one above any reasonable cutoff.
        for _ in 0..100 {
            events.push(event(33, 33, ProcessClass::SdLeft, 10.0, -1.0));
        }
        for _ in 0..50 {
            events.push(event(32, 33, ProcessClass::SdLeft, 1e7, -1.0));
        }
        // ND events, some lost at detector level.
        for _ in 0..300 {
            events.push(event(63, 63, ProcessClass::NonDiffractive, -1.0, -1.0));
        }
        for _ in 0..30 {
            events.push(event(0, 63, ProcessClass::NonDiffractive, -1.0, -1.0));
        }
        // CD events.
        for _ in 0..20 {
            events.push(event(12, 12, ProcessClass::CentralDiffractive, -1.0, -1.0));
        }
        events
    }

    fn model(skip_cd: bool) -> ProcessModel {
        ProcessModel::new(6, sample_events(), DdCutoffMode::Product, skip_cd, FoldingMode::Charged)
            .unwrap()
    }

    #[test]
    fn columns_sum_to_one_after_generate() {
        let mut m = model(false);
        m.generate(ModelPoint { delta: 0.0, xi_max: 0.05 }).unwrap();
        for j in 0..N_PROCESSES {
            let sum: f64 = m.detector_density().column(j).sum();
            // Empty process columns stay at zero.
            assert!(sum.abs() < 1e-9 || (sum - 1.0).abs() < 1e-9, "column {j} sums to {sum}");
        }
    }

    #[test]
    fn xi_cutoff_removes_high_mass_events() {
        let mut m = model(false);
        m.generate(ModelPoint { delta: 0.0, xi_max: 0.9 }).unwrap();
        let with_high = m.process_counts()[ProcessClass::SdLeft.index()];
        // 1e7 GeV^2 corresponds to xi ~ 6e-2: a 1e-3 cutoff removes it.
        m.generate(ModelPoint { delta: 0.0, xi_max: 1e-3 }).unwrap();
        let without_high = m.process_counts()[ProcessClass::SdLeft.index()];
        assert_relative_eq!(with_high, 150.0, epsilon = 1e-9);
        assert_relative_eq!(without_high, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn reweight_tilts_toward_low_mass() {
        let low = mass_reweight(&event(1, 1, ProcessClass::SdLeft, 10.0, -1.0), 0.1);
        let high = mass_reweight(&event(1, 1, ProcessClass::SdLeft, 1e4, -1.0), 0.1);
        assert!(low > high);
        // delta = 0 is weightless.
        assert_relative_eq!(
            mass_reweight(&event(1, 1, ProcessClass::SdLeft, 123.0, -1.0), 0.0),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn skip_cd_empties_the_cd_column() {
        let mut m = model(true);
        m.generate(ModelPoint { delta: 0.0, xi_max: 0.05 }).unwrap();
        assert_relative_eq!(
            m.process_counts()[ProcessClass::CentralDiffractive.index()],
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn generate_is_repeatable() {
        let mut m = model(false);
        m.generate(ModelPoint { delta: 0.05, xi_max: 0.05 }).unwrap();
        let first = m.detector_counts().to_vec();
        m.generate(ModelPoint { delta: 0.1, xi_max: 0.01 }).unwrap();
        m.generate(ModelPoint { delta: 0.05, xi_max: 0.05 }).unwrap();
        assert_eq!(m.detector_counts(), &first[..]);
    }

    #[test]
    fn response_marks_lost_events_as_misses() {
        let mut m = model(false);
        m.generate(ModelPoint { delta: 0.0, xi_max: 0.05 }).unwrap();
        let eff = m.response().efficiencies();
        // 300 of 330 ND events at bin 63 are measured.
        assert_relative_eq!(eff[63], 300.0 / 330.0, epsilon = 1e-9);
    }

    #[test]
    fn visible_normalization_excludes_zero_bin() {
        let mut counts = vec![0.0; 8];
        counts[0] = 1000.0; // must not contribute
        counts[3] = 60.0;
        counts[5] = 40.0;
        let norm = visible_normalization(&counts, Some(&[3, 5]), 50.0, 1.0).unwrap();
        // Reference subset carries the full visible sum here.
        assert_relative_eq!(norm.sigma_vis, 50.0, epsilon = 1e-6);
        assert_relative_eq!(norm.sigma_vis_error, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn visible_normalization_rejects_bad_reference() {
        assert!(visible_normalization(&[1.0, 2.0], None, 0.0, 0.1).is_err());
        assert!(visible_normalization(&[1.0, 2.0], Some(&[5]), 50.0, 0.1).is_err());
    }
}
