//! Expectation-maximization mixture fit of process fractions, with optional
//! bounded L-BFGS refinement and bootstrap-driven uncertainty propagation.
//!
//! Each bootstrap replica is fitted independently: random positive initial
//! fractions, a fixed number of EM iterations (the count is a deliberate
//! regularization choice, not a convergence criterion), then optionally a
//! direct minimization of the exact multinomial-mixture negative
//! log-likelihood with every fraction boxed in [0, 1]. The replica spread of
//! `fraction x normalization` is the statistical uncertainty; the
//! luminosity uncertainty is a pure scale uncertainty shared by all
//! replicas.

use crate::optimizer::{BoundedLbfgs, ObjectiveFunction, OptimizerConfig};
use crate::summary;
use ds_comb::vecops::{self, EPS};
use ds_comb::{kl_divergence, ks_statistic, chi_square, multinomial_mixture_nll};
use ds_core::{CrossSection, Error, ExtractionLevel, N_PROCESSES, ProcessClass, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fit options, a narrowed view of the analysis configuration.
#[derive(Debug, Clone, Copy)]
pub struct MixtureFitOptions {
    /// Fixed EM iteration count per replica.
    pub n_em_iter: usize,
    /// Refine each EM result against the exact likelihood.
    pub refine_with_lbfgs: bool,
    /// Hold the central-diffraction fraction fixed at its EM value during
    /// refinement.
    pub skip_central_diffraction: bool,
    /// Base RNG seed; replica `j` uses `seed + j`.
    pub seed: u64,
}

impl Default for MixtureFitOptions {
    fn default() -> Self {
        Self {
            n_em_iter: 50,
            refine_with_lbfgs: true,
            skip_central_diffraction: false,
            seed: 0,
        }
    }
}

/// Everything one extraction-level fit needs.
pub struct FitInputs<'a> {
    /// Bootstrap replica matrix `[bins][n_replicas]` at this level.
    pub replicas: &'a [Vec<f64>],
    /// Process likelihood density for this level, columns summing to 1 over
    /// the full space including the 0-bin.
    pub density: &'a DMatrix<f64>,
    /// Extraction level (controls 0-bin handling).
    pub level: ExtractionLevel,
    /// Physical normalization of the fraction vector [mb].
    pub normalization: f64,
    /// Absolute uncertainty on the normalization [mb].
    pub normalization_error: f64,
    /// Pomeron delta of the model grid point (stamped into results).
    pub delta: f64,
    /// xi cutoff of the model grid point (stamped into results).
    pub xi_max: f64,
}

/// Result of one extraction-level fit.
#[derive(Debug, Clone)]
pub struct MixtureFit {
    /// Per-process cross sections with uncertainties and fit metrics.
    pub cross_sections: Vec<CrossSection>,
    /// Per-process efficiency x acceptance (0 marks an absent process).
    pub efficiencies: Vec<f64>,
    /// Final fraction vector of every replica, `[n_replicas][C]`.
    pub replica_fractions: Vec<Vec<f64>>,
    /// Mean negative log-likelihood across replicas.
    pub mean_neg_log_l: f64,
    /// Mean KL divergence across replicas.
    pub mean_kl: f64,
    /// Mean KS statistic across replicas.
    pub mean_ks: f64,
    /// Mean chi-square across replicas.
    pub mean_chi2: f64,
}

impl MixtureFit {
    /// Efficiency-extrapolated totals `value / eff` per process. Meaningful
    /// at the visible and fiducial levels, where the fit lives inside the
    /// acceptance. Zero-efficiency processes extrapolate to zero rather
    /// than dividing by the degenerate normalizer.
    pub fn efficiency_extrapolated(&self) -> Vec<CrossSection> {
        self.cross_sections
            .iter()
            .map(|xs| {
                let eff = xs.eff + EPS;
                CrossSection {
                    value: xs.value / eff,
                    stat: xs.stat / eff,
                    lumi: xs.lumi / eff,
                    ..xs.clone()
                }
            })
            .collect()
    }
}

struct ReplicaFit {
    fractions: Vec<f64>,
    neg_log_l: f64,
    kl: f64,
    ks: f64,
    chi2: f64,
}

/// Exact mixture likelihood objective for the refinement step.
struct MixtureNll<'a> {
    density: &'a DMatrix<f64>,
    counts: &'a [f64],
}

impl ObjectiveFunction for MixtureNll<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        Ok(multinomial_mixture_nll(self.counts, params, self.density))
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        // d(-logL)/dp_t with the sum-to-one normalization folded in:
        // p~ = p / S, m_k = sum_s F[k][s] p~_s,
        // grad_t = -sum_k n_k (F[k][t] - m_k) / (S m_k).
        let s: f64 = params.iter().sum::<f64>() + EPS;
        let p_norm: Vec<f64> = params.iter().map(|p| p / s).collect();
        let mut grad = vec![0.0; params.len()];
        for (k, &n_k) in self.counts.iter().enumerate() {
            if n_k == 0.0 {
                continue;
            }
            let m_k: f64 =
                p_norm.iter().enumerate().map(|(j, &pj)| pj * self.density[(k, j)]).sum();
            if m_k <= EPS {
                continue;
            }
            for (t, g) in grad.iter_mut().enumerate() {
                *g -= n_k * (self.density[(k, t)] - m_k) / (s * m_k);
            }
        }
        Ok(grad)
    }
}

/// Prepare the level density: extract efficiencies from the 0-bin, zero the
/// 0-bin for the visible and fiducial levels, renormalize each column.
/// Degenerate columns (process absent from the simulation) get efficiency
/// exactly 0, an inspectable sentinel rather than a hidden failure.
fn prepare_density(density: &DMatrix<f64>, level: ExtractionLevel) -> (DMatrix<f64>, Vec<f64>) {
    let mut f = density.clone();
    let mut eff = vec![0.0; f.ncols()];
    for j in 0..f.ncols() {
        eff[j] = 1.0 - f[(0, j)];
        if level != ExtractionLevel::TotalUnfolded {
            f[(0, j)] = 0.0;
        }
        let sum: f64 = f.column(j).sum();
        if sum > EPS {
            for i in 0..f.nrows() {
                f[(i, j)] /= sum;
            }
        } else {
            log::warn!("process column {j} is empty in the simulation; efficiency forced to 0");
            eff[j] = 0.0;
        }
    }
    (f, eff)
}

fn fit_replica(
    x_boot: &[f64],
    density: &DMatrix<f64>,
    options: &MixtureFitOptions,
    replica_seed: u64,
) -> ReplicaFit {
    let n_processes = density.ncols();
    let total = vecops::total(x_boot);
    let mut rng = StdRng::seed_from_u64(replica_seed);

    // Random positive partition of the replica total.
    let draws: Vec<f64> = (0..n_processes).map(|_| rng.gen::<f64>()).collect();
    let mut p = vecops::scaled(&vecops::normalized(&draws), total);

    let mut kl = 0.0;
    let mut ks = 0.0;
    let mut chi2 = 0.0;

    for _ in 0..options.n_em_iter {
        // Posterior responsibility K = F diag(p), bin rows normalized
        // across processes.
        let mut p_new = vec![0.0; n_processes];
        for (i, &x_i) in x_boot.iter().enumerate() {
            let mut row_sum = EPS;
            for j in 0..n_processes {
                row_sum += density[(i, j)] * p[j];
            }
            for (j, pn) in p_new.iter_mut().enumerate() {
                *pn += density[(i, j)] * p[j] / row_sum * x_i;
            }
        }
        p = p_new;

        // Per-iteration diagnostics against the synthesized model vector
        // (tracked, never used for stopping).
        let fractions = vecops::normalized(&p);
        let x_hat = vecops::synthesize_counts(density, &fractions, total);
        kl = kl_divergence(&vecops::normalized(x_boot), &vecops::normalized(&x_hat));
        ks = ks_statistic(&vecops::normalized(x_boot), &vecops::normalized(&x_hat));
        chi2 = chi_square(x_boot, &x_hat);
    }

    let mut fractions = vecops::normalized(&p);

    if options.refine_with_lbfgs {
        let objective = MixtureNll { density, counts: x_boot };
        let mut bounds = vec![(0.0, 1.0); n_processes];
        let cd = ProcessClass::CentralDiffractive.index();
        if options.skip_central_diffraction && cd < n_processes {
            bounds[cd] = (fractions[cd], fractions[cd]);
        }
        match BoundedLbfgs::new(OptimizerConfig::default()).minimize(
            &objective,
            &fractions,
            &bounds,
        ) {
            Ok(refined) => fractions = vecops::normalized(&refined.parameters),
            Err(e) => log::warn!("L-BFGS refinement failed, keeping EM result: {e}"),
        }
    }

    let neg_log_l = multinomial_mixture_nll(x_boot, &fractions, density);
    ReplicaFit { fractions, neg_log_l, kl, ks, chi2 }
}

/// Fit the process mixture on every bootstrap replica and aggregate.
///
/// Replicas run in parallel with deterministic per-replica seeds;
/// cancellation is checked between replicas.
pub fn fit(
    inputs: &FitInputs<'_>,
    options: &MixtureFitOptions,
    cancel: &AtomicBool,
) -> Result<MixtureFit> {
    let n_replicas = inputs.replicas.first().map_or(0, |row| row.len());
    if n_replicas == 0 {
        return Err(Error::Config("mixture fit requires at least one replica".into()));
    }
    if inputs.replicas.len() != inputs.density.nrows() {
        return Err(Error::Config(format!(
            "replica matrix has {} bins but density has {} rows",
            inputs.replicas.len(),
            inputs.density.nrows()
        )));
    }
    if !(inputs.normalization > 0.0) {
        return Err(Error::Config(format!(
            "normalization must be positive, got {}",
            inputs.normalization
        )));
    }
    let n_processes = inputs.density.ncols();
    if n_processes == 0 || n_processes > N_PROCESSES {
        return Err(Error::Config(format!(
            "density must have 1..={N_PROCESSES} process columns, got {n_processes}"
        )));
    }

    let (density, efficiencies) = prepare_density(inputs.density, inputs.level);

    let replica_fits: Vec<Result<ReplicaFit>> = (0..n_replicas)
        .into_par_iter()
        .map(|j| {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Computation("mixture fit cancelled".into()));
            }
            let x_boot = vecops::column(inputs.replicas, j);
            Ok(fit_replica(&x_boot, &density, options, options.seed.wrapping_add(j as u64)))
        })
        .collect();
    let replica_fits: Vec<ReplicaFit> = replica_fits.into_iter().collect::<Result<Vec<_>>>()?;

    let relative_error = inputs.normalization_error / inputs.normalization;
    let mean_neg_log_l =
        replica_fits.iter().map(|r| r.neg_log_l).sum::<f64>() / n_replicas as f64;
    let mean_kl = replica_fits.iter().map(|r| r.kl).sum::<f64>() / n_replicas as f64;
    let mean_ks = replica_fits.iter().map(|r| r.ks).sum::<f64>() / n_replicas as f64;
    let mean_chi2 = replica_fits.iter().map(|r| r.chi2).sum::<f64>() / n_replicas as f64;

    let mut cross_sections = Vec::with_capacity(n_processes);
    for j in 0..n_processes {
        let process = ProcessClass::from_index(j)?;
        let scaled: Vec<f64> =
            replica_fits.iter().map(|r| r.fractions[j] * inputs.normalization).collect();
        let (value, stat) = summary::mean_stddev(&scaled);
        cross_sections.push(CrossSection {
            process,
            value,
            stat,
            lumi: value * relative_error,
            eff: efficiencies[j],
            neg_log_l: mean_neg_log_l,
            kl: mean_kl,
            ks: mean_ks,
            chi2: mean_chi2,
            delta: inputs.delta,
            xi_max: inputs.xi_max,
        });
    }

    Ok(MixtureFit {
        cross_sections,
        efficiencies,
        replica_fractions: replica_fits.into_iter().map(|r| r.fractions).collect(),
        mean_neg_log_l,
        mean_kl,
        mean_ks,
        mean_chi2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Well-separated 3-process density over 8 bins; bin 0 carries the
    /// inefficiency of each process.
    fn three_process_density() -> DMatrix<f64> {
        let mut f = DMatrix::zeros(8, 3);
        // Process 0: eff 0.9, concentrated in bins 1-2.
        f[(0, 0)] = 0.1;
        f[(1, 0)] = 0.6;
        f[(2, 0)] = 0.3;
        // Process 1: eff 0.8, bins 3-4.
        f[(0, 1)] = 0.2;
        f[(3, 1)] = 0.5;
        f[(4, 1)] = 0.3;
        // Process 2: eff 1.0, bins 5-7.
        f[(5, 2)] = 0.4;
        f[(6, 2)] = 0.4;
        f[(7, 2)] = 0.2;
        f
    }

    fn replicas_from(x: &[f64], n: usize) -> Vec<Vec<f64>> {
        let mut m = vec![vec![0.0; n]; x.len()];
        for j in 0..n {
            vecops::set_column(&mut m, x, j);
        }
        m
    }

    fn inputs<'a>(
        replicas: &'a [Vec<f64>],
        density: &'a DMatrix<f64>,
        level: ExtractionLevel,
    ) -> FitInputs<'a> {
        FitInputs {
            replicas,
            density,
            level,
            normalization: 1.0,
            normalization_error: 0.02,
            delta: 0.085,
            xi_max: 0.05,
        }
    }

    #[test]
    fn recovers_known_mixture_without_noise() {
        let density = three_process_density();
        let truth = [0.5, 0.3, 0.2];

        // Visible-level expectation: zero the 0-bin, renormalize columns.
        let (vis_density, _) = prepare_density(&density, ExtractionLevel::Visible);
        let x_hat: Vec<f64> = vecops::synthesize_counts(&vis_density, &truth, 100_000.0)
            .iter()
            .map(|x| x.round())
            .collect();

        let replicas = replicas_from(&x_hat, 4);
        let options = MixtureFitOptions { seed: 5, ..Default::default() };
        let cancel = AtomicBool::new(false);
        let fit =
            fit(&inputs(&replicas, &density, ExtractionLevel::Visible), &options, &cancel).unwrap();

        for (j, &truth_j) in truth.iter().enumerate() {
            assert_relative_eq!(fit.cross_sections[j].value, truth_j, epsilon = 1e-2);
        }
    }

    #[test]
    fn efficiencies_read_from_zero_bin() {
        let density = three_process_density();
        let (_, eff) = prepare_density(&density, ExtractionLevel::Visible);
        assert_relative_eq!(eff[0], 0.9, epsilon = 1e-12);
        assert_relative_eq!(eff[1], 0.8, epsilon = 1e-12);
        assert_relative_eq!(eff[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_process_column_gets_zero_efficiency() {
        let mut density = DMatrix::zeros(4, 2);
        density[(0, 0)] = 0.5;
        density[(1, 0)] = 0.5;
        // Column 1 entirely empty.
        let (_, eff) = prepare_density(&density, ExtractionLevel::Visible);
        assert_relative_eq!(eff[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn total_level_keeps_zero_bin() {
        let density = three_process_density();
        let (f, _) = prepare_density(&density, ExtractionLevel::TotalUnfolded);
        assert!(f[(0, 0)] > 0.0);
        let (f_vis, _) = prepare_density(&density, ExtractionLevel::Visible);
        assert_relative_eq!(f_vis[(0, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fit_is_deterministic_for_fixed_seed() {
        let density = three_process_density();
        let (vis_density, _) = prepare_density(&density, ExtractionLevel::Visible);
        let x_hat = vecops::synthesize_counts(&vis_density, &[0.4, 0.4, 0.2], 10_000.0);
        let replicas = replicas_from(&x_hat, 6);
        let options = MixtureFitOptions { seed: 99, refine_with_lbfgs: false, ..Default::default() };
        let cancel = AtomicBool::new(false);

        let f1 =
            fit(&inputs(&replicas, &density, ExtractionLevel::Visible), &options, &cancel).unwrap();
        let f2 =
            fit(&inputs(&replicas, &density, ExtractionLevel::Visible), &options, &cancel).unwrap();
        assert_eq!(f1.replica_fractions, f2.replica_fractions);
    }

    #[test]
    fn cancelled_fit_errors_out() {
        let density = three_process_density();
        let replicas = replicas_from(&[0.0; 8], 4);
        let cancel = AtomicBool::new(true);
        let r = fit(
            &inputs(&replicas, &density, ExtractionLevel::Visible),
            &MixtureFitOptions::default(),
            &cancel,
        );
        assert!(r.is_err());
    }

    #[test]
    fn invalid_normalization_is_config_error() {
        let density = three_process_density();
        let replicas = replicas_from(&[1.0; 8], 2);
        let cancel = AtomicBool::new(false);
        let mut bad = inputs(&replicas, &density, ExtractionLevel::Visible);
        bad.normalization = 0.0;
        assert!(fit(&bad, &MixtureFitOptions::default(), &cancel).is_err());
    }

    #[test]
    fn lumi_uncertainty_is_pure_scale() {
        let density = three_process_density();
        let (vis_density, _) = prepare_density(&density, ExtractionLevel::Visible);
        let x_hat = vecops::synthesize_counts(&vis_density, &[0.5, 0.3, 0.2], 50_000.0);
        let replicas = replicas_from(&x_hat, 4);
        let cancel = AtomicBool::new(false);
        let mut fi = inputs(&replicas, &density, ExtractionLevel::Visible);
        fi.normalization = 57.8;
        fi.normalization_error = 1.2;
        let fit = fit(&fi, &MixtureFitOptions::default(), &cancel).unwrap();
        for xs in &fit.cross_sections {
            assert_relative_eq!(xs.lumi, xs.value * 1.2 / 57.8, epsilon = 1e-9);
        }
    }

    #[test]
    fn analytic_gradient_matches_numeric() {
        let density = three_process_density();
        let (vis_density, _) = prepare_density(&density, ExtractionLevel::Visible);
        let counts = vecops::synthesize_counts(&vis_density, &[0.5, 0.3, 0.2], 1000.0);
        let objective = MixtureNll { density: &vis_density, counts: &counts };

        let p = [0.4, 0.35, 0.25];
        let analytic = objective.gradient(&p).unwrap();
        for t in 0..3 {
            let eps = 1e-6;
            let mut plus = p;
            plus[t] += eps;
            let mut minus = p;
            minus[t] -= eps;
            let numeric =
                (objective.eval(&plus).unwrap() - objective.eval(&minus).unwrap()) / (2.0 * eps);
            assert_relative_eq!(analytic[t], numeric, epsilon = 1e-3);
        }
    }
}
