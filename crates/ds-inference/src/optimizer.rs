//! Bounded quasi-Newton minimization used by the mixture-fit refinement.
//!
//! Wraps the argmin L-BFGS solver with a More-Thuente line search. Box
//! constraints are handled by clamping parameters before every evaluation
//! and zeroing gradient components that would push past an active bound
//! (projected gradient), which keeps the line search out of flat clamped
//! regions.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ds_core::{Error, Result};

/// L-BFGS configuration.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    pub max_iter: u64,
    /// Gradient-norm convergence tolerance.
    pub tol: f64,
    /// Number of corrections kept for the inverse-Hessian approximation.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-8, m: 10 }
    }
}

/// Result of one bounded minimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters (clamped inside the bounds).
    pub parameters: Vec<f64>,
    /// Objective value at the best parameters.
    pub fval: f64,
    /// Iterations used.
    pub n_iter: u64,
    /// Whether the solver converged (vs. hitting the iteration cap).
    pub converged: bool,
}

/// Objective with optional analytic gradient.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient; central differences with adaptive step unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        for i in 0..params.len() {
            let eps = 1e-8 * params[i].abs().max(1.0);
            let mut plus = params.to_vec();
            plus[i] += eps;
            let mut minus = params.to_vec();
            minus[i] -= eps;
            grad[i] = (self.eval(&plus)? - self.eval(&minus)?) / (2.0 * eps);
        }
        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

struct BoundedProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        const EDGE: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds).enumerate() {
            if x <= lo + EDGE && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EDGE && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS minimizer with box constraints.
pub struct BoundedLbfgs {
    config: OptimizerConfig,
}

impl BoundedLbfgs {
    /// New minimizer with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` from `init` inside `bounds`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init.len() != bounds.len() {
            return Err(Error::Config(format!(
                "parameter/bounds length mismatch: {} != {}",
                init.len(),
                bounds.len()
            )));
        }

        let problem = BoundedProblem { objective, bounds };
        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Config(format!("invalid optimizer tolerance: {e}")))?
            .with_tolerance_cost((0.1 * self.config.tol).max(1e-14))
            .map_err(|e| Error::Config(format!("invalid optimizer cost tolerance: {e}")))?;

        let init_clamped = clamp_params(init, bounds);
        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("minimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("no best parameters found".into()))?
            .clone();
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters: clamp_params(&best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            converged,
        })
    }
}

impl Default for BoundedLbfgs {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Quadratic;

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok((p[0] - 2.0).powi(2) + (p[1] - 3.0).powi(2))
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * (p[0] - 2.0), 2.0 * (p[1] - 3.0)])
        }
    }

    #[test]
    fn finds_unconstrained_minimum() {
        let opt = BoundedLbfgs::default();
        let r = opt.minimize(&Quadratic, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)]).unwrap();
        assert!(r.converged);
        assert_relative_eq!(r.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(r.parameters[1], 3.0, epsilon = 1e-4);
    }

    #[test]
    fn pins_to_active_bound() {
        let opt = BoundedLbfgs::default();
        let r = opt.minimize(&Quadratic, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)]).unwrap();
        assert_relative_eq!(r.parameters[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(r.parameters[1], 2.0, epsilon = 1e-6);
        assert!(r.converged, "projected gradient must converge at the bound");
    }

    #[test]
    fn numeric_gradient_fallback_works() {
        struct NoGrad;
        impl ObjectiveFunction for NoGrad {
            fn eval(&self, p: &[f64]) -> Result<f64> {
                Ok((p[0] + 1.0).powi(2))
            }
        }
        let opt = BoundedLbfgs::default();
        let r = opt.minimize(&NoGrad, &[3.0], &[(-5.0, 5.0)]).unwrap();
        assert_relative_eq!(r.parameters[0], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn mismatched_bounds_is_config_error() {
        let opt = BoundedLbfgs::default();
        assert!(opt.minimize(&Quadratic, &[0.0, 0.0], &[(-1.0, 1.0)]).is_err());
    }
}
