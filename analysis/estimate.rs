//! # Quadratic approximation of the posterior
//!
//! The posterior of a [`GaussianLinearModel`] is approximated by a multivariate
//! normal centred at its mode:
//!
//! 1.  **Start:** spline weights start at a caller-supplied vector; every other
//!     parameter is drawn from its prior using a seeded `StdRng`.
//! 2.  **Mode search (BFGS):** the negative log posterior is minimized over
//!     `(beta, log sigma)` so the optimizer never leaves `sigma > 0`. A short
//!     Newton refinement on the natural scale then drives the gradient to zero.
//! 3.  **Curvature:** the Hessian at the mode is taken by central differences of
//!     the analytic gradient on the natural scale (sigma itself). Its inverse is
//!     the covariance of the approximation.

use crate::config::FitConfig;
use crate::model::{BlockKind, GaussianLinearModel, ModelKind};
use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use ndarray_linalg::{Cholesky, InverseC, Solve, UPLO};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal, StandardNormal};
use std::cell::{Cell, RefCell};
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Bounds on `log sigma` seen by the optimizer; keeps every cost finite.
const LOG_SIGMA_BOUNDS: (f64, f64) = (-20.0, 20.0);
const MAX_REFINEMENT_STEPS: usize = 50;
/// Largest gradient component accepted at the reported mode.
const GRADIENT_ACCEPTANCE: f64 = 1e-4;

#[derive(Error, Debug)]
pub enum FitError {
    #[error("The spline start vector has {found} entries but the model has {expected} spline weights.")]
    StartLengthMismatch { found: usize, expected: usize },

    #[error("Could not draw starting values from the priors: {0}")]
    InvalidPrior(String),

    #[error("The negative log posterior is not finite at the starting point ({0}).")]
    NonFiniteStart(f64),

    #[error("BFGS mode search failed: {0}")]
    OptimizationFailed(String),

    #[error(
        "The mode search did not converge: largest gradient component is {gradient_norm:.3e} (acceptance {acceptance:.1e})."
    )]
    NotConverged { gradient_norm: f64, acceptance: f64 },

    #[error("The mode contains non-finite values.")]
    NonFiniteMode,

    #[error("The Hessian at the mode is not positive definite, so no quadratic approximation exists: {0}")]
    SingularHessian(String),

    #[error("Interval width must lie strictly between 0 and 1, got {0}.")]
    InvalidWidth(f64),

    #[error("Unknown parameter '{0}'.")]
    UnknownParameter(String),
}

/// Settings for one call to [`fit_quadratic_approximation`].
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Starting spline weights. `None` starts every weight at zero.
    pub spline_start: Option<Array1<f64>>,
}

impl FitOptions {
    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            seed: config.seed,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            spline_start: None,
        }
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self::from_config(&FitConfig::default())
    }
}

/// One row of a posterior summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A fitted normal approximation to the posterior.
#[derive(Debug, Clone)]
pub struct QuadraticApproximation {
    pub kind: ModelKind,
    pub names: Vec<String>,
    /// Posterior mode on the natural scale.
    pub mode: Array1<f64>,
    /// Numerical Hessian of the negative log posterior at the mode.
    pub hessian: Array2<f64>,
    pub covariance: Array2<f64>,
    /// Log posterior density at the mode, normalizing constants included.
    pub log_posterior: f64,
    /// BFGS iterations; `None` when BFGS stopped with an error and the mode
    /// was refined from the best point it evaluated.
    pub iterations: Option<usize>,
    /// Objective evaluations made by BFGS.
    pub evaluations: usize,
    pub refinement_steps: usize,
    covariance_factor: Array2<f64>,
}

impl QuadraticApproximation {
    pub fn num_parameters(&self) -> usize {
        self.mode.len()
    }

    /// One line describing the mode search.
    pub fn optimizer_summary(&self) -> String {
        match self.iterations {
            Some(iterations) => format!(
                "{iterations} BFGS iterations ({} objective evaluations), {} refinement steps",
                self.evaluations, self.refinement_steps
            ),
            None => format!(
                "BFGS stopped early after {} objective evaluations, {} refinement steps",
                self.evaluations, self.refinement_steps
            ),
        }
    }

    fn index_of(&self, name: &str) -> Result<usize, FitError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    /// Posterior mean of one parameter.
    pub fn coefficient(&self, name: &str) -> Result<f64, FitError> {
        Ok(self.mode[self.index_of(name)?])
    }

    pub fn standard_errors(&self) -> Array1<f64> {
        self.covariance.diag().mapv(f64::sqrt)
    }

    /// Central credible interval of the given mass for one parameter.
    pub fn credible_interval(&self, name: &str, width: f64) -> Result<(f64, f64), FitError> {
        let z = interval_multiplier(width)?;
        let i = self.index_of(name)?;
        let sd = self.covariance[[i, i]].sqrt();
        Ok((self.mode[i] - z * sd, self.mode[i] + z * sd))
    }

    /// Mean, sd and central interval of every parameter.
    pub fn summary(&self, width: f64) -> Result<Vec<ParameterSummary>, FitError> {
        let z = interval_multiplier(width)?;
        let sds = self.standard_errors();
        Ok(self
            .names
            .iter()
            .zip(self.mode.iter().zip(sds.iter()))
            .map(|(name, (&mean, &sd))| ParameterSummary {
                name: name.clone(),
                mean,
                sd,
                lower: mean - z * sd,
                upper: mean + z * sd,
            })
            .collect())
    }

    /// Draws `n` parameter vectors (rows) from the approximation.
    pub fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let p = self.num_parameters();
        let z = Array2::from_shape_simple_fn((p, n), || rng.sample::<f64, _>(StandardNormal));
        let mut draws = self.covariance_factor.dot(&z).reversed_axes();
        draws += &self.mode.view().insert_axis(Axis(0));
        draws
    }
}

/// Finds the posterior mode of `model` and the normal approximation around it.
pub fn fit_quadratic_approximation(
    model: &GaussianLinearModel,
    options: &FitOptions,
) -> Result<QuadraticApproximation, FitError> {
    let layout = model.layout();
    let k = layout.sigma_index();
    log::info!(
        "Fitting {} model by quadratic approximation ({} parameters, seed {}).",
        model.kind(),
        layout.total(),
        options.seed
    );

    let mut rng = StdRng::seed_from_u64(options.seed);
    let start = internal::starting_point(model, options, &mut rng)?;
    let start_cost = model.neg_log_posterior(start.view());
    if !start_cost.is_finite() {
        return Err(FitError::NonFiniteStart(start_cost));
    }
    log::debug!("Starting negative log posterior: {:.6}", start_cost);

    // The optimizer works on (beta, log sigma).
    let mut x0 = start.clone();
    x0[k] = start[k].ln().clamp(LOG_SIGMA_BOUNDS.0, LOG_SIGMA_BOUNDS.1);

    let best = RefCell::new((f64::INFINITY, x0.clone()));
    let evaluations = Cell::new(0usize);
    let cost_and_grad = |x: &Array1<f64>| -> (f64, Array1<f64>) {
        evaluations.set(evaluations.get() + 1);
        let theta = internal::to_natural(x, k);
        let cost = model.neg_log_posterior(theta.view());
        let mut grad = model.gradient(theta.view());
        grad[k] *= theta[k];
        if cost < best.borrow().0 {
            *best.borrow_mut() = (cost, x.clone());
        }
        (cost, grad)
    };

    let (optimum, iterations) = match Bfgs::new(x0, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run()
    {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => {
            log::debug!(
                "BFGS finished after {} iterations with value {:.6}",
                iterations,
                final_value
            );
            (final_point, Some(iterations))
        }
        Err(e) => (internal::recover_best_point(best.borrow().clone(), &e)?, None),
    };

    let (mode, refinement_steps) =
        internal::refine_mode(model, internal::to_natural(&optimum, k));
    internal::accept_mode(model, mode.view())?;

    let hessian = internal::numerical_hessian(model, mode.view());
    let (covariance, covariance_factor) = internal::invert_hessian(&hessian)?;

    let log_posterior = -model.neg_log_posterior(mode.view());
    let evaluations = evaluations.get();
    log::info!(
        "{} model converged: log posterior {:.4}, {} objective evaluations, {} refinement steps.",
        model.kind(),
        log_posterior,
        evaluations,
        refinement_steps
    );

    Ok(QuadraticApproximation {
        kind: model.kind(),
        names: model.layout().names.clone(),
        mode,
        hessian,
        covariance,
        log_posterior,
        iterations,
        evaluations,
        refinement_steps,
        covariance_factor,
    })
}

/// Multiplier `z` such that `mean ± z·sd` holds `width` of a normal's mass.
pub fn interval_multiplier(width: f64) -> Result<f64, FitError> {
    if !(width > 0.0 && width < 1.0) {
        return Err(FitError::InvalidWidth(width));
    }
    standard_normal_quantile(0.5 * (1.0 + width)).map_err(|_| FitError::InvalidWidth(width))
}

/// Inverse CDF of the standard normal (Acklam's rational approximation,
/// relative error below 1.2e-9).
pub fn standard_normal_quantile(p: f64) -> Result<f64, String> {
    if !(p.is_finite() && p > 0.0 && p < 1.0) {
        return Err(format!("normal quantile requires p in (0,1), got {p}"));
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    let x = if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    };
    Ok(x)
}

mod internal {
    use super::*;

    pub(super) fn to_natural(x: &Array1<f64>, sigma_index: usize) -> Array1<f64> {
        let mut theta = x.clone();
        theta[sigma_index] = x[sigma_index]
            .clamp(LOG_SIGMA_BOUNDS.0, LOG_SIGMA_BOUNDS.1)
            .exp();
        theta
    }

    pub(super) fn starting_point(
        model: &GaussianLinearModel,
        options: &FitOptions,
        rng: &mut StdRng,
    ) -> Result<Array1<f64>, FitError> {
        let priors = model.priors();
        let coefficient_prior = Normal::new(0.0, priors.coefficient_sd)
            .map_err(|e| FitError::InvalidPrior(e.to_string()))?;
        let scale_prior =
            Exp::new(priors.sigma_rate).map_err(|e| FitError::InvalidPrior(e.to_string()))?;

        let mut start = Array1::zeros(model.layout().total());
        for block in &model.layout().blocks {
            let mut target = start.slice_mut(s![block.range.clone()]);
            match block.kind {
                BlockKind::SplineWeights => {
                    if let Some(weights) = &options.spline_start {
                        if weights.len() != block.range.len() {
                            return Err(FitError::StartLengthMismatch {
                                found: weights.len(),
                                expected: block.range.len(),
                            });
                        }
                        target.assign(weights);
                    }
                }
                BlockKind::ResidualScale => {
                    target.fill(scale_prior.sample(rng));
                }
                BlockKind::CategoryIntercepts | BlockKind::Intercept | BlockKind::Slope => {
                    target.mapv_inplace(|_| coefficient_prior.sample(rng));
                }
            }
        }
        Ok(start)
    }

    /// Falls back to the lowest-cost point BFGS evaluated before failing.
    pub(super) fn recover_best_point(
        best: (f64, Array1<f64>),
        error: &impl std::fmt::Debug,
    ) -> Result<Array1<f64>, FitError> {
        let (best_cost, best_point) = best;
        if !best_cost.is_finite() {
            return Err(FitError::OptimizationFailed(format!("{error:?}")));
        }
        log::warn!(
            "BFGS stopped early ({:?}); refining from the best point seen (value {:.6}).",
            error,
            best_cost
        );
        Ok(best_point)
    }

    /// The mode must be finite with every gradient component within acceptance.
    pub(super) fn accept_mode(model: &GaussianLinearModel, mode: ArrayView1<f64>) -> Result<(), FitError> {
        if mode.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFiniteMode);
        }
        let gradient_norm = model
            .gradient(mode)
            .iter()
            .fold(0.0f64, |acc, g| acc.max(g.abs()));
        if !(gradient_norm <= GRADIENT_ACCEPTANCE) {
            return Err(FitError::NotConverged {
                gradient_norm,
                acceptance: GRADIENT_ACCEPTANCE,
            });
        }
        Ok(())
    }

    /// Covariance `H^-1` and its lower Cholesky factor. `H` must be positive definite.
    pub(super) fn invert_hessian(hessian: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>), FitError> {
        hessian
            .cholesky(UPLO::Lower)
            .map_err(|e| FitError::SingularHessian(e.to_string()))?;
        let mut covariance = hessian
            .invc()
            .map_err(|e| FitError::SingularHessian(e.to_string()))?;
        symmetrize(&mut covariance);
        let factor = covariance
            .cholesky(UPLO::Lower)
            .map_err(|e| FitError::SingularHessian(e.to_string()))?;
        Ok((covariance, factor))
    }

    /// Damped Newton steps with the analytic Hessian. Each step must lower the
    /// cost and keep sigma positive; refinement stops at the first step that
    /// cannot.
    pub(super) fn refine_mode(model: &GaussianLinearModel, mut theta: Array1<f64>) -> (Array1<f64>, usize) {
        let k = model.layout().sigma_index();
        let mut cost = model.neg_log_posterior(theta.view());
        let mut steps = 0;
        for _ in 0..MAX_REFINEMENT_STEPS {
            let grad = model.gradient(theta.view());
            if grad.iter().all(|g| g.abs() <= GRADIENT_ACCEPTANCE * 1e-3) {
                break;
            }
            let direction = match model.analytic_hessian(theta.view()).solve(&grad) {
                Ok(d) if d.iter().all(|v| v.is_finite()) => d,
                _ => break,
            };

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..30 {
                let candidate = &theta - &(&direction * step);
                if candidate[k] > 0.0 {
                    let candidate_cost = model.neg_log_posterior(candidate.view());
                    if candidate_cost <= cost {
                        accepted = Some((candidate, candidate_cost));
                        break;
                    }
                }
                step *= 0.5;
            }
            match accepted {
                Some((candidate, candidate_cost)) => {
                    theta = candidate;
                    cost = candidate_cost;
                    steps += 1;
                }
                None => break,
            }
        }
        (theta, steps)
    }

    /// Central differences of the analytic gradient, symmetrized.
    pub(super) fn numerical_hessian(model: &GaussianLinearModel, theta: ArrayView1<f64>) -> Array2<f64> {
        let p = theta.len();
        let k = model.layout().sigma_index();
        let mut hessian = Array2::zeros((p, p));
        for j in 0..p {
            let mut h = 1e-5 * theta[j].abs().max(1.0);
            if j == k {
                h = h.min(0.5 * theta[k]);
            }
            let mut plus = theta.to_owned();
            let mut minus = theta.to_owned();
            plus[j] += h;
            minus[j] -= h;
            let column = (model.gradient(plus.view()) - model.gradient(minus.view())) / (2.0 * h);
            hessian.column_mut(j).assign(&column);
        }
        symmetrize(&mut hessian);
        hessian
    }

    pub(super) fn symmetrize(matrix: &mut Array2<f64>) {
        let transposed = matrix.t().to_owned();
        *matrix += &transposed;
        *matrix *= 0.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorConfig;
    use crate::model::test_support::{synthetic_basis, synthetic_data};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn fitted(kind: ModelKind, seed: u64) -> (GaussianLinearModel, QuadraticApproximation) {
        let data = synthetic_data(120);
        let basis = synthetic_basis(&data, 8);
        let priors = PriorConfig::default();
        let model = match kind {
            ModelKind::Full => GaussianLinearModel::full(&data, &basis, &priors).unwrap(),
            ModelKind::Reduced => GaussianLinearModel::reduced(&data, &basis, &priors).unwrap(),
        };
        let options = FitOptions {
            seed,
            ..FitOptions::default()
        };
        let fit = fit_quadratic_approximation(&model, &options).unwrap();
        (model, fit)
    }

    #[test]
    fn test_normal_quantile_known_values() {
        assert_abs_diff_eq!(standard_normal_quantile(0.5).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(standard_normal_quantile(0.975).unwrap(), 1.959_963_985, epsilon = 1e-8);
        assert_abs_diff_eq!(standard_normal_quantile(0.965).unwrap(), 1.811_910_673, epsilon = 1e-8);
        assert_abs_diff_eq!(standard_normal_quantile(0.01).unwrap(), -2.326_347_874, epsilon = 1e-8);
        assert_abs_diff_eq!(
            standard_normal_quantile(0.2).unwrap(),
            -standard_normal_quantile(0.8).unwrap(),
            epsilon = 1e-12
        );
        assert!(standard_normal_quantile(0.0).is_err());
        assert!(standard_normal_quantile(1.0).is_err());
    }

    #[test]
    fn test_interval_multiplier_rejects_bad_widths() {
        assert!(matches!(interval_multiplier(0.0), Err(FitError::InvalidWidth(_))));
        assert!(matches!(interval_multiplier(1.0), Err(FitError::InvalidWidth(_))));
        assert!(matches!(interval_multiplier(f64::NAN), Err(FitError::InvalidWidth(_))));
        assert_abs_diff_eq!(interval_multiplier(0.93).unwrap(), 1.811_910_673, epsilon = 1e-8);
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let (_, first) = fitted(ModelKind::Full, 11);
        let (_, second) = fitted(ModelKind::Full, 11);
        assert_eq!(first.mode, second.mode);
        assert_eq!(first.covariance, second.covariance);
    }

    #[test]
    fn test_mode_does_not_depend_on_start() {
        let (_, first) = fitted(ModelKind::Reduced, 1);
        let (_, second) = fitted(ModelKind::Reduced, 2024);
        for (a, b) in first.mode.iter().zip(second.mode.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_mode_solves_the_ridge_equations() {
        // At the mode, beta = (X'X + sigma^2/sd^2 I)^-1 X'y for the modal sigma.
        let (model, fit) = fitted(ModelKind::Full, 11);
        let k = model.layout().sigma_index();
        let sigma = fit.mode[k];
        let x = model.design();
        let mut lhs = x.t().dot(&x);
        lhs.diag_mut().mapv_inplace(|v| v + sigma * sigma);
        let rhs = x.t().dot(&model.response());
        let beta = lhs.solve(&rhs).unwrap();
        for (a, b) in beta.iter().zip(fit.mode.slice(s![..k]).iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_numerical_hessian_matches_analytic() {
        let (model, fit) = fitted(ModelKind::Full, 11);
        let analytic = model.analytic_hessian(fit.mode.view());
        for (numeric, exact) in fit.hessian.iter().zip(analytic.iter()) {
            assert_abs_diff_eq!(*numeric, *exact, epsilon = 1e-4 * (1.0 + exact.abs()));
        }
    }

    #[test]
    fn test_summary_and_intervals_agree() {
        let (_, fit) = fitted(ModelKind::Full, 11);
        let rows = fit.summary(0.93).unwrap();
        assert_eq!(rows.len(), fit.num_parameters());
        let bt = rows.iter().find(|r| r.name == "bT").unwrap();
        let (lower, upper) = fit.credible_interval("bT", 0.93).unwrap();
        assert_abs_diff_eq!(bt.lower, lower, epsilon = 1e-12);
        assert_abs_diff_eq!(bt.upper, upper, epsilon = 1e-12);
        assert_abs_diff_eq!(bt.mean, fit.coefficient("bT").unwrap(), epsilon = 1e-12);
        assert_abs_diff_eq!(upper - bt.mean, 1.811_910_673 * bt.sd, epsilon = 1e-8);
        assert!(fit.coefficient("bT").unwrap() > 0.3);
        assert!(matches!(fit.coefficient("nope"), Err(FitError::UnknownParameter(_))));
        assert!(fit.summary(1.5).is_err());
    }

    #[test]
    fn test_samples_follow_the_approximation() {
        let (_, fit) = fitted(ModelKind::Reduced, 11);
        let mut rng = StdRng::seed_from_u64(7);
        let draws = fit.sample(20_000, &mut rng);
        assert_eq!(draws.shape(), &[20_000, fit.num_parameters()]);
        let means = draws.mean_axis(Axis(0)).unwrap();
        let sds = fit.standard_errors();
        for j in 0..fit.num_parameters() {
            assert_abs_diff_eq!(means[j], fit.mode[j], epsilon = 4.0 * sds[j] / (20_000f64).sqrt() * 1.5);
            let column_sd = draws.column(j).std(1.0);
            assert_abs_diff_eq!(column_sd, sds[j], epsilon = 0.05 * sds[j]);
        }
    }

    #[test]
    fn test_spline_start_length_is_checked() {
        let data = synthetic_data(60);
        let basis = synthetic_basis(&data, 6);
        let model = GaussianLinearModel::reduced(&data, &basis, &PriorConfig::default()).unwrap();
        let options = FitOptions {
            spline_start: Some(Array1::zeros(3)),
            ..FitOptions::default()
        };
        match fit_quadratic_approximation(&model, &options).unwrap_err() {
            FitError::StartLengthMismatch { found, expected } => {
                assert_eq!(found, 3);
                assert_eq!(expected, basis.num_basis());
            }
            other => panic!("Expected StartLengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_overflowing_start_cost_is_rejected() {
        let mut data = synthetic_data(60);
        data.ozone.mapv_inplace(|v| 1e200 * (1.0 + v.abs()));
        let basis = synthetic_basis(&data, 6);
        let model = GaussianLinearModel::reduced(&data, &basis, &PriorConfig::default()).unwrap();
        match fit_quadratic_approximation(&model, &FitOptions::default()).unwrap_err() {
            FitError::NonFiniteStart(cost) => assert!(!cost.is_finite()),
            other => panic!("Expected NonFiniteStart, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_search_without_a_finite_point_is_an_error() {
        let point = array![0.5, -1.0];
        let recovered = internal::recover_best_point((3.0, point.clone()), &"line search failed").unwrap();
        assert_eq!(recovered, point);

        match internal::recover_best_point((f64::INFINITY, point), &"line search failed").unwrap_err() {
            FitError::OptimizationFailed(message) => assert!(message.contains("line search failed")),
            other => panic!("Expected OptimizationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_mode_acceptance() {
        let (model, fit) = fitted(ModelKind::Reduced, 11);
        assert!(internal::accept_mode(&model, fit.mode.view()).is_ok());

        let mut shifted = fit.mode.clone();
        shifted[0] += 1.0;
        match internal::accept_mode(&model, shifted.view()).unwrap_err() {
            FitError::NotConverged {
                gradient_norm,
                acceptance,
            } => assert!(gradient_norm > acceptance),
            other => panic!("Expected NotConverged, got {:?}", other),
        }

        let mut broken = fit.mode.clone();
        broken[1] = f64::NAN;
        assert!(matches!(
            internal::accept_mode(&model, broken.view()),
            Err(FitError::NonFiniteMode)
        ));
    }

    #[test]
    fn test_hessian_must_be_positive_definite() {
        let indefinite = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            internal::invert_hessian(&indefinite),
            Err(FitError::SingularHessian(_))
        ));
        let singular = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(matches!(
            internal::invert_hessian(&singular),
            Err(FitError::SingularHessian(_))
        ));

        let hessian = array![[4.0, 1.0], [1.0, 3.0]];
        let (covariance, factor) = internal::invert_hessian(&hessian).unwrap();
        let identity = hessian.dot(&covariance);
        assert_abs_diff_eq!(identity[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity[[0, 1]], 0.0, epsilon = 1e-12);
        let rebuilt = factor.dot(&factor.t());
        for (a, b) in rebuilt.iter().zip(covariance.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_optimizer_summary_reports_iterations() {
        let (_, fit) = fitted(ModelKind::Reduced, 11);
        let line = fit.optimizer_summary();
        assert!(line.contains("objective evaluations"));
        assert!(fit.evaluations > 0);
        if fit.iterations.is_some() {
            assert!(line.contains("BFGS iterations"));
        } else {
            assert!(line.contains("stopped early"));
        }
    }
}
