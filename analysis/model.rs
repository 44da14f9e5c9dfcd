//! Model specifications for the two Gaussian regressions.
//!
//! Both models share the likelihood `ozone ~ Normal(mu, sigma)` and differ only
//! in the linear predictor. Each is expressed as a dense design matrix `X`
//! mapping the coefficient part of the parameter vector to `mu`, followed by a
//! single residual-scale parameter:
//!
//! ```text
//! theta = [ coefficients (X columns) ..., sigma ]
//! ```
//!
//! The per-day-of-week intercept `a[dow]` becomes seven indicator columns, so
//! the raw 1-7 code selects exactly one intercept per row.

use crate::basis::SplineBasis;
use crate::config::PriorConfig;
use crate::data::{AnalysisData, DAY_OF_WEEK_RANGE};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use std::f64::consts::PI;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Dimension mismatch: {what} has {found} rows but the response has {expected}.")]
    DimensionMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("Invalid prior setting: {0}")]
    InvalidPrior(String),
    #[error("Cannot build a model without observations.")]
    NoObservations,
}

/// Which of the two model specifications is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// `mu = a[dow] + bH * humidity + bT * temperature + B . w`
    Full,
    /// `mu = a + B . w`
    Reduced,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Full => "full",
            ModelKind::Reduced => "reduced",
        }
    }

    /// Human-readable statement of the model, used as a report heading.
    pub fn formula(&self) -> &'static str {
        match self {
            ModelKind::Full => {
                "mu = a[day_of_week] + bH * humidity + bT * temperature + B(day_of_year) . w"
            }
            ModelKind::Reduced => "mu = a + B(day_of_year) . w",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// One intercept per day-of-week level.
    CategoryIntercepts,
    Intercept,
    Slope,
    SplineWeights,
    ResidualScale,
}

/// A named, contiguous run of parameters.
#[derive(Debug, Clone)]
pub struct ParameterBlock {
    pub name: String,
    pub kind: BlockKind,
    pub range: Range<usize>,
}

/// The canonical order of parameters in `theta`, with their display names.
#[derive(Debug, Clone, Default)]
pub struct ParameterLayout {
    pub blocks: Vec<ParameterBlock>,
    pub names: Vec<String>,
}

impl ParameterLayout {
    fn push_block(&mut self, name: &str, kind: BlockKind, len: usize) {
        let start = self.names.len();
        if len == 1 {
            self.names.push(name.to_string());
        } else {
            self.names.extend((1..=len).map(|i| format!("{name}[{i}]")));
        }
        self.blocks.push(ParameterBlock {
            name: name.to_string(),
            kind,
            range: start..start + len,
        });
    }

    /// Total number of parameters, sigma included.
    pub fn total(&self) -> usize {
        self.names.len()
    }

    /// Number of coefficients multiplying design-matrix columns.
    pub fn num_coefficients(&self) -> usize {
        self.total() - 1
    }

    /// Position of the residual scale; always the last parameter.
    pub fn sigma_index(&self) -> usize {
        self.total() - 1
    }

    pub fn block(&self, name: &str) -> Option<&ParameterBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn index_of(&self, parameter: &str) -> Option<usize> {
        self.names.iter().position(|n| n == parameter)
    }
}

/// A Gaussian linear model with independent normal priors on the
/// coefficients and an exponential prior on the residual scale.
#[derive(Debug, Clone)]
pub struct GaussianLinearModel {
    kind: ModelKind,
    response: Array1<f64>,
    design: Array2<f64>,
    layout: ParameterLayout,
    priors: PriorConfig,
}

impl GaussianLinearModel {
    /// `ozone ~ Normal(a[dow] + bH * H + bT * T + B . w, sigma)`.
    pub fn full(
        data: &AnalysisData,
        basis: &SplineBasis,
        priors: &PriorConfig,
    ) -> Result<Self, ModelError> {
        let n = data.len();
        check_rows("humidity", data.humidity.len(), n)?;
        check_rows("temperature", data.temperature.len(), n)?;
        check_rows("day_of_week", data.day_of_week.len(), n)?;
        check_rows("spline basis", basis.matrix.nrows(), n)?;

        let levels = *DAY_OF_WEEK_RANGE.end();
        let m = basis.num_basis();
        let mut design = Array2::zeros((n, levels + 2 + m));
        for (i, &dow) in data.day_of_week.iter().enumerate() {
            design[[i, dow - 1]] = 1.0;
        }
        design.column_mut(levels).assign(&data.humidity);
        design.column_mut(levels + 1).assign(&data.temperature);
        design.slice_mut(s![.., levels + 2..]).assign(&basis.matrix);

        let mut layout = ParameterLayout::default();
        layout.push_block("a", BlockKind::CategoryIntercepts, levels);
        layout.push_block("bH", BlockKind::Slope, 1);
        layout.push_block("bT", BlockKind::Slope, 1);
        layout.push_block("w", BlockKind::SplineWeights, m);
        layout.push_block("sigma", BlockKind::ResidualScale, 1);

        Self::new(ModelKind::Full, data.ozone.clone(), design, layout, priors)
    }

    /// `ozone ~ Normal(a + B . w, sigma)`.
    pub fn reduced(
        data: &AnalysisData,
        basis: &SplineBasis,
        priors: &PriorConfig,
    ) -> Result<Self, ModelError> {
        let n = data.len();
        check_rows("spline basis", basis.matrix.nrows(), n)?;

        let m = basis.num_basis();
        let mut design = Array2::zeros((n, 1 + m));
        design.column_mut(0).fill(1.0);
        design.slice_mut(s![.., 1..]).assign(&basis.matrix);

        let mut layout = ParameterLayout::default();
        layout.push_block("a", BlockKind::Intercept, 1);
        layout.push_block("w", BlockKind::SplineWeights, m);
        layout.push_block("sigma", BlockKind::ResidualScale, 1);

        Self::new(ModelKind::Reduced, data.ozone.clone(), design, layout, priors)
    }

    fn new(
        kind: ModelKind,
        response: Array1<f64>,
        design: Array2<f64>,
        layout: ParameterLayout,
        priors: &PriorConfig,
    ) -> Result<Self, ModelError> {
        if response.is_empty() {
            return Err(ModelError::NoObservations);
        }
        if !(priors.coefficient_sd.is_finite() && priors.coefficient_sd > 0.0) {
            return Err(ModelError::InvalidPrior(format!(
                "coefficient sd must be positive, got {}",
                priors.coefficient_sd
            )));
        }
        if !(priors.sigma_rate.is_finite() && priors.sigma_rate > 0.0) {
            return Err(ModelError::InvalidPrior(format!(
                "sigma rate must be positive, got {}",
                priors.sigma_rate
            )));
        }
        debug_assert_eq!(design.ncols(), layout.num_coefficients());

        log::debug!(
            "Built {} model: {} observations, {} parameters",
            kind,
            response.len(),
            layout.total()
        );
        Ok(Self {
            kind,
            response,
            design,
            layout,
            priors: priors.clone(),
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn design(&self) -> ArrayView2<'_, f64> {
        self.design.view()
    }

    pub fn response(&self) -> ArrayView1<'_, f64> {
        self.response.view()
    }

    pub fn priors(&self) -> &PriorConfig {
        &self.priors
    }

    pub fn num_observations(&self) -> usize {
        self.response.len()
    }

    /// `mu = X . beta` for the coefficient part of `theta`.
    pub fn linear_predictor(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        let beta = theta.slice(s![..self.layout.num_coefficients()]);
        self.design.dot(&beta)
    }

    fn residuals(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        &self.response - &self.linear_predictor(theta)
    }

    /// Negative log posterior density (up to nothing: all normalizing
    /// constants of likelihood and priors are included). Infinite for
    /// `sigma <= 0`.
    pub fn neg_log_posterior(&self, theta: ArrayView1<f64>) -> f64 {
        let sigma = theta[self.layout.sigma_index()];
        if !(sigma > 0.0) {
            return f64::INFINITY;
        }
        let n = self.num_observations() as f64;
        let p = self.layout.num_coefficients() as f64;
        let sd = self.priors.coefficient_sd;
        let rate = self.priors.sigma_rate;
        let half_log_two_pi = 0.5 * (2.0 * PI).ln();

        let resid = self.residuals(theta);
        let rss = resid.dot(&resid);
        let beta = theta.slice(s![..self.layout.num_coefficients()]);

        let likelihood = n * (half_log_two_pi + sigma.ln()) + rss / (2.0 * sigma * sigma);
        let coefficient_prior = beta.dot(&beta) / (2.0 * sd * sd) + p * (half_log_two_pi + sd.ln());
        let scale_prior = rate * sigma - rate.ln();
        likelihood + coefficient_prior + scale_prior
    }

    /// Gradient of [`Self::neg_log_posterior`] with respect to `theta`.
    pub fn gradient(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        let k = self.layout.num_coefficients();
        let sigma = theta[k];
        let sd2 = self.priors.coefficient_sd.powi(2);
        let n = self.num_observations() as f64;

        let resid = self.residuals(theta);
        let rss = resid.dot(&resid);

        let mut grad = Array1::zeros(k + 1);
        let beta = theta.slice(s![..k]);
        let grad_beta = -self.design.t().dot(&resid) / (sigma * sigma) + &beta / sd2;
        grad.slice_mut(s![..k]).assign(&grad_beta);
        grad[k] = n / sigma - rss / sigma.powi(3) + self.priors.sigma_rate;
        grad
    }

    /// Exact Hessian of [`Self::neg_log_posterior`] on the natural scale.
    pub fn analytic_hessian(&self, theta: ArrayView1<f64>) -> Array2<f64> {
        let k = self.layout.num_coefficients();
        let sigma = theta[k];
        let sd2 = self.priors.coefficient_sd.powi(2);
        let n = self.num_observations() as f64;

        let resid = self.residuals(theta);
        let rss = resid.dot(&resid);

        let mut hessian = Array2::zeros((k + 1, k + 1));
        let mut beta_block = self.design.t().dot(&self.design) / (sigma * sigma);
        beta_block.diag_mut().mapv_inplace(|v| v + 1.0 / sd2);
        hessian.slice_mut(s![..k, ..k]).assign(&beta_block);

        let cross = self.design.t().dot(&resid) * (2.0 / sigma.powi(3));
        hessian.slice_mut(s![..k, k]).assign(&cross);
        hessian.slice_mut(s![k, ..k]).assign(&cross);
        hessian[[k, k]] = -n / (sigma * sigma) + 3.0 * rss / sigma.powi(4);
        hessian
    }
}

fn check_rows(what: &'static str, found: usize, expected: usize) -> Result<(), ModelError> {
    if found != expected {
        return Err(ModelError::DimensionMismatch {
            what,
            found,
            expected,
        });
    }
    Ok(())
}
