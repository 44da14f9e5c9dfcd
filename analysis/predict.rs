//! Posterior predictive mean intervals.
//!
//! Parameter draws from a [`QuadraticApproximation`] are pushed through the
//! model's design matrix, giving one mean response per draw and observation.
//! Percentile intervals of those draws form the band drawn in the report.

use crate::basis::quantile_sorted;
use crate::config::IntervalConfig;
use crate::estimate::QuadraticApproximation;
use crate::model::GaussianLinearModel;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Interval width must lie strictly between 0 and 1, got {0}.")]
    InvalidWidth(f64),
    #[error("At least one posterior sample is required.")]
    NoSamples,
    #[error("Length mismatch: {what} has {found} entries, expected {expected}.")]
    LengthMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },
}

/// Sampling settings for one predictive band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalSettings {
    pub width: f64,
    pub samples: usize,
    pub seed: u64,
}

impl IntervalSettings {
    pub fn new(config: &IntervalConfig, seed: u64) -> Self {
        Self {
            width: config.width,
            samples: config.samples,
            seed,
        }
    }
}

/// One observation of a predictive band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPoint {
    pub predictor: f64,
    pub observed: f64,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A predictive band, ordered by the predictor.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalBand {
    pub width: f64,
    pub points: Vec<BandPoint>,
}

impl IntervalBand {
    /// Share of observations lying inside their interval.
    pub fn observed_coverage(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let inside = self
            .points
            .iter()
            .filter(|p| p.observed >= p.lower && p.observed <= p.upper)
            .count();
        inside as f64 / self.points.len() as f64
    }
}

/// `samples x observations` matrix of posterior mean responses.
pub fn posterior_mean_draws(
    fit: &QuadraticApproximation,
    model: &GaussianLinearModel,
    n_samples: usize,
    seed: u64,
) -> Result<Array2<f64>, PredictError> {
    if n_samples == 0 {
        return Err(PredictError::NoSamples);
    }
    let layout = model.layout();
    if fit.num_parameters() != layout.total() {
        return Err(PredictError::LengthMismatch {
            what: "fitted parameter vector",
            found: fit.num_parameters(),
            expected: layout.total(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let draws = fit.sample(n_samples, &mut rng);
    let coefficients = draws.slice(s![.., ..layout.num_coefficients()]);
    Ok(coefficients.dot(&model.design().t()))
}

/// Column-wise type-7 percentile interval holding `width` of the samples.
pub fn percentile_interval(
    samples: ArrayView2<f64>,
    width: f64,
) -> Result<(Array1<f64>, Array1<f64>), PredictError> {
    if !(width > 0.0 && width < 1.0) {
        return Err(PredictError::InvalidWidth(width));
    }
    if samples.nrows() == 0 {
        return Err(PredictError::NoSamples);
    }
    let (p_low, p_high) = (0.5 * (1.0 - width), 0.5 * (1.0 + width));
    let mut lower = Array1::zeros(samples.ncols());
    let mut upper = Array1::zeros(samples.ncols());
    for (j, column) in samples.axis_iter(Axis(1)).enumerate() {
        let mut sorted = column.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        lower[j] = quantile_sorted(&sorted, p_low);
        upper[j] = quantile_sorted(&sorted, p_high);
    }
    Ok((lower, upper))
}

/// Posterior mean and percentile band for every observation, sorted by
/// `predictor`.
pub fn predictive_band(
    fit: &QuadraticApproximation,
    model: &GaussianLinearModel,
    predictor: ArrayView1<f64>,
    observed: ArrayView1<f64>,
    settings: &IntervalSettings,
) -> Result<IntervalBand, PredictError> {
    let n = model.num_observations();
    if predictor.len() != n {
        return Err(PredictError::LengthMismatch {
            what: "predictor",
            found: predictor.len(),
            expected: n,
        });
    }
    if observed.len() != n {
        return Err(PredictError::LengthMismatch {
            what: "observed response",
            found: observed.len(),
            expected: n,
        });
    }
    if !(settings.width > 0.0 && settings.width < 1.0) {
        return Err(PredictError::InvalidWidth(settings.width));
    }

    let draws = posterior_mean_draws(fit, model, settings.samples, settings.seed)?;
    let means = draws.mean_axis(Axis(0)).ok_or(PredictError::NoSamples)?;
    let (lower, upper) = percentile_interval(draws.view(), settings.width)?;

    let mut points: Vec<BandPoint> = (0..n)
        .map(|i| BandPoint {
            predictor: predictor[i],
            observed: observed[i],
            mean: means[i],
            lower: lower[i],
            upper: upper[i],
        })
        .collect();
    points.sort_by(|a, b| a.predictor.total_cmp(&b.predictor));

    let band = IntervalBand {
        width: settings.width,
        points,
    };
    log::debug!(
        "{} model band: {} draws, {:.1}% of observations inside",
        model.kind(),
        settings.samples,
        100.0 * band.observed_coverage()
    );
    Ok(band)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorConfig;
    use crate::estimate::{FitOptions, fit_quadratic_approximation};
    use crate::model::test_support::{synthetic_basis, synthetic_data};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn reduced_fit() -> (GaussianLinearModel, QuadraticApproximation, Array1<f64>) {
        let data = synthetic_data(90);
        let basis = synthetic_basis(&data, 7);
        let model = GaussianLinearModel::reduced(&data, &basis, &PriorConfig::default()).unwrap();
        let fit = fit_quadratic_approximation(&model, &FitOptions::default()).unwrap();
        (model, fit, data.day_of_year_values())
    }

    #[test]
    fn test_percentile_interval_type7() {
        let samples = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0], [5.0, 50.0]];
        let (lower, upper) = percentile_interval(samples.view(), 0.5).unwrap();
        assert_abs_diff_eq!(lower[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(upper[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lower[1], 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(upper[1], 40.0, epsilon = 1e-12);
    }

    #[test]
    fn test_percentile_interval_rejects_bad_input() {
        let samples = array![[1.0], [2.0]];
        assert!(matches!(
            percentile_interval(samples.view(), 1.0),
            Err(PredictError::InvalidWidth(_))
        ));
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            percentile_interval(empty.view(), 0.9),
            Err(PredictError::NoSamples)
        ));
    }

    #[test]
    fn test_mean_draws_shape_and_determinism() {
        let (model, fit, _) = reduced_fit();
        let first = posterior_mean_draws(&fit, &model, 200, 11).unwrap();
        let second = posterior_mean_draws(&fit, &model, 200, 11).unwrap();
        assert_eq!(first.shape(), &[200, 90]);
        assert_eq!(first, second);
        assert!(matches!(
            posterior_mean_draws(&fit, &model, 0, 11),
            Err(PredictError::NoSamples)
        ));
    }

    #[test]
    fn test_band_is_sorted_and_brackets_the_mean() {
        let (model, fit, doy) = reduced_fit();
        let reversed: Array1<f64> = doy.iter().rev().copied().collect();
        let response = model.response().to_owned();
        let reversed_response: Array1<f64> = response.iter().rev().copied().collect();
        let settings = IntervalSettings {
            width: 0.93,
            samples: 1000,
            seed: 11,
        };
        let band = predictive_band(&fit, &model, reversed.view(), reversed_response.view(), &settings)
            .unwrap();

        assert_eq!(band.points.len(), 90);
        for pair in band.points.windows(2) {
            assert!(pair[0].predictor <= pair[1].predictor);
        }
        let modal_mu = model.linear_predictor(fit.mode.view());
        for point in &band.points {
            assert!(point.lower <= point.mean && point.mean <= point.upper);
            // Unreversed row index of this predictor value.
            let row = point.predictor as usize - 1;
            assert_abs_diff_eq!(point.mean, modal_mu[row], epsilon = 0.05);
            assert_eq!(point.observed, response[row]);
        }
    }

    #[test]
    fn test_band_length_mismatch() {
        let (model, fit, doy) = reduced_fit();
        let short = doy.slice(s![..10]).to_owned();
        let settings = IntervalSettings::new(&IntervalConfig::default(), 11);
        match predictive_band(&fit, &model, short.view(), model.response(), &settings).unwrap_err() {
            PredictError::LengthMismatch { what, found, .. } => {
                assert_eq!(what, "predictor");
                assert_eq!(found, 10);
            }
            other => panic!("Expected LengthMismatch, got {:?}", other),
        }
    }
}
