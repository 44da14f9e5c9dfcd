use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use thiserror::Error;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error(
        "At least 2 quantile knots are required to place the boundary knots, but {0} were requested."
    )]
    TooFewKnots(usize),

    #[error("Cannot build a spline basis over an empty predictor.")]
    EmptyData,

    #[error("The predictor contains a non-finite value ({0}).")]
    NonFiniteData(f64),

    #[error("Boundary knots are invalid: lower ({0}) must be strictly less than upper ({1}).")]
    InvalidRange(f64, f64),

    #[error(
        "Knot positions collapsed: knot {position} ({value}) does not exceed the knot before it. The predictor has too many ties for {requested} knots."
    )]
    CollapsedKnots {
        position: usize,
        value: f64,
        requested: usize,
    },

    #[error("Value {value} lies outside the basis boundary [{lower}, {upper}].")]
    OutOfRange { value: f64, lower: f64, upper: f64 },
}

/// A clamped B-spline basis evaluated over one predictor, together with the
/// knots that define it. The knots are fixed at construction; every model that
/// uses the basis sees exactly the same columns.
#[derive(Debug, Clone)]
pub struct SplineBasis {
    /// Basis matrix with shape `[n_observations, num_basis]`.
    pub matrix: Array2<f64>,
    /// Knots strictly between the boundaries.
    pub interior_knots: Array1<f64>,
    /// `(lower, upper)` boundary knots, the range of the predictor.
    pub boundary_knots: (f64, f64),
    pub degree: usize,
    knot_vector: Array1<f64>,
}

impl SplineBasis {
    /// Number of basis functions (columns), `interior + degree + 1`.
    pub fn num_basis(&self) -> usize {
        self.matrix.ncols()
    }

    /// The full knot vector including the `degree + 1` repeated boundary knots.
    pub fn knot_vector(&self) -> ArrayView1<'_, f64> {
        self.knot_vector.view()
    }

    /// Evaluates the same basis at new points, which must lie inside the boundary knots.
    pub fn evaluate(&self, x: ArrayView1<f64>) -> Result<Array2<f64>, BasisError> {
        internal::check_inside(x, self.boundary_knots)?;
        Ok(internal::basis_matrix(x, self.degree, self.knot_vector.view()))
    }
}

/// Computes `knot_count` quantiles of `x` at evenly spaced probabilities
/// `0, 1/(k-1), ..., 1`, using linear interpolation (Type 7 in R).
///
/// The first and last entries are the minimum and maximum of `x`.
pub fn quantile_knots(x: ArrayView1<f64>, knot_count: usize) -> Result<Array1<f64>, BasisError> {
    if knot_count < 2 {
        return Err(BasisError::TooFewKnots(knot_count));
    }
    internal::check_data(x)?;

    let mut sorted = x.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let denom = (knot_count - 1) as f64;
    Ok((0..knot_count)
        .map(|i| quantile_sorted(&sorted, i as f64 / denom))
        .collect())
}

/// Builds a B-spline basis over `x` with knots placed at its quantiles.
///
/// `knot_count` quantiles are computed; the first and last become the boundary
/// knots and the remaining `knot_count - 2` are the interior knots. The basis
/// includes the intercept column, so it has `(knot_count - 2) + degree + 1`
/// columns and every row sums to one.
///
/// # Errors
/// Fails when `degree < 1`, `knot_count < 2`, the data is empty or non-finite,
/// or when ties in `x` make two knots coincide.
pub fn build_quantile_basis(
    x: ArrayView1<f64>,
    knot_count: usize,
    degree: usize,
) -> Result<SplineBasis, BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }

    let knots = quantile_knots(x, knot_count)?;
    for position in 1..knots.len() {
        if knots[position] <= knots[position - 1] {
            return Err(BasisError::CollapsedKnots {
                position,
                value: knots[position],
                requested: knot_count,
            });
        }
    }

    let interior = knots.slice(s![1..knot_count - 1]).to_owned();
    let boundary = (knots[0], knots[knot_count - 1]);
    let (matrix, knot_vector) = create_bspline_basis(x, interior.view(), boundary, degree)?;

    log::debug!(
        "Built degree-{} B-spline basis: {} rows, {} columns, interior knots {:?}",
        degree,
        matrix.nrows(),
        matrix.ncols(),
        interior.to_vec()
    );

    Ok(SplineBasis {
        matrix,
        interior_knots: interior,
        boundary_knots: boundary,
        degree,
        knot_vector,
    })
}

/// Creates a B-spline basis expansion matrix and its corresponding knot vector.
///
/// The knot vector is clamped: `degree + 1` copies of each boundary knot
/// surround the interior knots. Evaluation uses de Boor's triangular scheme
/// of the Cox-de Boor recurrence, one point at a time.
///
/// # Returns
/// 1. The basis matrix, with shape `[data.len(), interior_knots.len() + degree + 1]`.
/// 2. The full knot vector.
pub fn create_bspline_basis(
    data: ArrayView1<f64>,
    interior_knots: ArrayView1<f64>,
    boundary: (f64, f64),
    degree: usize,
) -> Result<(Array2<f64>, Array1<f64>), BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    if !(boundary.0 < boundary.1) {
        return Err(BasisError::InvalidRange(boundary.0, boundary.1));
    }
    internal::check_data(data)?;
    internal::check_inside(data, boundary)?;

    let mut previous = boundary.0;
    for (i, &knot) in interior_knots.iter().enumerate() {
        if knot <= previous || knot >= boundary.1 {
            return Err(BasisError::CollapsedKnots {
                position: i + 1,
                value: knot,
                requested: interior_knots.len() + 2,
            });
        }
        previous = knot;
    }

    let knot_vector = internal::clamped_knot_vector(interior_knots, boundary, degree);
    let matrix = internal::basis_matrix(data, degree, knot_vector.view());
    Ok((matrix, knot_vector))
}

/// Linear-interpolation quantile (Type 7) of already sorted data.
pub(crate) fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(n - 1);
    let fraction = h - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    pub(super) fn check_data(data: ArrayView1<f64>) -> Result<(), BasisError> {
        if data.is_empty() {
            return Err(BasisError::EmptyData);
        }
        if let Some(&bad) = data.iter().find(|v| !v.is_finite()) {
            return Err(BasisError::NonFiniteData(bad));
        }
        Ok(())
    }

    pub(super) fn check_inside(data: ArrayView1<f64>, boundary: (f64, f64)) -> Result<(), BasisError> {
        match data.iter().find(|&&v| v < boundary.0 || v > boundary.1) {
            Some(&value) => Err(BasisError::OutOfRange {
                value,
                lower: boundary.0,
                upper: boundary.1,
            }),
            None => Ok(()),
        }
    }

    pub(super) fn clamped_knot_vector(
        interior_knots: ArrayView1<f64>,
        boundary: (f64, f64),
        degree: usize,
    ) -> Array1<f64> {
        let mut knots = Vec::with_capacity(interior_knots.len() + 2 * (degree + 1));
        knots.extend(std::iter::repeat_n(boundary.0, degree + 1));
        knots.extend(interior_knots.iter().copied());
        knots.extend(std::iter::repeat_n(boundary.1, degree + 1));
        Array1::from_vec(knots)
    }

    pub(super) fn basis_matrix(data: ArrayView1<f64>, degree: usize, knots: ArrayView1<f64>) -> Array2<f64> {
        let num_basis = knots.len() - degree - 1;
        let mut matrix = Array2::zeros((data.len(), num_basis));
        for (mut row, &x) in matrix.axis_iter_mut(Axis(0)).zip(data.iter()) {
            row.assign(&evaluate_splines_at_point(x, degree, knots));
        }
        matrix
    }

    /// Evaluates all B-spline basis functions at a single point `x`.
    ///
    /// Only the `degree + 1` functions supported on the knot span containing
    /// `x` are non-zero; they are built up degree by degree from the constant
    /// spline on that span.
    pub(super) fn evaluate_splines_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
    ) -> Array1<f64> {
        let num_basis = knots.len() - degree - 1;

        // Span `mu` with knots[mu] <= x < knots[mu + 1]; the upper boundary
        // belongs to the last non-empty span.
        let mu = if x >= knots[num_basis] {
            num_basis - 1
        } else {
            knots
                .iter()
                .rposition(|&k| k <= x)
                .map_or(degree, |pos| pos.clamp(degree, num_basis - 1))
        };

        let mut values = vec![0.0; degree + 1];
        let mut left = vec![0.0; degree + 1];
        let mut right = vec![0.0; degree + 1];
        values[0] = 1.0;

        for j in 1..=degree {
            left[j] = x - knots[mu + 1 - j];
            right[j] = knots[mu + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom.abs() > 1e-12 {
                    values[r] / denom
                } else {
                    0.0
                };
                values[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            values[j] = saved;
        }

        let mut basis_values = Array1::zeros(num_basis);
        let start = mu - degree;
        for (offset, value) in values.into_iter().enumerate() {
            basis_values[start + offset] = value;
        }
        basis_values
    }
}
