//! Descriptive statistics for the exploratory half of the report.

use crate::basis::quantile_sorted;
use ndarray::{Array2, ArrayView1};
use std::f64::consts::PI;
use std::ops::RangeInclusive;

/// Per-column summary in the style of R's `summary()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub missing: usize,
    /// Statistics over the defined values; `None` when the column has none.
    pub stats: Option<FiveNumberSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiveNumberSummary {
    pub mean: f64,
    /// Sample sd; NaN for a single value.
    pub sd: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxplotStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    /// Most extreme values within 1.5 IQR of the box.
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub outliers: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityEstimate {
    pub bandwidth: f64,
    pub grid: Vec<f64>,
    pub density: Vec<f64>,
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

pub fn summarize_column(name: &str, values: &[Option<f64>]) -> ColumnSummary {
    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    let stats = if defined.is_empty() {
        None
    } else {
        let sorted = sorted_copy(&defined);
        let (mean, sd) = mean_and_sd(&defined);
        Some(FiveNumberSummary {
            mean,
            sd,
            min: sorted[0],
            q1: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            q3: quantile_sorted(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
        })
    };
    ColumnSummary {
        name: name.to_string(),
        count: defined.len(),
        missing: values.len() - defined.len(),
        stats,
    }
}

/// Tukey boxplot statistics. `None` for an empty sample.
pub fn boxplot_stats(values: &[f64]) -> Option<BoxplotStats> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted_copy(values);
    let q1 = quantile_sorted(&sorted, 0.25);
    let median = quantile_sorted(&sorted, 0.5);
    let q3 = quantile_sorted(&sorted, 0.75);
    let reach = 1.5 * (q3 - q1);
    let (fence_low, fence_high) = (q1 - reach, q3 + reach);

    let inside: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| *v >= fence_low && *v <= fence_high)
        .collect();
    let outliers = sorted
        .iter()
        .copied()
        .filter(|v| *v < fence_low || *v > fence_high)
        .collect();

    Some(BoxplotStats {
        q1,
        median,
        q3,
        whisker_low: inside.first().copied().unwrap_or(q1),
        whisker_high: inside.last().copied().unwrap_or(q3),
        outliers,
    })
}

/// Silverman's rule-of-thumb bandwidth (`bw.nrd0`).
pub fn rule_of_thumb_bandwidth(values: &[f64]) -> f64 {
    let sorted = sorted_copy(values);
    let sd = mean_and_sd(values).1;
    let iqr = quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25);
    let mut spread = sd.min(iqr / 1.34);
    if !(spread > 0.0) {
        spread = if sd > 0.0 {
            sd
        } else if sorted[0] != 0.0 {
            sorted[0].abs()
        } else {
            1.0
        };
    }
    0.9 * spread * (values.len() as f64).powf(-0.2)
}

/// Gaussian kernel density on an even grid over `[min - 3h, max + 3h]`.
/// `None` when fewer than two values or fewer than two grid points.
pub fn kernel_density(values: &[f64], grid_size: usize) -> Option<DensityEstimate> {
    if values.len() < 2 || grid_size < 2 {
        return None;
    }
    let bandwidth = rule_of_thumb_bandwidth(values);
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min) - 3.0 * bandwidth;
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max) + 3.0 * bandwidth;
    let step = (hi - lo) / (grid_size - 1) as f64;
    let norm = 1.0 / (values.len() as f64 * bandwidth * (2.0 * PI).sqrt());

    let grid: Vec<f64> = (0..grid_size).map(|i| lo + step * i as f64).collect();
    let density = grid
        .iter()
        .map(|&g| {
            norm * values
                .iter()
                .map(|&v| (-0.5 * ((g - v) / bandwidth).powi(2)).exp())
                .sum::<f64>()
        })
        .collect();
    Some(DensityEstimate {
        bandwidth,
        grid,
        density,
    })
}

/// Pearson correlations between equally long columns. Entries involving a
/// constant column are NaN.
pub fn correlation_matrix(columns: &[ArrayView1<f64>]) -> Array2<f64> {
    let p = columns.len();
    let centered: Vec<_> = columns
        .iter()
        .map(|c| {
            let mean = c.mean().unwrap_or(0.0);
            c.mapv(|v| v - mean)
        })
        .collect();
    let mut corr = Array2::zeros((p, p));
    for i in 0..p {
        for j in i..p {
            let cov = centered[i].dot(&centered[j]);
            let denom = (centered[i].dot(&centered[i]) * centered[j].dot(&centered[j])).sqrt();
            let r = if denom > 0.0 { cov / denom } else { f64::NAN };
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

/// Splits `values` by category code, one group per level in `levels`
/// (empty groups included).
pub fn group_by_category(
    values: ArrayView1<f64>,
    codes: ArrayView1<usize>,
    levels: RangeInclusive<usize>,
) -> Vec<(usize, Vec<f64>)> {
    let mut groups: Vec<(usize, Vec<f64>)> = levels.map(|level| (level, Vec::new())).collect();
    for (&value, &code) in values.iter().zip(codes.iter()) {
        if let Some((_, group)) = groups.iter_mut().find(|(level, _)| *level == code) {
            group.push(value);
        }
    }
    groups
}
