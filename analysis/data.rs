//! # Data Loading and Preprocessing Module
//!
//! This module is the only entry point for user-provided data. It reads the
//! daily observation table (CSV), validates the five required columns, and
//! turns them into the `ndarray` structures used by the rest of the analysis.
//!
//! - Missing cells are kept as `None` while loading; they are dropped only
//!   after standardization, so the scaling of each continuous column is
//!   computed over every defined value of that column.
//! - Malformed input (non-numeric text, non-finite numbers, impossible
//!   category codes, zero variance) is reported as a `DataError` and never
//!   silently turned into NaN.

use crate::config::ColumnNames;
use ndarray::Array1;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;

/// Valid day-of-week codes.
pub const DAY_OF_WEEK_RANGE: RangeInclusive<usize> = 1..=7;
/// Valid day-of-year codes.
pub const DAY_OF_YEAR_RANGE: RangeInclusive<usize> = 1..=366;

/// A comprehensive error type for all data loading and preprocessing failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. Use an empty cell for a missing value."
    )]
    NonFiniteValuesFound(String),
    #[error("The input file contains a header but no data rows.")]
    EmptyTable,
    #[error(
        "Column '{0}' has zero variance or fewer than two defined values, so it cannot be standardized."
    )]
    DegenerateVariance(String),
    #[error(
        "Column '{column_name}' holds {value}, which is not an integer code in {min}..={max}."
    )]
    InvalidCategory {
        column_name: String,
        value: f64,
        min: usize,
        max: usize,
    },
    #[error("No row has a complete set of values for the required columns.")]
    NoCompleteRows,
}

/// The observation table as read from disk: one entry per day and column,
/// `None` where the cell was empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub ozone: Vec<Option<f64>>,
    pub humidity: Vec<Option<f64>>,
    pub temperature: Vec<Option<f64>>,
    pub day_of_week: Vec<Option<f64>>,
    pub day_of_year: Vec<Option<f64>>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.ozone.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ozone.is_empty()
    }

    fn row_is_complete(&self, i: usize) -> bool {
        self.ozone[i].is_some()
            && self.humidity[i].is_some()
            && self.temperature[i].is_some()
            && self.day_of_week[i].is_some()
            && self.day_of_year[i].is_some()
    }

    /// True when no required cell is missing.
    pub fn is_complete(&self) -> bool {
        (0..self.len()).all(|i| self.row_is_complete(i))
    }

    /// Number of rows with at least one missing required cell.
    pub fn incomplete_count(&self) -> usize {
        (0..self.len()).filter(|&i| !self.row_is_complete(i)).count()
    }

    /// Keeps only rows where all five required fields are defined, preserving
    /// row order. Applying it to a complete table returns an identical table.
    pub fn complete_rows(&self) -> RawTable {
        let keep: Vec<usize> = (0..self.len()).filter(|&i| self.row_is_complete(i)).collect();
        let pick = |column: &[Option<f64>]| keep.iter().map(|&i| column[i]).collect::<Vec<_>>();
        RawTable {
            ozone: pick(&self.ozone),
            humidity: pick(&self.humidity),
            temperature: pick(&self.temperature),
            day_of_week: pick(&self.day_of_week),
            day_of_year: pick(&self.day_of_year),
        }
    }
}

/// Centering and scaling applied to one continuous column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub center: f64,
    pub scale: f64,
}

impl Scaling {
    /// Maps a standardized value back to the original units.
    pub fn restore(&self, z: f64) -> f64 {
        z * self.scale + self.center
    }

    /// Maps a value in original units onto the standardized scale.
    pub fn apply(&self, x: f64) -> f64 {
        (x - self.center) / self.scale
    }
}

/// A continuous column rescaled to zero mean and unit variance.
#[derive(Debug, Clone)]
pub struct StandardizedColumn {
    pub values: Vec<Option<f64>>,
    pub scaling: Scaling,
}

/// Complete, standardized rows ready for modelling.
#[derive(Debug, Clone)]
pub struct AnalysisData {
    /// Standardized ozone (the response).
    pub ozone: Array1<f64>,
    /// Standardized humidity.
    pub humidity: Array1<f64>,
    /// Standardized temperature.
    pub temperature: Array1<f64>,
    /// Day-of-week code, 1..=7.
    pub day_of_week: Array1<usize>,
    /// Day-of-year code, 1..=366.
    pub day_of_year: Array1<usize>,
    pub ozone_scaling: Scaling,
    pub humidity_scaling: Scaling,
    pub temperature_scaling: Scaling,
    /// Rows removed because a required value was missing.
    pub dropped_rows: usize,
}

impl AnalysisData {
    pub fn len(&self) -> usize {
        self.ozone.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ozone.is_empty()
    }

    /// Day-of-year as the continuous predictor of the spline basis.
    pub fn day_of_year_values(&self) -> Array1<f64> {
        self.day_of_year.mapv(|d| d as f64)
    }
}

/// Reads the observation table from a comma-separated file with a header row.
pub fn load_observations(path: &Path, columns: &ColumnNames) -> Result<RawTable, DataError> {
    log::info!("Loading observations from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b',')),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(DataError::EmptyTable);
    }

    let columns_set: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in columns.required() {
        if !columns_set.contains(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let table = RawTable {
        ozone: internal::extract_numeric_column(&df, &columns.ozone)?,
        humidity: internal::extract_numeric_column(&df, &columns.humidity)?,
        temperature: internal::extract_numeric_column(&df, &columns.temperature)?,
        day_of_week: internal::extract_numeric_column(&df, &columns.day_of_week)?,
        day_of_year: internal::extract_numeric_column(&df, &columns.day_of_year)?,
    };

    log::info!(
        "Loaded {} rows ({} with missing values)",
        table.len(),
        table.incomplete_count()
    );
    Ok(table)
}

/// Rescales the defined values of a column to `(x - mean) / sd`, using the
/// sample standard deviation. Missing cells stay missing.
///
/// # Errors
/// `DataError::DegenerateVariance` when fewer than two values are defined or
/// all defined values are equal.
pub fn standardize(values: &[Option<f64>], column: &str) -> Result<StandardizedColumn, DataError> {
    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    let n = defined.len();
    if n < 2 {
        return Err(DataError::DegenerateVariance(column.to_string()));
    }

    let center = defined.iter().sum::<f64>() / n as f64;
    let variance = defined.iter().map(|&v| (v - center).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    let scale = variance.sqrt();
    if !scale.is_finite() || scale <= 1e-12 * center.abs().max(1.0) {
        return Err(DataError::DegenerateVariance(column.to_string()));
    }

    let scaling = Scaling { center, scale };
    Ok(StandardizedColumn {
        values: values.iter().map(|v| v.map(|x| scaling.apply(x))).collect(),
        scaling,
    })
}

/// Casts a numeric column to integer category codes, keeping the raw order
/// of the codes (no one-hot expansion).
pub fn category_codes(
    values: &[Option<f64>],
    column: &str,
    range: RangeInclusive<usize>,
) -> Result<Vec<Option<usize>>, DataError> {
    values
        .iter()
        .map(|value| match *value {
            None => Ok(None),
            Some(v) => {
                let in_range = v.fract() == 0.0
                    && v >= *range.start() as f64
                    && v <= *range.end() as f64;
                if in_range {
                    Ok(Some(v as usize))
                } else {
                    Err(DataError::InvalidCategory {
                        column_name: column.to_string(),
                        value: v,
                        min: *range.start(),
                        max: *range.end(),
                    })
                }
            }
        })
        .collect()
}

/// Standardizes the continuous columns, validates the category codes, and
/// drops every row lacking one of the required fields.
pub fn prepare(raw: &RawTable) -> Result<AnalysisData, DataError> {
    let ozone = standardize(&raw.ozone, "ozone")?;
    let humidity = standardize(&raw.humidity, "humidity")?;
    let temperature = standardize(&raw.temperature, "temperature")?;
    category_codes(&raw.day_of_week, "day_of_week", DAY_OF_WEEK_RANGE)?;
    category_codes(&raw.day_of_year, "day_of_year", DAY_OF_YEAR_RANGE)?;

    let standardized = RawTable {
        ozone: ozone.values,
        humidity: humidity.values,
        temperature: temperature.values,
        day_of_week: raw.day_of_week.clone(),
        day_of_year: raw.day_of_year.clone(),
    };
    let complete = standardized.complete_rows();
    if complete.is_empty() {
        return Err(DataError::NoCompleteRows);
    }
    let dropped_rows = raw.len() - complete.len();
    if dropped_rows > 0 {
        log::info!("Dropped {} incomplete rows; {} remain", dropped_rows, complete.len());
    }

    let continuous = |column: &[Option<f64>]| column.iter().flatten().copied().collect::<Array1<f64>>();
    let codes = |column: &[Option<f64>]| column.iter().flatten().map(|&v| v as usize).collect::<Array1<usize>>();

    Ok(AnalysisData {
        ozone: continuous(&complete.ozone),
        humidity: continuous(&complete.humidity),
        temperature: continuous(&complete.temperature),
        day_of_week: codes(&complete.day_of_week),
        day_of_year: codes(&complete.day_of_year),
        ozone_scaling: ozone.scaling,
        humidity_scaling: humidity.scaling,
        temperature_scaling: temperature.scaling,
        dropped_rows,
    })
}

/// Internal module for column extraction.
mod internal {
    use super::*;

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let series = df.column(column_name)?;
        let original_nulls = series.null_count();

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        // A non-strict cast turns unparsable text into nulls.
        if casted.null_count() > original_nulls {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let values: Vec<Option<f64>> = casted.f64()?.into_iter().collect();
        if values.iter().flatten().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }
}
