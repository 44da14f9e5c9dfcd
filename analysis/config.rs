//! Report configuration.
//!
//! Every setting has a default matching the standard analysis (15 quantile
//! knots, cubic splines, standard-normal coefficient priors, an exponential(1)
//! prior on sigma, 93% intervals). A TOML file may override any subset of the
//! fields; the command line overrides the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Names of the required input columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub ozone: String,
    pub humidity: String,
    pub temperature: String,
    pub day_of_week: String,
    pub day_of_year: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            ozone: "ozone".to_string(),
            humidity: "humidity".to_string(),
            temperature: "temp".to_string(),
            day_of_week: "dow".to_string(),
            day_of_year: "doy".to_string(),
        }
    }
}

impl ColumnNames {
    /// The five required columns in canonical order.
    pub fn required(&self) -> [&str; 5] {
        [
            self.ozone.as_str(),
            self.humidity.as_str(),
            self.temperature.as_str(),
            self.day_of_week.as_str(),
            self.day_of_year.as_str(),
        ]
    }
}

/// Configuration for the day-of-year spline basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasisConfig {
    /// Number of quantile knots, boundaries included.
    pub num_knots: usize,
    pub degree: usize,
}

impl Default for BasisConfig {
    fn default() -> Self {
        Self {
            num_knots: 15,
            degree: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Standard deviation of the zero-mean normal prior on every coefficient.
    pub coefficient_sd: f64,
    /// Rate of the exponential prior on the residual scale.
    pub sigma_rate: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            coefficient_sd: 1.0,
            sigma_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Seed applied before each model fit and each interval sampling step.
    pub seed: u64,
    pub max_iterations: usize,
    /// Gradient-norm tolerance for the BFGS mode search.
    pub tolerance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            seed: 11,
            max_iterations: 500,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Credible-interval mass, e.g. 0.93.
    pub width: f64,
    /// Number of posterior draws used for the predictive bands.
    pub samples: usize,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            width: 0.93,
            samples: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u16,
    pub height: u16,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 78,
            height: 22,
        }
    }
}

/// The complete set of knobs for one report run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub columns: ColumnNames,
    pub spline: BasisConfig,
    pub priors: PriorConfig,
    pub fit: FitConfig,
    pub interval: IntervalConfig,
    pub plot: PlotConfig,
}

impl ReportConfig {
    /// Loads a configuration from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: ReportConfig = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to a human-readable TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects settings that cannot produce a valid analysis.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::InvalidValue { field, reason };

        if self.spline.num_knots < 2 {
            return Err(invalid(
                "spline.num_knots",
                format!("at least 2 knots are required, got {}", self.spline.num_knots),
            ));
        }
        if self.spline.degree < 1 {
            return Err(invalid("spline.degree", "degree must be at least 1".to_string()));
        }
        if !(self.priors.coefficient_sd.is_finite() && self.priors.coefficient_sd > 0.0) {
            return Err(invalid(
                "priors.coefficient_sd",
                format!("must be positive and finite, got {}", self.priors.coefficient_sd),
            ));
        }
        if !(self.priors.sigma_rate.is_finite() && self.priors.sigma_rate > 0.0) {
            return Err(invalid(
                "priors.sigma_rate",
                format!("must be positive and finite, got {}", self.priors.sigma_rate),
            ));
        }
        if self.fit.max_iterations == 0 {
            return Err(invalid("fit.max_iterations", "must be at least 1".to_string()));
        }
        if !(self.fit.tolerance.is_finite() && self.fit.tolerance > 0.0) {
            return Err(invalid(
                "fit.tolerance",
                format!("must be positive and finite, got {}", self.fit.tolerance),
            ));
        }
        if !(self.interval.width > 0.0 && self.interval.width < 1.0) {
            return Err(invalid(
                "interval.width",
                format!("must lie strictly between 0 and 1, got {}", self.interval.width),
            ));
        }
        if self.interval.samples == 0 {
            return Err(invalid("interval.samples", "must be at least 1".to_string()));
        }
        if self.plot.width < 20 || self.plot.height < 8 {
            return Err(invalid(
                "plot",
                format!(
                    "plots need at least 20x8 cells, got {}x{}",
                    self.plot.width, self.plot.height
                ),
            ));
        }
        Ok(())
    }
}
