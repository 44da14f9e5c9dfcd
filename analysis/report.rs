//! # Report orchestration
//!
//! Runs the analysis once, start to finish, collecting rendered sections:
//!
//! 1.  Raw column summaries (missing values included).
//! 2.  Preprocessing: standardization and removal of incomplete rows.
//! 3.  Exploration: densities, ozone by day-of-week, pairwise scatter plots
//!     and the correlation matrix.
//! 4.  The day-of-year spline basis, built once and shared by both models.
//! 5.  Quadratic-approximation fits of the full and reduced models.
//! 6.  Posterior predictive mean bands for both models against day-of-year.
//!
//! Any failure aborts the run; no partial report is produced.

use crate::basis::{BasisError, SplineBasis, build_quantile_basis};
use crate::config::{ConfigError, ReportConfig};
use crate::data::{AnalysisData, DAY_OF_WEEK_RANGE, DataError, RawTable, load_observations, prepare};
use crate::estimate::{FitError, FitOptions, QuadraticApproximation, fit_quadratic_approximation};
use crate::model::{GaussianLinearModel, ModelError};
use crate::predict::{IntervalBand, IntervalSettings, PredictError, predictive_band};
use crate::render;
use crate::summary::{
    boxplot_stats, correlation_matrix, group_by_category, kernel_density, summarize_column,
};
use ndarray::{Array1, ArrayView1};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Grid resolution of the density curves.
const DENSITY_GRID: usize = 512;
const BASIS_GRID: usize = 365;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Spline basis error: {0}")]
    Basis(#[from] BasisError),
    #[error("Model construction error: {0}")]
    Model(#[from] ModelError),
    #[error("Model fitting error: {0}")]
    Fit(#[from] FitError),
    #[error("Prediction error: {0}")]
    Predict(#[from] PredictError),
    #[error("Column '{0}' has too few values to estimate a density.")]
    TooFewValues(String),
    #[error("Failed to write the report to '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One titled block of rendered text.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub body: String,
}

/// The posterior approximation and predictive band of one fitted model.
#[derive(Debug, Clone)]
pub struct ModelResult {
    pub fit: QuadraticApproximation,
    pub band: IntervalBand,
}

/// A finished report: rendered sections plus the numbers behind them.
#[derive(Debug, Clone)]
pub struct Report {
    pub sections: Vec<Section>,
    pub rows_used: usize,
    pub rows_dropped: usize,
    pub models: Vec<ModelResult>,
}

impl Report {
    fn push(&mut self, title: impl Into<String>, body: impl Into<String>) {
        self.sections.push(Section {
            title: title.into(),
            body: body.into(),
        });
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        fs::write(path, self.to_string()).map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Report written to '{}'", path.display());
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "{}", section.title)?;
            writeln!(f, "{}", "=".repeat(section.title.chars().count()))?;
            writeln!(f)?;
            writeln!(f, "{}", section.body.trim_end())?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Runs the complete analysis on the CSV at `input`.
pub fn run_report(input: &Path, config: &ReportConfig) -> Result<Report, ReportError> {
    config.validate()?;
    let raw = load_observations(input, &config.columns)?;
    let (mut report, data) = explore_table(input, &raw, config)?;

    let basis = build_quantile_basis(
        data.day_of_year_values().view(),
        config.spline.num_knots,
        config.spline.degree,
    )?;
    report.push("Spline basis", describe_basis(&basis, config)?);

    let full = GaussianLinearModel::full(&data, &basis, &config.priors)?;
    let reduced = GaussianLinearModel::reduced(&data, &basis, &config.priors)?;
    let day_of_year = data.day_of_year_values();

    for model in [&full, &reduced] {
        let options = FitOptions {
            spline_start: Some(Array1::zeros(basis.num_basis())),
            ..FitOptions::from_config(&config.fit)
        };
        let fit = fit_quadratic_approximation(model, &options)?;
        let rows = fit.summary(config.interval.width)?;

        let heading = format!("Posterior summary: {} model", model.kind());
        let mut body = format!("{}\n\n", model.kind().formula());
        body.push_str(&render::precis_table(&rows, config.interval.width));
        body.push_str(&format!(
            "\nlog posterior at mode: {:.4}\nmode search: {}\n",
            fit.log_posterior,
            fit.optimizer_summary()
        ));
        report.push(heading, body);

        let settings = IntervalSettings::new(&config.interval, config.fit.seed);
        let band = predictive_band(
            &fit,
            model,
            day_of_year.view(),
            data.ozone.view(),
            &settings,
        )?;
        let title = format!("Posterior mean ozone, {} model", model.kind());
        let mut body = render::band_plot(
            &title,
            "day of year",
            "ozone (standardized)",
            &band,
            &config.plot,
        );
        body.push_str(&format!(
            "{} posterior draws; {:.1}% of observations fall inside the {}% mean interval.\n",
            settings.samples,
            100.0 * band.observed_coverage(),
            (band.width * 1000.0).round() / 10.0
        ));
        report.push(format!("Predictive band: {} model", model.kind()), body);

        report.models.push(ModelResult { fit, band });
    }

    log::info!("Report complete: {} sections", report.sections.len());
    Ok(report)
}

/// Runs only the summaries, preprocessing and exploratory plots.
pub fn explore(input: &Path, config: &ReportConfig) -> Result<Report, ReportError> {
    config.validate()?;
    let raw = load_observations(input, &config.columns)?;
    Ok(explore_table(input, &raw, config)?.0)
}

fn explore_table(
    input: &Path,
    raw: &RawTable,
    config: &ReportConfig,
) -> Result<(Report, AnalysisData), ReportError> {
    let mut report = Report {
        sections: Vec::new(),
        rows_used: 0,
        rows_dropped: 0,
        models: Vec::new(),
    };
    report.push(
        "Daily ozone analysis",
        format!(
            "input: {}\nrows read: {}\nseed: {}\nspline: {} knots, degree {}\ninterval width: {}\n",
            input.display(),
            raw.len(),
            config.fit.seed,
            config.spline.num_knots,
            config.spline.degree,
            config.interval.width
        ),
    );

    let names = &config.columns;
    let summaries = vec![
        summarize_column(&names.ozone, &raw.ozone),
        summarize_column(&names.humidity, &raw.humidity),
        summarize_column(&names.temperature, &raw.temperature),
        summarize_column(&names.day_of_week, &raw.day_of_week),
        summarize_column(&names.day_of_year, &raw.day_of_year),
    ];
    report.push("Raw column summaries", render::summary_table(&summaries));

    let data = prepare(raw)?;
    report.rows_used = data.len();
    report.rows_dropped = data.dropped_rows;
    let mut body = format!(
        "complete rows: {}\ndropped rows with missing values: {}\n\n",
        data.len(),
        data.dropped_rows
    );
    for (name, scaling) in [
        (&names.ozone, data.ozone_scaling),
        (&names.humidity, data.humidity_scaling),
        (&names.temperature, data.temperature_scaling),
    ] {
        body.push_str(&format!(
            "{name}: centered at {:.4}, scaled by {:.4}\n",
            scaling.center, scaling.scale
        ));
    }
    report.push("Preprocessing", body);

    // Plots use the kept rows on their original scale.
    let ozone = data.ozone.mapv(|z| data.ozone_scaling.restore(z));
    let humidity = data.humidity.mapv(|z| data.humidity_scaling.restore(z));
    let temperature = data.temperature.mapv(|z| data.temperature_scaling.restore(z));
    let day_of_year = data.day_of_year_values();

    let mut densities = String::new();
    for (name, values) in [
        (&names.ozone, &ozone),
        (&names.humidity, &humidity),
        (&names.temperature, &temperature),
    ] {
        let values = values.to_vec();
        let estimate =
            kernel_density(&values, DENSITY_GRID).ok_or_else(|| ReportError::TooFewValues(name.clone()))?;
        densities.push_str(&render::density_plot(
            &format!("Density of {name} (bandwidth {:.3})", estimate.bandwidth),
            name,
            &estimate,
            &config.plot,
        ));
    }
    report.push("Densities", densities);

    let groups: Vec<(String, _)> =
        group_by_category(ozone.view(), data.day_of_week.view(), DAY_OF_WEEK_RANGE)
            .into_iter()
            .map(|(level, values)| (level.to_string(), boxplot_stats(&values)))
            .collect();
    report.push(
        "Ozone by day of week",
        render::grouped_boxplot(
            &format!("{} by {}", names.ozone, names.day_of_week),
            &names.ozone,
            &groups,
            &config.plot,
        ),
    );

    let labels = [
        names.ozone.as_str(),
        names.humidity.as_str(),
        names.temperature.as_str(),
        names.day_of_year.as_str(),
    ];
    let columns: [ArrayView1<f64>; 4] = [
        ozone.view(),
        humidity.view(),
        temperature.view(),
        day_of_year.view(),
    ];
    let mut body = render::scatter_matrix(&labels, &columns, &config.plot);
    body.push('\n');
    body.push_str(&render::correlation_table(&labels, &correlation_matrix(&columns)));
    report.push("Pairwise relationships", body);

    log::info!("Exploration finished on {} complete rows", data.len());
    Ok((report, data))
}

fn describe_basis(basis: &SplineBasis, config: &ReportConfig) -> Result<String, BasisError> {
    let knots: Vec<String> = basis.interior_knots.iter().map(|k| format!("{k:.1}")).collect();
    let mut body = format!(
        "boundary knots: {:.1}, {:.1}\ninterior knots: {}\nbasis columns: {}\n\n",
        basis.boundary_knots.0,
        basis.boundary_knots.1,
        knots.join(", "),
        basis.num_basis()
    );
    body.push_str(&render::basis_plot(basis, BASIS_GRID, &config.plot)?);
    Ok(body)
}
