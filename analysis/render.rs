//! Text rendering of the report's tables and plots.
//!
//! Plots are ratatui widgets drawn into an off-screen [`Buffer`] and read back
//! cell by cell, so the whole report stays a plain text file.

use crate::basis::{BasisError, SplineBasis};
use crate::config::PlotConfig;
use crate::estimate::ParameterSummary;
use crate::predict::IntervalBand;
use crate::summary::{BoxplotStats, ColumnSummary, DensityEstimate};
use ndarray::{Array1, Array2, ArrayView1};
use ratatui::buffer::Buffer;
use ratatui::prelude::*;
use ratatui::widgets::canvas::{Canvas, Line as Segment, Points};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType};

/// Draws `widget` on a `width x height` buffer and returns its text.
pub fn widget_to_text<W: Widget>(widget: W, width: u16, height: u16) -> String {
    let area = Rect::new(0, 0, width, height);
    let mut buffer = Buffer::empty(area);
    widget.render(area, &mut buffer);
    buffer_to_text(&buffer)
}

fn buffer_to_text(buffer: &Buffer) -> String {
    let mut text = String::new();
    for y in 0..buffer.area.height {
        let mut line = String::new();
        for x in 0..buffer.area.width {
            line.push_str(buffer[(x, y)].symbol());
        }
        text.push_str(line.trim_end());
        text.push('\n');
    }
    text
}

/// Axis bounds with a little headroom; a degenerate range is widened to ±1.
fn padded_bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    if hi - lo < 1e-12 {
        return [lo - 1.0, hi + 1.0];
    }
    let pad = 0.05 * (hi - lo);
    [lo - pad, hi + pad]
}

fn axis<'a>(title: &'a str, bounds: [f64; 2]) -> Axis<'a> {
    Axis::default()
        .title(title)
        .bounds(bounds)
        .labels(vec![
            Line::from(format!("{:.2}", bounds[0])),
            Line::from(format!("{:.2}", 0.5 * (bounds[0] + bounds[1]))),
            Line::from(format!("{:.2}", bounds[1])),
        ])
}

fn plot_block(title: &str) -> Block<'_> {
    Block::default().title(title).borders(Borders::ALL)
}

/// Kernel density curve of one variable.
pub fn density_plot(title: &str, variable: &str, estimate: &DensityEstimate, size: &PlotConfig) -> String {
    let points: Vec<(f64, f64)> = estimate
        .grid
        .iter()
        .copied()
        .zip(estimate.density.iter().copied())
        .collect();
    let x_bounds = padded_bounds(estimate.grid.iter().copied());
    let y_bounds = [0.0, padded_bounds(estimate.density.iter().copied())[1]];
    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .data(&points),
    ];
    let chart = Chart::new(datasets)
        .block(plot_block(title))
        .x_axis(axis(variable, x_bounds))
        .y_axis(axis("density", y_bounds));
    widget_to_text(chart, size.width, size.height)
}

/// Side-by-side Tukey boxplots, one per labelled group. Empty groups are
/// labelled but not drawn.
pub fn grouped_boxplot(
    title: &str,
    variable: &str,
    groups: &[(String, Option<BoxplotStats>)],
    size: &PlotConfig,
) -> String {
    let drawn = groups.iter().filter_map(|(_, stats)| stats.as_ref());
    let y_bounds = padded_bounds(drawn.flat_map(|s| {
        s.outliers
            .iter()
            .copied()
            .chain([s.whisker_low, s.whisker_high])
            .collect::<Vec<_>>()
    }));
    let x_bounds = [0.0, groups.len() as f64 + 1.0];
    let title_line = format!("{title} ({variable}; y from {:.2} to {:.2})", y_bounds[0], y_bounds[1]);

    let canvas = Canvas::default()
        .block(Block::default().title(title_line).borders(Borders::ALL))
        .marker(symbols::Marker::Braille)
        .x_bounds(x_bounds)
        .y_bounds(y_bounds)
        .paint(|ctx| {
            for (i, (label, stats)) in groups.iter().enumerate() {
                let x = i as f64 + 1.0;
                ctx.print(x - 0.1, y_bounds[0], label.clone());
                let Some(s) = stats else { continue };
                let (left, right) = (x - 0.3, x + 0.3);
                let color = Color::Reset;
                for segment in [
                    Segment::new(left, s.q1, right, s.q1, color),
                    Segment::new(left, s.q3, right, s.q3, color),
                    Segment::new(left, s.q1, left, s.q3, color),
                    Segment::new(right, s.q1, right, s.q3, color),
                    Segment::new(left, s.median, right, s.median, color),
                    Segment::new(x, s.q1, x, s.whisker_low, color),
                    Segment::new(x, s.q3, x, s.whisker_high, color),
                    Segment::new(x - 0.15, s.whisker_low, x + 0.15, s.whisker_low, color),
                    Segment::new(x - 0.15, s.whisker_high, x + 0.15, s.whisker_high, color),
                ] {
                    ctx.draw(&segment);
                }
                let coords: Vec<(f64, f64)> = s.outliers.iter().map(|&y| (x, y)).collect();
                ctx.draw(&Points {
                    coords: &coords,
                    color,
                });
            }
        });
    widget_to_text(canvas, size.width, size.height)
}

/// Scatter plots of every pair of columns, arranged in a grid three plots wide.
pub fn scatter_matrix(names: &[&str], columns: &[ArrayView1<f64>], size: &PlotConfig) -> String {
    let pairs: Vec<(usize, usize)> = (0..columns.len())
        .flat_map(|i| (i + 1..columns.len()).map(move |j| (i, j)))
        .collect();
    if pairs.is_empty() {
        return String::new();
    }
    let per_row = pairs.len().min(3);
    let rows = pairs.len().div_ceil(per_row);
    let area = Rect::new(0, 0, size.width, size.height.saturating_mul(rows as u16));
    let mut buffer = Buffer::empty(area);

    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, rows as u32); rows])
        .split(area);
    for (row, row_area) in row_areas.iter().enumerate() {
        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Ratio(1, per_row as u32); per_row])
            .split(*row_area);
        for (slot, &(i, j)) in cells.iter().zip(pairs.iter().skip(row * per_row)) {
            let points: Vec<(f64, f64)> = columns[j]
                .iter()
                .copied()
                .zip(columns[i].iter().copied())
                .collect();
            let title = format!("{} vs {}", names[i], names[j]);
            let datasets = vec![
                Dataset::default()
                    .marker(symbols::Marker::Dot)
                    .graph_type(GraphType::Scatter)
                    .data(&points),
            ];
            Chart::new(datasets)
                .block(plot_block(&title))
                .x_axis(axis(names[j], padded_bounds(columns[j].iter().copied())))
                .y_axis(axis(names[i], padded_bounds(columns[i].iter().copied())))
                .render(*slot, &mut buffer);
        }
    }
    buffer_to_text(&buffer)
}

/// Every basis function evaluated on an even grid over the boundary knots.
pub fn basis_plot(basis: &SplineBasis, grid_points: usize, size: &PlotConfig) -> Result<String, BasisError> {
    let (lo, hi) = basis.boundary_knots;
    let mut grid = Array1::linspace(lo, hi, grid_points.max(2));
    // linspace may overshoot `hi` by a few ulps, which evaluate rejects.
    grid.mapv_inplace(|v| v.clamp(lo, hi));
    let values: Array2<f64> = basis.evaluate(grid.view())?;

    let curves: Vec<Vec<(f64, f64)>> = values
        .columns()
        .into_iter()
        .map(|column| grid.iter().copied().zip(column.iter().copied()).collect())
        .collect();
    let datasets = curves
        .iter()
        .map(|curve| {
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .data(curve)
        })
        .collect::<Vec<_>>();
    let title = format!(
        "B-spline basis: {} functions, degree {}, {} interior knots",
        basis.num_basis(),
        basis.degree,
        basis.interior_knots.len()
    );
    let chart = Chart::new(datasets)
        .block(plot_block(&title))
        .x_axis(axis("day of year", [lo, hi]))
        .y_axis(axis("basis value", [0.0, 1.0]));
    Ok(widget_to_text(chart, size.width, size.height))
}

/// Observed points with the posterior mean line and its interval band.
pub fn band_plot(title: &str, x_label: &str, y_label: &str, band: &IntervalBand, size: &PlotConfig) -> String {
    let observed: Vec<(f64, f64)> = band.points.iter().map(|p| (p.predictor, p.observed)).collect();
    let mean: Vec<(f64, f64)> = band.points.iter().map(|p| (p.predictor, p.mean)).collect();
    let lower: Vec<(f64, f64)> = band.points.iter().map(|p| (p.predictor, p.lower)).collect();
    let upper: Vec<(f64, f64)> = band.points.iter().map(|p| (p.predictor, p.upper)).collect();

    let x_bounds = padded_bounds(band.points.iter().map(|p| p.predictor));
    let y_bounds = padded_bounds(
        band.points
            .iter()
            .flat_map(|p| [p.observed, p.lower, p.upper]),
    );
    let interval_name = format!("{}% interval", percent(band.width));
    let datasets = vec![
        Dataset::default()
            .name("observed")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .data(&observed),
        Dataset::default()
            .name("mean")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .data(&mean),
        Dataset::default()
            .name(interval_name)
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .data(&lower),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .data(&upper),
    ];
    let chart = Chart::new(datasets)
        .block(plot_block(title))
        .hidden_legend_constraints((Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)))
        .x_axis(axis(x_label, x_bounds))
        .y_axis(axis(y_label, y_bounds));
    widget_to_text(chart, size.width, size.height)
}

fn percent(probability: f64) -> f64 {
    (probability * 1000.0).round() / 10.0
}

fn cell(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.2}")
    } else {
        "NA".to_string()
    }
}

/// Column summaries, one row per column.
pub fn summary_table(summaries: &[ColumnSummary]) -> String {
    let name_width = summaries.iter().map(|s| s.name.len()).max().unwrap_or(4).max(6);
    let mut out = format!(
        "{:<name_width$} {:>6} {:>4} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}\n",
        "column", "n", "NA", "mean", "sd", "min", "q1", "median", "q3", "max"
    );
    for s in summaries {
        let values = match &s.stats {
            Some(st) => [st.mean, st.sd, st.min, st.q1, st.median, st.q3, st.max],
            None => [f64::NAN; 7],
        };
        out.push_str(&format!("{:<name_width$} {:>6} {:>4}", s.name, s.count, s.missing));
        for v in values {
            out.push_str(&format!(" {:>9}", cell(v)));
        }
        out.push('\n');
    }
    out
}

/// A labelled square correlation matrix.
pub fn correlation_table(names: &[&str], matrix: &Array2<f64>) -> String {
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0).max(7);
    let mut out = format!("{:<width$}", "");
    for name in names {
        out.push_str(&format!(" {name:>width$}"));
    }
    out.push('\n');
    for (i, name) in names.iter().enumerate() {
        out.push_str(&format!("{name:<width$}"));
        for j in 0..names.len() {
            out.push_str(&format!(" {:>width$}", cell(matrix[[i, j]])));
        }
        out.push('\n');
    }
    out
}

/// Posterior summary (precis) table at the given interval width.
pub fn precis_table(rows: &[ParameterSummary], width: f64) -> String {
    let name_width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0).max(5);
    let lower = format!("{}%", percent(0.5 * (1.0 - width)));
    let upper = format!("{}%", percent(0.5 * (1.0 + width)));
    let mut out = format!(
        "{:<name_width$} {:>9} {:>9} {:>9} {:>9}\n",
        "", "mean", "sd", lower, upper
    );
    for r in rows {
        out.push_str(&format!(
            "{:<name_width$} {:>9} {:>9} {:>9} {:>9}\n",
            r.name,
            cell(r.mean),
            cell(r.sd),
            cell(r.lower),
            cell(r.upper)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::build_quantile_basis;
    use crate::predict::BandPoint;
    use crate::summary::{boxplot_stats, kernel_density, summarize_column};
    use ndarray::array;

    fn small() -> PlotConfig {
        PlotConfig {
            width: 60,
            height: 16,
        }
    }

    #[test]
    fn test_widget_text_has_requested_shape() {
        let text = widget_to_text(plot_block("hello"), 30, 5);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("hello"));
        assert!(lines.iter().all(|l| l.chars().count() <= 30));
    }

    #[test]
    fn test_density_plot_draws_title_and_curve() {
        let values: Vec<f64> = (0..40).map(|i| (i % 9) as f64).collect();
        let estimate = kernel_density(&values, 128).unwrap();
        let text = density_plot("Ozone density", "ozone", &estimate, &small());
        assert!(text.contains("Ozone density"));
        assert!(text.chars().any(|c| ('\u{2801}'..='\u{28FF}').contains(&c)));
    }

    #[test]
    fn test_boxplot_labels_every_group() {
        let groups = vec![
            ("1".to_string(), boxplot_stats(&[1.0, 2.0, 3.0, 4.0])),
            ("2".to_string(), None),
            ("3".to_string(), boxplot_stats(&[2.0, 3.0, 9.0])),
        ];
        let text = grouped_boxplot("By day", "ozone", &groups, &small());
        assert!(text.contains("By day"));
        for label in ["1", "2", "3"] {
            assert!(text.contains(label));
        }
    }

    #[test]
    fn test_scatter_matrix_has_every_pair() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![3.0, 1.0, 2.0];
        let c = array![0.5, 0.1, 0.9];
        let d = array![9.0, 8.0, 7.0];
        let text = scatter_matrix(
            &["a", "b", "c", "d"],
            &[a.view(), b.view(), c.view(), d.view()],
            &PlotConfig {
                width: 120,
                height: 12,
            },
        );
        for title in ["a vs b", "a vs c", "a vs d", "b vs c", "b vs d", "c vs d"] {
            assert!(text.contains(title), "missing {title}");
        }
        assert_eq!(text.lines().count(), 24);
    }

    #[test]
    fn test_basis_plot_renders() {
        let x = Array1::linspace(1.0, 100.0, 100);
        let basis = build_quantile_basis(x.view(), 5, 3).unwrap();
        let text = basis_plot(&basis, 100, &small()).unwrap();
        assert!(text.contains("7 functions"));
    }

    #[test]
    fn test_basis_plot_grid_stays_inside_boundaries() {
        // An even 365-point grid over these ranges lands past the upper boundary.
        for last_day in [51, 101, 190] {
            let x: Array1<f64> = (1..=last_day).map(|d| d as f64).collect();
            let basis = build_quantile_basis(x.view(), 15, 3).unwrap();
            let text = basis_plot(&basis, 365, &small()).unwrap();
            assert!(text.contains("17 functions"));
        }
    }

    #[test]
    fn test_band_plot_legend() {
        let band = IntervalBand {
            width: 0.93,
            points: (0..20)
                .map(|i| BandPoint {
                    predictor: i as f64,
                    observed: (i % 5) as f64,
                    mean: 2.0,
                    lower: 1.0,
                    upper: 3.0,
                })
                .collect(),
        };
        let text = band_plot("Full model", "day of year", "ozone", &band, &small());
        assert!(text.contains("Full model"));
        assert!(text.contains("93% interval"));
    }

    #[test]
    fn test_tables() {
        let summaries = vec![summarize_column("ozone", &[Some(1.0), None, Some(3.0)])];
        let table = summary_table(&summaries);
        assert!(table.starts_with("column"));
        assert!(table.contains("ozone"));
        assert!(table.contains("2.00"));

        let corr = array![[1.0, -0.5], [-0.5, 1.0]];
        let table = correlation_table(&["ozone", "temp"], &corr);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("-0.50"));

        let rows = vec![ParameterSummary {
            name: "bT".to_string(),
            mean: 0.5,
            sd: 0.1,
            lower: 0.32,
            upper: 0.68,
        }];
        let table = precis_table(&rows, 0.93);
        assert!(table.contains("3.5%"));
        assert!(table.contains("96.5%"));
        assert!(table.contains("0.68"));
    }
}
