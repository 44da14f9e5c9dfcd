use ozone::config::ReportConfig;
use ozone::data::DataError;
use ozone::report::{ReportError, explore, run_report};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

/// Rows at these positions get one empty cell each.
const MISSING_ROWS: [usize; 3] = [4, 57, 200];

fn write_ozone_csv(dir: &Path, rows: usize, constant_humidity: bool) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(42);
    let temp = Normal::new(70.0, 9.0).unwrap();
    let noise = Normal::new(0.0, 6.0).unwrap();

    let mut csv = String::from("ozone,humidity,temp,dow,doy,station\n");
    for i in 0..rows {
        let doy = i + 1;
        let season = 12.0 * (doy as f64 / 366.0 * std::f64::consts::PI).sin();
        let t = temp.sample(&mut rng) + season;
        let humidity = if constant_humidity {
            50.0
        } else {
            rng.gen_range(20.0..90.0)
        };
        let ozone = (0.8 * (t - 70.0) + 0.1 * (humidity - 50.0) + season + 12.0 + noise.sample(&mut rng))
            .max(1.0)
            .round();
        let dow = 1 + (i + 3) % 7;
        let mut fields = vec![
            format!("{ozone}"),
            format!("{humidity:.1}"),
            format!("{t:.1}"),
            format!("{dow}"),
            format!("{doy}"),
            "A".to_string(),
        ];
        if let Some(k) = MISSING_ROWS.iter().position(|&r| r == i) {
            fields[k] = String::new();
        }
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }
    let path = dir.join("ozone.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn fast_config() -> ReportConfig {
    let mut config = ReportConfig::default();
    config.interval.samples = 300;
    config
}

fn dataset() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = write_ozone_csv(dir.path(), 330, false);
    (dir, path)
}

#[test]
fn full_report_has_every_section_and_both_models() {
    let (dir, csv) = dataset();
    let report = run_report(&csv, &fast_config()).unwrap();

    for title in [
        "Daily ozone analysis",
        "Raw column summaries",
        "Preprocessing",
        "Densities",
        "Ozone by day of week",
        "Pairwise relationships",
        "Spline basis",
        "Posterior summary: full model",
        "Predictive band: full model",
        "Posterior summary: reduced model",
        "Predictive band: reduced model",
    ] {
        assert!(report.section(title).is_some(), "missing section {title}");
    }

    assert_eq!(report.rows_dropped, MISSING_ROWS.len());
    assert_eq!(report.rows_used, 330 - MISSING_ROWS.len());
    assert_eq!(report.models.len(), 2);

    let full = &report.models[0].fit;
    let reduced = &report.models[1].fit;
    assert_eq!(full.names.len(), 7 + 2 + 17 + 1);
    assert_eq!(reduced.names.len(), 1 + 17 + 1);
    assert!(full.coefficient("bT").unwrap() > 0.3);
    assert!(full.log_posterior > reduced.log_posterior);

    for model in &report.models {
        assert_eq!(model.band.points.len(), report.rows_used);
        assert!(model.band.points.windows(2).all(|w| w[0].predictor <= w[1].predictor));
    }

    let basis = report.section("Spline basis").unwrap();
    assert!(basis.body.contains("basis columns: 17"));
    let precis = report.section("Posterior summary: full model").unwrap();
    assert!(precis.body.contains("3.5%"));
    assert!(precis.body.contains("w[17]"));

    let out = dir.path().join("report.txt");
    report.write(&out).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), report.to_string());
}

#[test]
fn same_seed_gives_identical_reports() {
    let (dir, csv) = dataset();
    let first = run_report(&csv, &fast_config()).unwrap();
    let second = run_report(&csv, &fast_config()).unwrap();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.models[0].fit.mode, second.models[0].fit.mode);
    drop(dir);
}

#[test]
fn partial_year_reports_draw_the_whole_basis() {
    let dir = tempdir().unwrap();
    let csv = write_ozone_csv(dir.path(), 190, false);
    let report = run_report(&csv, &fast_config()).unwrap();

    let dropped = MISSING_ROWS.iter().filter(|&&r| r < 190).count();
    assert_eq!(report.rows_used, 190 - dropped);
    let basis = report.section("Spline basis").unwrap();
    assert!(basis.body.contains("basis columns: 17"));
    assert!(basis.body.contains("190.0"));
    assert_eq!(report.models.len(), 2);
}

#[test]
fn explore_stops_before_modelling() {
    let (dir, csv) = dataset();
    let report = explore(&csv, &fast_config()).unwrap();
    assert!(report.models.is_empty());
    assert!(report.section("Pairwise relationships").is_some());
    assert!(report.section("Spline basis").is_none());
    drop(dir);
}

#[test]
fn constant_column_aborts_the_run() {
    let dir = tempdir().unwrap();
    let csv = write_ozone_csv(dir.path(), 100, true);
    match run_report(&csv, &fast_config()).unwrap_err() {
        ReportError::Data(DataError::DegenerateVariance(column)) => assert_eq!(column, "humidity"),
        other => panic!("Expected DegenerateVariance, got {:?}", other),
    }
}

#[test]
fn renamed_column_is_reported_missing() {
    let (dir, csv) = dataset();
    let mut config = fast_config();
    config.columns.temperature = "temperature".to_string();
    match run_report(&csv, &config).unwrap_err() {
        ReportError::Data(DataError::ColumnNotFound(column)) => assert_eq!(column, "temperature"),
        other => panic!("Expected ColumnNotFound, got {:?}", other),
    }
    drop(dir);
}

#[test]
fn cli_writes_report_and_fails_cleanly() {
    let (dir, csv) = dataset();
    let exe = env!("CARGO_BIN_EXE_ozone");
    let output = dir.path().join("out.txt");

    let status = Command::new(exe)
        .current_dir(dir.path())
        .args([
            "report",
            csv.to_str().expect("path str"),
            "--samples",
            "200",
            "--seed",
            "3",
            "--output",
            output.to_str().expect("path str"),
        ])
        .status()
        .expect("run ozone cli");
    assert!(status.success(), "CLI exited with status {status:?}");
    let text = fs::read_to_string(&output).unwrap();
    assert!(text.contains("seed: 3"));

    let failed = Command::new(exe)
        .current_dir(dir.path())
        .args(["report", "does-not-exist.csv", "--interval", "0.9"])
        .output()
        .expect("run ozone cli");
    assert_eq!(failed.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&failed.stderr).contains("Error:"));
}
