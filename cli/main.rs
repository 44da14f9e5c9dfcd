#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use ozone::config::ReportConfig;
use ozone::report::{Report, explore, run_report};

#[derive(Parser)]
#[command(
    name = "ozone",
    about = "Exploratory analysis and Bayesian spline regression of daily ozone",
    long_about = "Summarizes a daily ozone table, fits Gaussian regressions with a day-of-year \
                 B-spline by quadratic approximation, and writes a plain-text report."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write the report
    Report(ReportArgs),
    /// Run only the summaries and exploratory plots
    Explore(ExploreArgs),
}

#[derive(Args)]
pub struct ReportArgs {
    /// Path to the CSV file with ozone,humidity,temp,dow,doy columns
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// TOML configuration file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of quantile knots for the day-of-year spline, boundaries included
    #[arg(long, value_name = "K")]
    pub knots: Option<usize>,

    /// Degree of the day-of-year spline
    #[arg(long, value_name = "D")]
    pub degree: Option<usize>,

    /// Seed for starting values and posterior sampling
    #[arg(long, value_name = "S")]
    pub seed: Option<u64>,

    /// Credible interval mass, strictly between 0 and 1
    #[arg(long, value_name = "W")]
    pub interval: Option<f64>,

    /// Posterior draws per predictive band
    #[arg(long, value_name = "N")]
    pub samples: Option<usize>,

    /// Where to write the report
    #[arg(long, default_value = "report.txt")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct ExploreArgs {
    /// Path to the CSV file with ozone,humidity,temp,dow,doy columns
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to write the report
    #[arg(long, default_value = "report.txt")]
    pub output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> Result<ReportConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            Ok(ReportConfig::load(path)?)
        }
        None => Ok(ReportConfig::default()),
    }
}

fn finish(report: &Report, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    report.write(output)?;
    println!(
        "Wrote {} sections ({} rows used, {} dropped) to {}",
        report.sections.len(),
        report.rows_used,
        report.rows_dropped,
        output.display()
    );
    Ok(())
}

pub fn report(args: ReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(knots) = args.knots {
        config.spline.num_knots = knots;
    }
    if let Some(degree) = args.degree {
        config.spline.degree = degree;
    }
    if let Some(seed) = args.seed {
        config.fit.seed = seed;
    }
    if let Some(width) = args.interval {
        config.interval.width = width;
    }
    if let Some(samples) = args.samples {
        config.interval.samples = samples;
    }
    config.validate()?;

    println!("Analyzing {}", args.input.display());
    println!(
        "Spline: {} knots, degree {}; seed {}; {:.0}% intervals from {} draws",
        config.spline.num_knots,
        config.spline.degree,
        config.fit.seed,
        100.0 * config.interval.width,
        config.interval.samples
    );
    let report = run_report(&args.input, &config)?;
    for model in &report.models {
        println!(
            "{} model: log posterior {:.3}; {}",
            model.fit.kind,
            model.fit.log_posterior,
            model.fit.optimizer_summary()
        );
    }
    finish(&report, &args.output)
}

pub fn explore_only(args: ExploreArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_ref())?;
    println!("Exploring {}", args.input.display());
    let report = explore(&args.input, &config)?;
    finish(&report, &args.output)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Report(args)) => report(args),
        Some(Commands::Explore(args)) => explore_only(args),
        None => match Cli::command().print_help() {
            Ok(()) => {
                println!();
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
