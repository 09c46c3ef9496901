//! CLI argument parsing for perfcmp

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "perfcmp")]
#[command(version)]
#[command(about = "Statistical comparison of benchmark runs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare destination run(s) against a baseline run
    Compare(CompareArgs),
    /// Train a tolerance model from historical runs
    Analyze(AnalyzeArgs),
    /// Find which candidate run resembles the reference run most closely
    Closest(ClosestArgs),
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Acceptable percentage deviation of mean metrics
    #[arg(short = 't', long, default_value = "5.0")]
    pub tolerance: f64,

    /// Acceptable absolute deviation of stddev metrics
    #[arg(short = 's', long, default_value = "5.0")]
    pub stddev_tolerance: f64,

    /// Trained model file(s) applied in order (repeatable)
    #[arg(long = "model", value_name = "FILE")]
    pub models: Vec<PathBuf>,

    /// Weight of the cross-build averages opinion on the last run
    /// (0 records it for information only)
    #[arg(long = "builds-average", value_name = "WEIGHT", default_value = "0.0")]
    pub builds_average: f64,

    /// Write an xunit XML report of the last comparison to this file
    #[arg(long, value_name = "FILE")]
    pub xunit: Option<PathBuf>,

    /// Baseline results directory followed by destination directories,
    /// oldest first; the averages opinion fires on the last one
    #[arg(required = true, num_args = 2.., value_name = "RESULTS")]
    pub results: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Tolerance the model is trained for
    #[arg(short = 't', long, default_value = "5.0")]
    pub tolerance: f64,

    /// Model kind to train (linear-regression, stddev)
    #[arg(long = "model-type", value_name = "NAME", default_value = "linear-regression")]
    pub model_type: String,

    /// Output file for the trained model
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: PathBuf,

    /// Results directories providing the historical samples
    #[arg(required = true, num_args = 1.., value_name = "RESULTS")]
    pub results: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ClosestArgs {
    /// Reference results directory followed by at least two candidates
    #[arg(required = true, num_args = 3.., value_name = "RESULTS")]
    pub results: Vec<PathBuf>,
}
