use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use perfcmp::cli::{AnalyzeArgs, Cli, ClosestArgs, Command, CompareArgs};
use perfcmp::config::CompareConfig;
use perfcmp::container::ComparisonSet;
use perfcmp::matcher;
use perfcmp::model::{self, LinearModel, Model, ModelState, TrainingData};
use perfcmp::report::{self, TracingSink};
use perfcmp::source;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber; `RUST_LOG` overrides the default level.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_compare(args: CompareArgs) -> Result<i32> {
    let config = CompareConfig {
        mean_tolerance: args.tolerance,
        stddev_tolerance: args.stddev_tolerance,
        builds_average_weight: args.builds_average,
    };
    config.validate().map_err(anyhow::Error::msg)?;

    let mut models: Vec<Box<dyn Model>> = Vec::new();
    for path in &args.models {
        let state = ModelState::load(path)?;
        models.push(Box::new(LinearModel::with_state(args.tolerance, state)));
    }

    let src_path = &args.results[0];
    let destinations = &args.results[1..];
    let src_name = src_path.display().to_string();
    let sink = report::shared(TracingSink);
    let mut set = ComparisonSet::new(config, models, &src_name, src_path, sink)
        .with_context(|| format!("reading baseline results from {src_name}"))?;

    for (index, destination) in destinations.iter().enumerate() {
        let last = index + 1 == destinations.len();
        let name = destination.display().to_string();
        set.add_result_by_path(&name, destination, last)
            .with_context(|| format!("reading destination results from {name}"))?;
    }

    let mut codes = Vec::new();
    for (_, comparison) in set.iter_mut() {
        comparison.evaluate();
        codes.push(comparison.finish());
    }
    if let (Some(path), Some((_, comparison))) = (&args.xunit, set.iter().last()) {
        let xml = comparison.xunit()?;
        std::fs::write(path, xml)
            .with_context(|| format!("writing xunit report to {}", path.display()))?;
    }

    // Any failed comparison fails the run; "nothing compared" only when no
    // destination produced a single comparison.
    if codes.iter().any(|code| *code == 2) {
        Ok(2)
    } else if codes.iter().all(|code| *code == 3) {
        Ok(3)
    } else {
        Ok(0)
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let mut model = model::model_by_name(&args.model_type, args.tolerance)?;
    let mut data = TrainingData::new();
    for path in &args.results {
        let name = path.display().to_string();
        let measurements = source::iter_results(Path::new(path), true)
            .with_context(|| format!("reading results from {name}"))?;
        for measurement in measurements {
            data.entry(measurement.name)
                .or_default()
                .insert(name.clone(), measurement.value);
        }
    }
    let state = model.identify(&data).clone();
    state.save(&args.output)?;
    tracing::info!(
        "Trained {} model over {} metrics into {}",
        args.model_type,
        state.entries.len(),
        args.output.display()
    );
    Ok(0)
}

fn run_closest(args: ClosestArgs) -> Result<i32> {
    let reference = source::iter_results(&args.results[0], true)
        .with_context(|| format!("reading reference results from {}", args.results[0].display()))?;
    let mut candidates = Vec::new();
    for path in &args.results[1..] {
        candidates.push(
            source::iter_results(path, true)
                .with_context(|| format!("reading candidate results from {}", path.display()))?,
        );
    }
    let winner = matcher::closest_run(&reference, &candidates)?;
    println!("{}", args.results[winner + 1].display());
    Ok(i32::try_from(winner).unwrap_or(i32::MAX))
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Compare(args) => run_compare(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Closest(args) => run_closest(args),
    };
    match code {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            tracing::error!("{error:#}");
            std::process::exit(1);
        }
    }
}
