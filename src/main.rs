//! Command-line front end: train from a parameter file, inspect a run folder.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use machinedesign::config::Params;
use machinedesign::interface::{train, TrainContext, PARAMS_FILE, TRANSFORMERS_FILE};
use machinedesign::model::Builders;
use machinedesign::serialization::{load_checkpoint_meta, tensor_info, WEIGHTS_FILE};
use machinedesign::transformers::load_transformers;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "machinedesign: declarative model training", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model described by a JSON parameter file
    Train {
        /// Path to the parameter file
        #[arg(short, long)]
        config: PathBuf,

        /// Overrides `report.outdir`
        #[arg(short, long)]
        outdir: Option<PathBuf>,
    },
    /// Print the parameters, transformers and saved weights of a run folder
    Inspect {
        folder: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("machinedesign=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Train { config, outdir } => run_train(config, outdir),
        Command::Inspect { folder } => run_inspect(folder),
    }
}

fn run_train(config: PathBuf, outdir: Option<PathBuf>) -> Result<()> {
    let mut params = Params::from_file(&config)
        .with_context(|| format!("failed to read parameters from {}", config.display()))?;
    if let Some(outdir) = outdir {
        params.report.outdir = outdir;
    }

    let outcome = train(&params, &Builders::default(), TrainContext::new())
        .context("training failed")?;

    println!(
        "finished after {} epoch(s), stop reason: {}",
        outcome.epochs, outcome.stop_reason
    );
    for name in outcome.history.metric_names() {
        if let Some(value) = outcome.history.last(name) {
            println!("  {name}: {value:.6}");
        }
    }
    println!("outputs written to {}", params.report.outdir.display());
    Ok(())
}

fn run_inspect(folder: PathBuf) -> Result<()> {
    let params = Params::from_file(folder.join(PARAMS_FILE))
        .with_context(|| format!("{} is not a run folder", folder.display()))?;
    println!(
        "model: {} ({:?} family), loss: {}, optimizer: {}",
        params.model.name, params.family, params.optim.loss, params.optim.algo.name
    );

    let transformers = load_transformers(folder.join(TRANSFORMERS_FILE))
        .context("failed to read transformers")?;
    println!("transformers: {}", transformers.len());

    let meta = load_checkpoint_meta(&folder).context("failed to read checkpoint metadata")?;
    let value = meta
        .value
        .map_or_else(|| "n/a".to_string(), |v| format!("{v:.6}"));
    println!(
        "checkpoint: epoch {}, {} = {}, input {:?}, output {:?}",
        meta.epoch, meta.monitor, value, meta.input_shape, meta.output_shape
    );

    for (name, shape, dtype) in tensor_info(folder.join(WEIGHTS_FILE))? {
        println!("  {name}: {shape:?} {dtype}");
    }
    Ok(())
}
