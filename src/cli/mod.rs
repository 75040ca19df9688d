// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates every bit of work to Layer 2.
//
// Three commands are supported:
//   1. `train`    - trains a classifier and logs the run
//   2. `register` - promotes the best run to an alias
//   3. `predict`  - classifies images through that alias,
//                   one JSON line per file on stdout
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PredictArgs, RegisterArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "catdog-classifier",
    version,
    about = "Train an image classifier, promote it through a registry alias, and serve predictions."
)]
pub struct Cli {
    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Register(args) => run_register(args),
            Commands::Predict(args)  => run_predict(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!(
        "Starting training of {} on data version '{}'",
        args.model_name,
        args.data_version
    );
    let report = TrainUseCase::new(args.into()).execute()?;

    println!("Run {} ({}) logged.", report.run_name, report.run_id);
    if let Some(epoch) = report.selected_epoch {
        println!("Kept weights from epoch {epoch}.");
    }
    for (key, value) in &report.summary {
        println!("  {key:<14} {value:.4}");
    }
    Ok(())
}

fn run_register(args: RegisterArgs) -> Result<()> {
    use crate::application::register_use_case::RegisterUseCase;

    let report = RegisterUseCase::new(args.into())?.execute()?;
    println!(
        "Registered {} version {} from run {}; alias '{}' now points at it.",
        report.version.name, report.version.version, report.run_id, report.alias
    );
    println!("Serve config: {}", report.serve_config.display());
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let report = PredictUseCase::new(args.into()).execute()?;
    for outcome in &report.outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    tracing::info!(
        "{}: {} served, {} rejected by version {}; cache at '{}'",
        report.identity,
        report.outcomes.len() - report.rejected(),
        report.rejected(),
        report.version,
        report.cache_csv.display()
    );
    Ok(())
}
