// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates every command to Layer 2 (application).
//
//   1. `train`      — start an experiment from a config file
//   2. `resume`     — continue an experiment from a checkpoint
//   3. `translate`  — decode with a trained checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ResumeArgs, TrainArgs, TranslateArgs};

use crate::ml::trainer::TrainOutcome;

#[derive(Parser, Debug)]
#[command(
    name = "nmt-runner",
    version,
    about = "Train, resume and decode sequence-to-sequence translation models."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case. Never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)     => run_train(args),
            Commands::Resume(args)    => run_resume(args),
            Commands::Translate(args) => run_translate(args),
        }
    }
}

fn report(outcome: &TrainOutcome) {
    println!("Training stopped: {} (epoch {}, step {})", outcome.reason, outcome.epoch, outcome.step);
    if let Some(best) = outcome.best {
        println!("Best score {:.4} at step {}", best.value, best.step);
    }
    println!("Last checkpoint: {}", outcome.last_checkpoint.display());
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training from '{}'", args.config.display());
    let outcome = TrainUseCase::new(args.config, args.suffix, args.overrides).execute()?;
    report(&outcome);
    Ok(())
}

fn run_resume(args: ResumeArgs) -> Result<()> {
    use crate::application::resume_use_case::ResumeUseCase;

    tracing::info!("Resuming from '{}'", args.checkpoint.display());
    let outcome = ResumeUseCase::new(args.checkpoint, args.device).execute()?;
    report(&outcome);
    Ok(())
}

fn run_translate(args: TranslateArgs) -> Result<()> {
    use crate::application::translate_use_case::TranslateUseCase;

    let options = (&args).into();
    let use_case = TranslateUseCase::new(options, args.checkpoints, args.splits, args.source);
    for path in use_case.execute()? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
