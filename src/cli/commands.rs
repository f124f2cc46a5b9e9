// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `resume` and
// `translate`, and all their flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::ml::beam_search::BeamOptions;
use crate::ml::translator::TranslateOptions;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new experiment from a configuration file
    Train(TrainArgs),

    /// Continue an experiment from one of its checkpoints
    Resume(ResumeArgs),

    /// Decode splits or a source file with a trained checkpoint
    Translate(TranslateArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// TOML configuration file
    #[arg(short = 'C', long = "config")]
    pub config: PathBuf,

    /// Appended to the experiment id, e.g. "lowlr"
    #[arg(short = 's', long)]
    pub suffix: Option<String>,

    /// Overrides of the form section.key:value
    #[arg(value_name = "OVERRIDE")]
    pub overrides: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Checkpoint to continue from
    pub checkpoint: PathBuf,

    /// Device to resume on instead of the stored one (e.g. "gpu:1")
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Args, Debug)]
pub struct TranslateArgs {
    /// Comma-separated splits to decode
    #[arg(short = 's', long, default_value = "test", value_delimiter = ',')]
    pub splits: Vec<String>,

    /// Sentences decoded together
    #[arg(short = 'b', long, default_value_t = 16)]
    pub batch_size: usize,

    /// Beam width
    #[arg(short = 'k', long, default_value_t = 12)]
    pub beam_size: usize,

    /// Maximum output length in tokens
    #[arg(short = 'm', long, default_value_t = 100)]
    pub max_len: usize,

    /// Never emit the same token twice in a row
    #[arg(long)]
    pub avoid_double: bool,

    /// Never emit <unk>
    #[arg(long)]
    pub avoid_unk: bool,

    /// Device to decode on instead of the stored one
    #[arg(long)]
    pub device: Option<String>,

    /// Combine several checkpoints (not supported)
    #[arg(long)]
    pub ensemble: bool,

    /// Skip the output filters of the configuration
    #[arg(long)]
    pub disable_filters: bool,

    /// Where hypothesis files are written
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Decode this file instead of configured splits
    #[arg(short = 'S', long)]
    pub source: Option<PathBuf>,

    /// Hypotheses written per input
    #[arg(short = 'N', long, default_value_t = 1)]
    pub n_best: usize,

    /// GNMT length-penalty exponent (0 disables)
    #[arg(long, default_value_t = 0.0)]
    pub lp_alpha: f32,

    /// Checkpoint(s) to decode with
    #[arg(required = true)]
    pub checkpoints: Vec<PathBuf>,
}

/// The application layer never sees clap types.
impl From<&TranslateArgs> for TranslateOptions {
    fn from(a: &TranslateArgs) -> Self {
        TranslateOptions {
            beam: BeamOptions {
                beam:         a.beam_size,
                max_len:      a.max_len,
                avoid_unk:    a.avoid_unk,
                avoid_double: a.avoid_double,
                lp_alpha:     a.lp_alpha,
                n_best:       a.n_best,
            },
            batch_size:      a.batch_size,
            device:          a.device.clone(),
            ensemble:        a.ensemble,
            disable_filters: a.disable_filters,
            output_dir:      a.output_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_translate_defaults() {
        let cli = Cli::try_parse_from(["nmt-runner", "translate", "a.ckpt"]).unwrap();
        let Commands::Translate(args) = cli.command else { panic!("expected translate") };
        assert_eq!(args.splits, vec!["test"]);
        let opts = TranslateOptions::from(&args);
        assert_eq!(opts.beam.beam, 12);
        assert_eq!(opts.beam.max_len, 100);
        assert_eq!(opts.batch_size, 16);
        assert_eq!(opts.beam.n_best, 1);
    }

    #[test]
    fn test_train_takes_overrides() {
        let cli = Cli::try_parse_from([
            "nmt-runner", "train", "-C", "run.toml", "-s", "x", "train.lr:0.001", "model.type:meanpool",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(args.suffix.as_deref(), Some("x"));
        assert_eq!(args.overrides, vec!["train.lr:0.001", "model.type:meanpool"]);
    }

    #[test]
    fn test_translate_flags() {
        let cli = Cli::try_parse_from([
            "nmt-runner", "translate", "-s", "test,val", "-k", "4", "--avoid-unk", "--ensemble",
            "a.ckpt", "b.ckpt",
        ])
        .unwrap();
        let Commands::Translate(args) = cli.command else { panic!("expected translate") };
        assert_eq!(args.splits, vec!["test", "val"]);
        assert_eq!(args.checkpoints.len(), 2);
        assert!(args.ensemble && args.avoid_unk && !args.avoid_double);
    }
}
