// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// The four subcommands and their flags:
//
//   train      rows → vocabulary, checkpoints, metrics, report
//   calibrate  checkpoint [+ vocab] → calibrator.json + calibration report
//   export     checkpoint [+ vocab] → portable graph artifact + export report
//   predict    checkpoint + history → next titles, tenure, hireability
//
// Each *Args converts into its application-layer config via From,
// so the application layer never sees clap types.

use chrono::NaiveDate;
use clap::{Args, Subcommand};

use crate::application::{
    calibrate_use_case::CalibrateConfig,
    export_use_case::ExportConfig,
    train_use_case::TrainConfig,
};
use crate::export::ExportOptions;
use crate::ml::calibration::{DEFAULT_BINS, DEFAULT_ECE_THRESHOLD};
use crate::ml::model::LossConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the trajectory model on employment records
    Train(TrainArgs),

    /// Fit a confidence calibrator for a trained checkpoint
    Calibrate(CalibrateArgs),

    /// Export a trained checkpoint to a portable graph artifact
    Export(ExportArgs),

    /// Predict the next role for a career history
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// SQLite store with employment rows (`sqlite://path` or a plain path)
    #[arg(long, default_value = "data/careers.db")]
    pub database_url: String,

    /// Query returning person_id, title, company, start_date, end_date, outcome_label
    #[arg(long)]
    pub query: Option<String>,

    /// Directory for checkpoints, vocabulary, metrics and reports
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// People whose latest transition is on or after this date go to validation
    #[arg(long, default_value = "2021-01-01")]
    pub validation_from: NaiveDate,

    /// People whose latest transition is on or after this date go to test
    #[arg(long, default_value = "2022-01-01")]
    pub test_from: NaiveDate,

    /// Most recent roles kept per history
    #[arg(long, default_value_t = 10)]
    pub max_history: usize,

    /// Tenure targets are clamped to [tenure_min, tenure_max] months
    #[arg(long, default_value_t = 1.0)]
    pub tenure_min: f32,

    #[arg(long, default_value_t = 120.0)]
    pub tenure_max: f32,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// DataLoader workers prefetching batches
    #[arg(long, default_value_t = 2)]
    pub num_workers: usize,

    /// Shuffle seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 64)]
    pub embedding_dim: usize,

    /// LSTM hidden size per direction
    #[arg(long, default_value_t = 128)]
    pub hidden_dim: usize,

    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 128)]
    pub head_hidden_dim: usize,

    /// Dropout between layers, disabled at evaluation
    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Loss weight of the next-title head
    #[arg(long, default_value_t = 1.0)]
    pub next_title_weight: f32,

    /// Loss weight of the tenure head
    #[arg(long, default_value_t = 0.5)]
    pub tenure_weight: f32,

    /// Loss weight of the hireability head
    #[arg(long, default_value_t = 0.5)]
    pub hireability_weight: f32,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            database_url:    a.database_url,
            query:           a.query,
            checkpoint_dir:  a.checkpoint_dir,
            validation_from: a.validation_from,
            test_from:       a.test_from,
            max_history:     a.max_history,
            tenure_min:      a.tenure_min,
            tenure_max:      a.tenure_max,
            batch_size:      a.batch_size,
            epochs:          a.epochs,
            lr:              a.lr,
            num_workers:     a.num_workers,
            seed:            a.seed,
            embedding_dim:   a.embedding_dim,
            hidden_dim:      a.hidden_dim,
            num_layers:      a.num_layers,
            head_hidden_dim: a.head_hidden_dim,
            dropout:         a.dropout,
            loss: LossConfig {
                next_title_weight:  a.next_title_weight,
                tenure_weight:      a.tenure_weight,
                hireability_weight: a.hireability_weight,
                ..LossConfig::default()
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct CalibrateArgs {
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Read records from a different store than training used
    #[arg(long)]
    pub database_url: Option<String>,

    /// Vocabulary file; defaults to {checkpoint_dir}/vocab.json
    #[arg(long)]
    pub vocab: Option<String>,

    /// Where to write the calibrator; the report is written beside it
    #[arg(long)]
    pub calibrator_out: Option<String>,

    /// Equal-width bins for ECE and the reliability table
    #[arg(long, default_value_t = DEFAULT_BINS)]
    pub bins: usize,

    /// Calibrated ECE must stay below this
    #[arg(long, default_value_t = DEFAULT_ECE_THRESHOLD)]
    pub ece_threshold: f64,
}

impl From<CalibrateArgs> for CalibrateConfig {
    fn from(a: CalibrateArgs) -> Self {
        CalibrateConfig {
            checkpoint_dir: a.checkpoint_dir,
            database_url:   a.database_url,
            vocab_path:     a.vocab,
            calibrator_out: a.calibrator_out,
            bins:           a.bins,
            ece_threshold:  a.ece_threshold,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Vocabulary file; defaults to {checkpoint_dir}/vocab.json
    #[arg(long)]
    pub vocab: Option<String>,

    /// Defaults to {checkpoint_dir}/export
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Artifact file path; takes precedence over --output-dir
    #[arg(long)]
    pub output: Option<String>,

    /// Highest op set the target runtime supports; 1 forces the module graph
    #[arg(long, default_value_t = 2)]
    pub opset: u32,

    /// Max absolute difference allowed between model and artifact
    #[arg(long, default_value_t = 1e-4)]
    pub tolerance: f32,

    /// Skip the simplification pass
    #[arg(long)]
    pub no_simplify: bool,

    /// Seed for the parity probe inputs
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<ExportArgs> for ExportConfig {
    fn from(a: ExportArgs) -> Self {
        ExportConfig {
            checkpoint_dir: a.checkpoint_dir,
            vocab_path:     a.vocab,
            output_dir:     a.output_dir,
            output_path:    a.output,
            options: ExportOptions {
                opset:     a.opset,
                tolerance: a.tolerance,
                simplify:  !a.no_simplify,
                seed:      a.seed,
                ..ExportOptions::default()
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Job titles, oldest first, e.g. --history "Analyst" --history "Engineer"
    #[arg(long = "history", required = true)]
    pub history: Vec<String>,

    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Number of next titles to list
    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    /// Print the prediction as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_args_map_into_config() {
        let cli = Cli::try_parse_from([
            "career-trajectory", "train", "--database-url", "sqlite://x.db", "--epochs", "3",
            "--validation-from", "2020-06-01", "--tenure-weight", "0.1",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.database_url, "sqlite://x.db");
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.validation_from, NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        assert_eq!(cfg.loss.tenure_weight, 0.1);
        assert_eq!(cfg.loss.huber_delta, LossConfig::default().huber_delta);
    }

    #[test]
    fn test_export_flags() {
        let cli = Cli::try_parse_from(["career-trajectory", "export", "--opset", "1", "--no-simplify"]).unwrap();
        let Commands::Export(args) = cli.command else { panic!("expected export") };
        let cfg: ExportConfig = args.into();
        assert_eq!(cfg.options.opset, 1);
        assert!(!cfg.options.simplify);
        assert_eq!(cfg.options.probe_shapes.len(), 2);
    }

    #[test]
    fn test_explicit_artifact_paths() {
        let cli = Cli::try_parse_from([
            "career-trajectory", "calibrate", "--vocab", "v.json", "--calibrator-out", "out/cal.json",
        ])
        .unwrap();
        let Commands::Calibrate(args) = cli.command else { panic!("expected calibrate") };
        let cfg: CalibrateConfig = args.into();
        assert_eq!(cfg.vocab_path.as_deref(), Some("v.json"));
        assert_eq!(cfg.calibrator_out.as_deref(), Some("out/cal.json"));

        let cli = Cli::try_parse_from([
            "career-trajectory", "export", "--vocab", "v.json", "--output", "model.json",
        ])
        .unwrap();
        let Commands::Export(args) = cli.command else { panic!("expected export") };
        let cfg: ExportConfig = args.into();
        assert_eq!(cfg.vocab_path.as_deref(), Some("v.json"));
        assert_eq!(cfg.output_path.as_deref(), Some("model.json"));
        assert!(cfg.options.simplify);
    }

    #[test]
    fn test_predict_requires_history() {
        assert!(Cli::try_parse_from(["career-trajectory", "predict"]).is_err());
        let cli = Cli::try_parse_from([
            "career-trajectory", "predict", "--history", "Analyst", "--history", "Engineer",
        ])
        .unwrap();
        let Commands::Predict(args) = cli.command else { panic!("expected predict") };
        assert_eq!(args.history, vec!["Analyst", "Engineer"]);
    }
}
