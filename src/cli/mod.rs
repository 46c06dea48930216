// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
//   train      — build the dataset and train the model
//   calibrate  — fit the isotonic confidence calibrator
//   export     — write the portable graph artifact
//   predict    — next titles, tenure and hireability for a history
//
// Reference: Rust Book §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{CalibrateArgs, Commands, ExportArgs, PredictArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "career-trajectory",
    version,
    about = "Train, calibrate and export a career trajectory model, then predict next roles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Routes to the use case; never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)     => run_train(args),
            Commands::Calibrate(args) => run_calibrate(args),
            Commands::Export(args)    => run_export(args),
            Commands::Predict(args)   => run_predict(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training from: {}", args.database_url);
    let dir    = args.checkpoint_dir.clone();
    let report = TrainUseCase::new(args.into()).execute()?;

    println!(
        "Training complete. Best epoch {} saved in '{}'.",
        report.best_epoch.map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
        dir
    );
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> Result<()> {
    use crate::application::calibrate_use_case::CalibrateUseCase;

    let report = CalibrateUseCase::new(args.into()).execute()?;
    let judged = match report.judged_on {
        crate::ml::calibration::AcceptanceSplit::Test => report.test.as_ref().unwrap_or(&report.validation),
        crate::ml::calibration::AcceptanceSplit::Validation => &report.validation,
    };
    println!(
        "Calibrated ECE {:.4} (raw {:.4}), Brier {:.4} (raw {:.4}) on {:?}: {}",
        judged.ece_after,
        judged.ece_before,
        judged.brier_after,
        judged.brier_before,
        report.judged_on,
        if report.meets_bar { "meets the bar" } else { "DOES NOT meet the bar" },
    );
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    use crate::application::export_use_case::ExportUseCase;

    let report = ExportUseCase::new(args.into()).execute()?;
    println!(
        "Exported with '{}' (opset {}), parity max |Δ| = {:.2e}{}",
        report.strategy,
        report.opset,
        report.parity_max_abs_diff,
        if report.used_fallback() { " [fallback]" } else { "" },
    );
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let use_case   = PredictUseCase::new(&args.checkpoint_dir)?;
    let prediction = use_case.predict(&args.history, args.top_k)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
        return Ok(());
    }

    println!("\nHistory: {}", args.history.join(" → "));
    println!("Next role:");
    for (rank, t) in prediction.next_titles.iter().enumerate() {
        println!("  {}. {:<30} {:>5.1}%", rank + 1, t.title, t.probability * 100.0);
    }
    if let Some(c) = prediction.calibrated_confidence {
        println!("Calibrated confidence: {:.1}%", c * 100.0);
    }
    println!(
        "Tenure in current role: {:.0}–{:.0} months",
        prediction.tenure_min_months, prediction.tenure_max_months
    );
    println!("Hireability: {:.1}%", prediction.hireability * 100.0);
    Ok(())
}
