// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Example output:
//   epoch,train_loss,val_loss,next_title_acc,tenure_mae,hireability_acc
//   1,4.812300,4.779100,0.081000,14.212000,0.640000
//   2,4.120400,4.098700,0.142000,11.904000,0.671000
//
// Reading the curves:
//   - val_loss rising while train_loss falls → overfitting
//   - tenure_mae is in months, measured at the band midpoint

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::ml::evaluator::EvalMetrics;

const HEADER: &str = "epoch,train_loss,val_loss,next_title_acc,tenure_mae,hireability_acc";

/// One row of metrics for a single training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:           usize,
    /// Weighted three-head loss averaged over training samples.
    pub train_loss:      f64,
    /// NaN when the validation split is empty.
    pub val_loss:        f64,
    pub next_title_acc:  f64,
    pub tenure_mae:      f64,
    pub hireability_acc: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val: &EvalMetrics) -> Self {
        Self {
            epoch,
            train_loss,
            val_loss:        val.loss,
            next_title_acc:  val.next_title_acc,
            tenure_mae:      val.tenure_mae,
            hireability_acc: val.hireability_acc,
        }
    }

    /// True if this epoch beats the best validation loss so far.
    /// Without validation data every epoch counts as an improvement,
    /// so the latest weights win.
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        if self.val_loss.is_nan() {
            return true;
        }
        best_val_loss.is_nan() || self.val_loss < best_val_loss
    }
}

/// Appends epoch metrics to `{dir}/metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the header if the file doesn't exist yet, so repeated
    /// runs append to the same log.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.next_title_acc,
            m.tenure_mae,
            m.hireability_acc,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch: 2,
            train_loss: 2.5,
            val_loss,
            next_title_acc: 0.2,
            tenure_mae: 8.0,
            hireability_acc: 0.7,
        }
    }

    #[test]
    fn test_is_improvement() {
        assert!(metrics(2.3).is_improvement(3.0));
        assert!(!metrics(2.3).is_improvement(2.0));
        assert!(metrics(2.3).is_improvement(f64::NAN));
        // no validation data: latest epoch wins
        assert!(metrics(f64::NAN).is_improvement(1.0));
    }

    #[test]
    fn test_log_appends_rows_under_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&metrics(2.0)).unwrap();

        let again = MetricsLogger::new(dir.path()).unwrap();
        again.log(&metrics(1.5)).unwrap();

        let csv = fs::read_to_string(again.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[2].starts_with("2,2.500000,1.500000,"));
    }
}
