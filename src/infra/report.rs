// ============================================================
// Layer 6 — Run Reports
// ============================================================
// JSON summaries written next to the checkpoint at the end of a
// phase. The calibration and export reports live with their own
// modules; this is the training one.

use serde::{Deserialize, Serialize};

use crate::data::builder::BuildStats;
use crate::data::splitter::SplitSummary;
use crate::domain::traits::Persistable;
use crate::infra::metrics::EpochMetrics;
use crate::ml::evaluator::EvalMetrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub vocab_size:    usize,
    pub build:         BuildStats,
    pub split:         SplitSummary,
    pub epochs:        Vec<EpochMetrics>,
    pub best_epoch:    Option<usize>,
    pub best_val_loss: Option<f64>,
    /// Best checkpoint on the test split; absent when the split is empty.
    pub test:          Option<EvalMetrics>,
}

impl Persistable for TrainReport {}

impl TrainReport {
    pub fn log_summary(&self) {
        tracing::info!(
            "Built {} instances from {} people ({} skipped), vocabulary {} ids",
            self.build.instances,
            self.build.people_used,
            self.build.skipped(),
            self.vocab_size,
        );
        if let Some(epoch) = self.best_epoch {
            tracing::info!("Best epoch {} (val_loss={:.4})", epoch, self.best_val_loss.unwrap_or(f64::NAN));
        }
        match &self.test {
            Some(t) => tracing::info!(
                "Test: loss={:.4} next_title_acc={:.1}% tenure_mae={:.2}mo hireability_acc={:.1}% ({} samples)",
                t.loss,
                t.next_title_acc * 100.0,
                t.tenure_mae,
                t.hireability_acc * 100.0,
                t.samples,
            ),
            None => tracing::info!("Test split is empty; no held-out evaluation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_round_trips_through_json_file() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("train_report.json");
        let report = TrainReport {
            vocab_size:    12,
            build:         BuildStats { people_seen: 3, people_used: 2, instances: 5, ..Default::default() },
            split:         SplitSummary::default(),
            epochs:        Vec::new(),
            best_epoch:    Some(3),
            best_val_loss: Some(1.25),
            test:          None,
        };
        report.save(&path).unwrap();

        let back = TrainReport::load(&path).unwrap();
        assert_eq!(back.best_epoch, Some(3));
        assert_eq!(back.build, report.build);
    }
}
