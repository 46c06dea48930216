// ============================================================
// Layer 2 — CalibrateUseCase
// ============================================================
// Fits the confidence calibrator for a trained checkpoint:
//
//   Step 1: Restore vocabulary + best model   (Layer 6 - infra)
//   Step 2: Rebuild the temporal splits       (Layer 4 - data)
//           with the frozen vocabulary
//   Step 3: One pass over validation and test (Layer 5 - ml)
//           collecting (confidence, correct)
//   Step 4: Fit isotonic calibrator on validation
//   Step 5: Score ECE / Brier, judge the bar  (Layer 5 - ml)
//   Step 6: Save calibrator.json + report     (Layer 6 - infra)
//           (next to --calibrator-out when given)
//
// Missing the ECE bar is a warning, not a failure.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{data::dataloader::DataLoaderBuilder, prelude::*};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::prepare_data;
use crate::data::{
    batcher::{TrajectoryBatch, TrajectoryBatcher},
    dataset::TrajectoryDataset,
};
use crate::domain::career::TrajectoryInstance;
use crate::domain::traits::{CareerSource, Persistable};
use crate::infra::checkpoint::{CheckpointManager, CALIBRATOR_FILE, CAL_REPORT_FILE};
use crate::ml::calibration::{
    CalibrationReport, ConfidenceSample, IsotonicCalibrator, DEFAULT_BINS, DEFAULT_ECE_THRESHOLD,
};
use crate::ml::evaluator::collect_confidences;
use crate::ml::model::TrajectoryModel;
use crate::ml::{InferBackend, WgpuDevice};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrateConfig {
    pub checkpoint_dir: String,
    /// Reads from a different store than the one used for training.
    pub database_url:   Option<String>,
    /// Defaults to `{checkpoint_dir}/vocab.json`.
    pub vocab_path:     Option<String>,
    /// Defaults to `{checkpoint_dir}/calibrator.json`.
    pub calibrator_out: Option<String>,
    pub bins:           usize,
    pub ece_threshold:  f64,
}

impl Default for CalibrateConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: "checkpoints".to_string(),
            database_url:   None,
            vocab_path:     None,
            calibrator_out: None,
            bins:           DEFAULT_BINS,
            ece_threshold:  DEFAULT_ECE_THRESHOLD,
        }
    }
}

pub struct CalibrateUseCase {
    config: CalibrateConfig,
}

impl CalibrateUseCase {
    pub fn new(config: CalibrateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<CalibrationReport> {
        let ckpt = CheckpointManager::open(&self.config.checkpoint_dir)?;
        let mut train_cfg = ckpt.load_meta()?.train;
        if let Some(url) = &self.config.database_url {
            train_cfg.database_url = url.clone();
        }
        let source = train_cfg.source()?;
        self.execute_on::<InferBackend>(&source, WgpuDevice::default())
    }

    pub fn execute_on<B: Backend>(&self, source: &dyn CareerSource, device: B::Device) -> Result<CalibrationReport> {
        let cfg = &self.config;
        if cfg.bins == 0 {
            anyhow::bail!("bins must be at least 1");
        }

        // ── Step 1: frozen vocabulary + best weights ──────────────────────────
        let ckpt      = CheckpointManager::open(&cfg.checkpoint_dir)?;
        let mut vocab = ckpt.load_vocabulary_from(cfg.vocab_path.as_deref().map(Path::new))?;
        vocab.freeze();
        let (model, meta) = ckpt.restore_model::<B>(&vocab, &device)?;

        // ── Step 2: same splits as training ──────────────────────────────────
        let data = prepare_data(source, &meta.train, &mut vocab)?;
        vocab.ensure_size(meta.vocab_size, "vocab.json")?;

        // ── Step 3: confidences ──────────────────────────────────────────────
        let batch_size = meta.train.batch_size;
        let validation = confidences(&model, data.split.validation, batch_size, &device)?;
        let test       = confidences(&model, data.split.test, batch_size, &device)?;
        if validation.is_empty() {
            anyhow::bail!(
                "The validation split is empty; a calibrator needs held-out samples to fit on"
            );
        }
        tracing::info!(
            "Collected {} validation and {} test confidences",
            validation.len(),
            test.len()
        );

        // ── Steps 4–5: fit and judge ─────────────────────────────────────────
        let calibrator = IsotonicCalibrator::fit(&validation, vocab.len())?;
        tracing::info!("Isotonic calibrator fitted with {} steps", calibrator.steps.len());
        let report = CalibrationReport::assess(&calibrator, &validation, &test, cfg.bins, cfg.ece_threshold);

        // ── Step 6: persist ──────────────────────────────────────────────────
        let cal_path = cfg
            .calibrator_out
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| ckpt.path(CALIBRATOR_FILE));
        let report_path = cal_path.with_file_name(CAL_REPORT_FILE);
        calibrator
            .save(&cal_path)
            .with_context(|| format!("Cannot save the calibrator to '{}'", cal_path.display()))?;
        report
            .save(&report_path)
            .with_context(|| format!("Cannot save the calibration report to '{}'", report_path.display()))?;
        tracing::info!(
            "ECE {:.4} → {:.4}, Brier {:.4} → {:.4} (validation)",
            report.validation.ece_before,
            report.validation.ece_after,
            report.validation.brier_before,
            report.validation.brier_after,
        );
        Ok(report)
    }
}

fn confidences<B: Backend>(
    model:      &TrajectoryModel<B>,
    instances:  Vec<TrajectoryInstance>,
    batch_size: usize,
    device:     &B::Device,
) -> Result<Vec<ConfidenceSample>> {
    if instances.is_empty() {
        return Ok(Vec::new());
    }
    let loader = DataLoaderBuilder::<B, TrajectoryInstance, TrajectoryBatch<B>>::new(TrajectoryBatcher)
        .batch_size(batch_size.max(1))
        .set_device(device.clone())
        .build(TrajectoryDataset::new(instances)?);
    Ok(collect_confidences(model, loader.iter())?)
}
