// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Loads a checkpoint once (weights, vocabulary and calibrator if
// present) and answers single-history queries against it.

use anyhow::Result;
use burn::prelude::*;

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::inferencer::{Inferencer, Prediction};
use crate::ml::{InferBackend, WgpuDevice};

pub struct PredictUseCase<B: Backend = InferBackend> {
    inferencer: Inferencer<B>,
}

impl PredictUseCase<InferBackend> {
    pub fn new(checkpoint_dir: &str) -> Result<Self> {
        Self::on_device(checkpoint_dir, WgpuDevice::default())
    }
}

impl<B: Backend> PredictUseCase<B> {
    pub fn on_device(checkpoint_dir: &str, device: B::Device) -> Result<Self> {
        let ckpt       = CheckpointManager::open(checkpoint_dir)?;
        let inferencer = Inferencer::from_checkpoint(&ckpt, device)?;
        Ok(Self { inferencer })
    }

    /// `history` is oldest role first.
    pub fn predict(&self, history: &[String], top_k: usize) -> Result<Prediction> {
        let titles: Vec<&str> = history
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        let prediction = self.inferencer.predict(&titles, top_k)?;
        if !prediction.unknown_titles.is_empty() {
            tracing::warn!(
                "Titles not in the vocabulary were encoded as <unk>: {:?}",
                prediction.unknown_titles
            );
        }
        Ok(prediction)
    }
}
