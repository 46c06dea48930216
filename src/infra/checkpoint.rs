// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights at full precision so the
// restored model matches the trained one bit for bit.
//
// Checkpoint directory layout:
//
//   checkpoints/
//     model_epoch_1.mpk.gz    ← weights after epoch 1
//     model_epoch_2.mpk.gz
//     ...
//     checkpoint_meta.json    ← configs, vocab size, latest + best epoch
//     vocab.json              ← frozen title vocabulary
//     metrics.csv             ← one row per epoch
//     calibrator.json         ← written by `calibrate`
//     calibration_report.json
//     train_report.json
//     export/                 ← written by `export`
//
// Later phases rebuild the exact architecture from the metadata
// before loading weights into it. The vocabulary size recorded at
// training time must match the vocabulary on disk, otherwise the
// checkpoint is refused.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::domain::error::TrajectoryError;
use crate::domain::vocabulary::TitleVocabulary;
use crate::ml::model::{TrajectoryModel, TrajectoryModelConfig};

pub const META_FILE:        &str = "checkpoint_meta.json";
pub const VOCAB_FILE:       &str = "vocab.json";
pub const CALIBRATOR_FILE:  &str = "calibrator.json";
pub const CAL_REPORT_FILE:  &str = "calibration_report.json";
pub const TRAIN_REPORT_FILE: &str = "train_report.json";
pub const EXPORT_DIR:       &str = "export";

type WeightsRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Everything needed to rebuild the model that produced the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub train:         TrainConfig,
    pub model:         TrajectoryModelConfig,
    pub vocab_size:    usize,
    pub latest_epoch:  Option<usize>,
    /// Epoch whose weights later phases load.
    pub best_epoch:    Option<usize>,
    pub best_val_loss: Option<f64>,
}

impl CheckpointMeta {
    pub fn new(train: TrainConfig, model: TrajectoryModelConfig) -> Self {
        let vocab_size = model.vocab_size;
        Self {
            train,
            model,
            vocab_size,
            latest_epoch:  None,
            best_epoch:    None,
            best_val_loss: None,
        }
    }
}

/// Manages saving and loading of model checkpoints.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Opens an existing directory; used by every phase after `train`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.join(META_FILE).exists() {
            anyhow::bail!(
                "No '{}' in '{}'. Have you run 'train' first?",
                META_FILE,
                dir.display()
            );
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn vocab_path(&self) -> PathBuf {
        self.path(VOCAB_FILE)
    }

    fn weights_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("model_epoch_{epoch}"))
    }

    /// Writes {dir}/model_epoch_{epoch}.mpk.gz; the recorder adds the extension.
    pub fn save_model<B: Backend>(&self, model: &TrajectoryModel<B>, epoch: usize) -> Result<()> {
        let path = self.weights_path(epoch);
        WeightsRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Load the weights of `epoch` into an already-built model.
    pub fn load_model<B: Backend>(
        &self,
        model:  TrajectoryModel<B>,
        epoch:  usize,
        device: &B::Device,
    ) -> Result<TrajectoryModel<B>> {
        let path = self.weights_path(epoch);
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        let record = WeightsRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;
        Ok(model.load_record(record))
    }

    pub fn save_meta(&self, meta: &CheckpointMeta) -> Result<()> {
        let path = self.path(META_FILE);
        fs::write(&path, serde_json::to_string_pretty(meta)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint metadata to '{}'", path.display());
        Ok(())
    }

    pub fn load_meta(&self) -> Result<CheckpointMeta> {
        let path = self.path(META_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!("Cannot read '{}'. Make sure you have run 'train' first.", path.display())
        })?;
        serde_json::from_str(&json).with_context(|| format!("Malformed '{}'", path.display()))
    }

    pub fn load_vocabulary(&self) -> Result<TitleVocabulary> {
        self.load_vocabulary_from(None)
    }

    /// Loads `path` when given, else `{dir}/vocab.json`.
    pub fn load_vocabulary_from(&self, path: Option<&Path>) -> Result<TitleVocabulary> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| self.vocab_path());
        TitleVocabulary::load(&path).with_context(|| format!("Cannot load vocabulary '{}'", path.display()))
    }

    /// Rebuild the best model for inference (dropout off) after
    /// checking it against `vocab`.
    pub fn restore_model<B: Backend>(
        &self,
        vocab:  &TitleVocabulary,
        device: &B::Device,
    ) -> Result<(TrajectoryModel<B>, CheckpointMeta)> {
        let meta = self.load_meta()?;
        vocab.ensure_size(meta.vocab_size, META_FILE)?;

        let epoch = meta
            .best_epoch
            .or(meta.latest_epoch)
            .ok_or_else(|| TrajectoryError::config(META_FILE, "no epoch has been checkpointed yet"))?;

        let model_cfg = meta.model.clone().with_dropout(0.0);
        let model     = self.load_model(model_cfg.init::<B>(device), epoch, device)?;

        if model.embedding_rows() != vocab.len() {
            return Err(TrajectoryError::VocabularyMismatch {
                artifact: format!("model_epoch_{epoch}"),
                expected: model.embedding_rows(),
                actual:   vocab.len(),
            }
            .into());
        }
        Ok((model, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn small(vocab: usize) -> TrajectoryModelConfig {
        TrajectoryModelConfig::new(vocab)
            .with_embedding_dim(4)
            .with_hidden_dim(3)
            .with_head_hidden_dim(5)
    }

    fn setup(vocab_titles: &[&str]) -> (tempfile::TempDir, CheckpointManager, TitleVocabulary) {
        let dir   = tempfile::tempdir().unwrap();
        let ckpt  = CheckpointManager::new(dir.path()).unwrap();
        let vocab = TitleVocabulary::from_titles(vocab_titles.iter().copied());
        vocab.save(ckpt.vocab_path()).unwrap();
        (dir, ckpt, vocab)
    }

    #[test]
    fn test_save_then_restore_best_epoch() {
        let (_dir, ckpt, vocab) = setup(&["a", "b", "c"]);
        let device = Default::default();
        let cfg    = small(vocab.len());
        let model: TrajectoryModel<B> = cfg.init(&device);
        ckpt.save_model(&model, 1).unwrap();

        let mut meta = CheckpointMeta::new(TrainConfig::default(), cfg);
        meta.latest_epoch = Some(1);
        meta.best_epoch   = Some(1);
        ckpt.save_meta(&meta).unwrap();

        let (restored, meta) = ckpt.restore_model::<B>(&ckpt.load_vocabulary().unwrap(), &device).unwrap();
        assert_eq!(meta.best_epoch, Some(1));
        assert_eq!(restored.embedding_rows(), vocab.len());

        let before: Vec<f32> = model.embedding.weight.val().into_data().iter::<f32>().collect();
        let after: Vec<f32>  = restored.embedding.weight.val().into_data().iter::<f32>().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_later_epoch_overrides_earlier_weights() {
        let (_dir, ckpt, vocab) = setup(&["a", "b"]);
        let device = Default::default();
        let cfg    = small(vocab.len());
        let first: TrajectoryModel<B>  = cfg.init(&device);
        let second: TrajectoryModel<B> = cfg.init(&device);
        ckpt.save_model(&first, 1).unwrap();
        ckpt.save_model(&second, 2).unwrap();

        let loaded = ckpt.load_model(cfg.init::<B>(&device), 2, &device).unwrap();
        let want: Vec<f32> = second.embedding.weight.val().into_data().iter::<f32>().collect();
        let got: Vec<f32>  = loaded.embedding.weight.val().into_data().iter::<f32>().collect();
        assert_eq!(want, got);
    }

    #[test]
    fn test_vocab_mismatch_is_fatal() {
        let (_dir, ckpt, _) = setup(&["a", "b"]);
        let mut meta = CheckpointMeta::new(TrainConfig::default(), small(9));
        meta.best_epoch = Some(1);
        ckpt.save_meta(&meta).unwrap();

        let vocab = ckpt.load_vocabulary().unwrap();
        let err   = ckpt.restore_model::<B>(&vocab, &Default::default()).unwrap_err();
        assert!(err.to_string().contains(META_FILE));
    }

    #[test]
    fn test_vocabulary_override_path() {
        let (dir, ckpt, _) = setup(&["a", "b"]);
        let other = dir.path().join("elsewhere").join("titles.json");
        std::fs::create_dir_all(other.parent().unwrap()).unwrap();
        TitleVocabulary::from_titles(["x", "y", "z"]).save(&other).unwrap();

        assert_eq!(ckpt.load_vocabulary().unwrap().len(), 3);
        assert_eq!(ckpt.load_vocabulary_from(Some(&other)).unwrap().len(), 4);
        assert!(ckpt.load_vocabulary_from(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn test_open_requires_metadata() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CheckpointManager::open(dir.path()).is_err());
    }
}
