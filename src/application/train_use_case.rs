// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load employment rows        (Layer 4 - data)
//   Step 2: Build sequences + vocab     (Layer 4 - data)
//   Step 3: Freeze + save vocabulary    (Layer 3 / 6)
//   Step 4: Temporal split by person    (Layer 4 - data)
//   Step 5: Build Burn datasets         (Layer 4 - data)
//   Step 6: Save checkpoint metadata    (Layer 6 - infra)
//   Step 7: Run training loop           (Layer 5 - ml)
//   Step 8: Write train_report.json     (Layer 6 - infra)
//
// Steps 1, 2 and 4 are shared with `calibrate`, which rebuilds the
// same splits against the frozen vocabulary.

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::{
    builder::{BuildStats, BuilderConfig, SequenceDatasetBuilder},
    dataset::TrajectoryDataset,
    loader::{SqliteCareerSource, DEFAULT_QUERY},
    splitter::{split_temporal, SplitCutoffs, TemporalSplit},
};
use crate::domain::traits::{CareerSource, Persistable};
use crate::domain::vocabulary::TitleVocabulary;
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta, TRAIN_REPORT_FILE},
    report::TrainReport,
};
use crate::ml::model::{LossConfig, TrajectoryModelConfig};
use crate::ml::trainer::{run_training, train_loop, TrainOutcome, TrainingSplits};

// ─── Training Configuration ──────────────────────────────────────────────────
// Saved inside checkpoint_meta.json so calibrate, export and predict
// rebuild the identical data pipeline and architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub database_url:    String,
    /// Overrides the default six-column employment query.
    pub query:           Option<String>,
    pub checkpoint_dir:  String,
    pub validation_from: NaiveDate,
    pub test_from:       NaiveDate,
    pub max_history:     usize,
    pub tenure_min:      f32,
    pub tenure_max:      f32,
    pub batch_size:      usize,
    pub epochs:          usize,
    pub lr:              f64,
    pub num_workers:     usize,
    pub seed:            u64,
    pub embedding_dim:   usize,
    pub hidden_dim:      usize,
    pub num_layers:      usize,
    pub head_hidden_dim: usize,
    pub dropout:         f64,
    #[serde(default)]
    pub loss:            LossConfig,
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

impl Default for TrainConfig {
    fn default() -> Self {
        let builder = BuilderConfig::default();
        Self {
            database_url:    "data/careers.db".to_string(),
            query:           None,
            checkpoint_dir:  "checkpoints".to_string(),
            validation_from: ymd(2021, 1, 1),
            test_from:       ymd(2022, 1, 1),
            max_history:     builder.max_history,
            tenure_min:      builder.tenure_min,
            tenure_max:      builder.tenure_max,
            batch_size:      32,
            epochs:          10,
            lr:              1e-3,
            num_workers:     2,
            seed:            42,
            embedding_dim:   64,
            hidden_dim:      128,
            num_layers:      2,
            head_hidden_dim: 128,
            dropout:         0.2,
            loss:            LossConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            max_history: self.max_history,
            tenure_min:  self.tenure_min,
            tenure_max:  self.tenure_max,
        }
    }

    pub fn cutoffs(&self) -> Result<SplitCutoffs> {
        Ok(SplitCutoffs::new(self.validation_from, self.test_from)?)
    }

    pub fn model_config(&self, vocab_size: usize) -> TrajectoryModelConfig {
        TrajectoryModelConfig::new(vocab_size)
            .with_embedding_dim(self.embedding_dim)
            .with_hidden_dim(self.hidden_dim)
            .with_num_layers(self.num_layers)
            .with_head_hidden_dim(self.head_hidden_dim)
            .with_dropout(self.dropout)
    }

    pub fn source(&self) -> Result<SqliteCareerSource> {
        let query = self.query.clone().unwrap_or_else(|| DEFAULT_QUERY.to_string());
        Ok(SqliteCareerSource::from_url(&self.database_url, query)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.epochs == 0 {
            anyhow::bail!("epochs must be at least 1");
        }
        if !(self.lr > 0.0) {
            anyhow::bail!("learning rate must be positive, got {}", self.lr);
        }
        Ok(())
    }
}

// ─── Shared data preparation ──────────────────────────────────────────────────
/// Instances per split plus the builder's counters.
pub struct PreparedData {
    pub split: TemporalSplit,
    pub stats: BuildStats,
}

/// Load → build → split. An open `vocab` grows with every title seen;
/// a frozen one maps unseen titles to id 0.
pub fn prepare_data(
    source: &dyn CareerSource,
    cfg:    &TrainConfig,
    vocab:  &mut TitleVocabulary,
) -> Result<PreparedData> {
    let records = source.load_records().context("Cannot load employment records")?;

    let builder = SequenceDatasetBuilder::new(cfg.builder_config())?;
    let built   = builder.build(records, vocab);
    if built.stats.skipped() > 0 {
        tracing::warn!("Skipped {} people with data-quality problems", built.stats.skipped());
    }
    tracing::info!(
        "Built {} instances from {} of {} people",
        built.stats.instances,
        built.stats.people_used,
        built.stats.people_seen,
    );

    let split = split_temporal(built.instances, &cfg.cutoffs()?);
    Ok(PreparedData { split, stats: built.stats })
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Runs the pipeline on the configured SQLite store and the WGPU backend.
    pub fn execute(&self) -> Result<TrainReport> {
        let source = self.config.source()?;
        self.execute_with(&source, |cfg, model_cfg, splits, ckpt, meta| {
            run_training(cfg, model_cfg, splits, ckpt, meta)
        })
    }

    /// Same pipeline on any autodiff backend and record source.
    pub fn execute_on<B: AutodiffBackend>(
        &self,
        source: &dyn CareerSource,
        device: B::Device,
    ) -> Result<TrainReport> {
        self.execute_with(source, |cfg, model_cfg, splits, ckpt, meta| {
            train_loop::<B>(cfg, model_cfg, splits, ckpt, meta, device)
        })
    }

    fn execute_with<F>(&self, source: &dyn CareerSource, train: F) -> Result<TrainReport>
    where
        F: FnOnce(&TrainConfig, &TrajectoryModelConfig, TrainingSplits, &CheckpointManager, CheckpointMeta) -> Result<TrainOutcome>,
    {
        let cfg = &self.config;
        cfg.validate()?;
        cfg.cutoffs()?;

        // ── Steps 1–2: rows → sequences, growing the vocabulary ──────────────
        tracing::info!("Loading employment records from '{}'", cfg.database_url);
        let mut vocab = TitleVocabulary::new();
        let data      = prepare_data(source, cfg, &mut vocab)?;

        // ── Step 3: freeze the vocabulary every later phase will load ────────
        vocab.freeze();
        if vocab.is_empty() {
            anyhow::bail!("No usable job titles were found; nothing to train on");
        }
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir)?;
        vocab
            .save(ckpt.vocab_path())
            .with_context(|| format!("Cannot save vocabulary to '{}'", ckpt.vocab_path().display()))?;
        tracing::info!("Vocabulary frozen at {} ids (0 = <unk>)", vocab.len());

        // ── Steps 4–5: people-level split → Burn datasets ────────────────────
        let summary = data.split.summary();
        let splits  = TrainingSplits {
            train:      TrajectoryDataset::new(data.split.train)?,
            validation: TrajectoryDataset::new(data.split.validation)?,
            test:       TrajectoryDataset::new(data.split.test)?,
        };

        // ── Step 6: metadata first, so a crashed run is still inspectable ────
        let model_cfg = cfg.model_config(vocab.len());
        model_cfg.validate()?;
        let meta = CheckpointMeta::new(cfg.clone(), model_cfg.clone());
        ckpt.save_meta(&meta)?;

        // ── Step 7: train ─────────────────────────────────────────────────────
        let outcome = train(cfg, &model_cfg, splits, &ckpt, meta)?;

        // ── Step 8: report ────────────────────────────────────────────────────
        let report = TrainReport {
            vocab_size:    vocab.len(),
            build:         data.stats,
            split:         summary,
            epochs:        outcome.epochs,
            best_epoch:    outcome.best_epoch,
            best_val_loss: outcome.best_val_loss,
            test:          outcome.test,
        };
        report.save(ckpt.path(TRAIN_REPORT_FILE))?;
        report.log_summary();
        Ok(report)
    }
}
