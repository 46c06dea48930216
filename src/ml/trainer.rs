// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Full train + validation loop using Burn's DataLoader and Adam.
//
// Burn 0.20 notes:
//   - Training runs on an AutodiffBackend for gradients
//   - model.valid() returns the model on the inner backend, with
//     dropout disabled, so validation batches use that backend too
//   - argmax(1) returns [batch, 1]; reshape before comparing
//
// Per epoch:
//   train pass → validation pass → metrics.csv row → checkpoint
//   → best epoch (lowest validation loss) recorded in the metadata
//
// After the last epoch the best weights are reloaded and scored on
// the test split.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{DataLoaderBuilder, Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{TrajectoryBatch, TrajectoryBatcher},
    dataset::TrajectoryDataset,
};
use crate::domain::career::TrajectoryInstance;
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::evaluator::{evaluate, EvalMetrics};
use crate::ml::model::{TrajectoryModel, TrajectoryModelConfig};
use crate::ml::{TrainBackend, WgpuDevice};

pub struct TrainingSplits {
    pub train:      TrajectoryDataset,
    pub validation: TrajectoryDataset,
    pub test:       TrajectoryDataset,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub epochs:        Vec<EpochMetrics>,
    pub best_epoch:    Option<usize>,
    pub best_val_loss: Option<f64>,
    pub test:          Option<EvalMetrics>,
}

pub fn run_training(
    cfg:       &TrainConfig,
    model_cfg: &TrajectoryModelConfig,
    splits:    TrainingSplits,
    ckpt:      &CheckpointManager,
    meta:      CheckpointMeta,
) -> Result<TrainOutcome> {
    let device = WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop::<TrainBackend>(cfg, model_cfg, splits, ckpt, meta, device)
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:       &TrainConfig,
    model_cfg: &TrajectoryModelConfig,
    splits:    TrainingSplits,
    ckpt:      &CheckpointManager,
    mut meta:  CheckpointMeta,
    device:    B::Device,
) -> Result<TrainOutcome> {
    if splits.train.is_empty() {
        anyhow::bail!("The training split is empty; move the validation cutoff later or add data");
    }
    let has_test = !splits.test.is_empty();

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: TrajectoryModel<B> = model_cfg.init(&device);
    tracing::info!(
        "Model ready: vocab={} embedding={} hidden={}x2 layers={}",
        model_cfg.vocab_size, model_cfg.embedding_dim, model_cfg.hidden_dim, model_cfg.num_layers,
    );

    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::<B, TrajectoryInstance, TrajectoryBatch<B>>::new(TrajectoryBatcher)
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers)
        .set_device(device.clone())
        .build(splits.train);

    let val_loader = DataLoaderBuilder::<B::InnerBackend, TrajectoryInstance, TrajectoryBatch<B::InnerBackend>>::new(TrajectoryBatcher)
        .batch_size(cfg.batch_size)
        .num_workers(cfg.num_workers)
        .set_device(device.clone())
        .build(splits.validation);

    let test_loader = DataLoaderBuilder::<B::InnerBackend, TrajectoryInstance, TrajectoryBatch<B::InnerBackend>>::new(TrajectoryBatcher)
        .batch_size(cfg.batch_size)
        .num_workers(cfg.num_workers)
        .set_device(device.clone())
        .build(splits.test);

    let logger = MetricsLogger::new(ckpt.dir())?;
    let mut history = Vec::with_capacity(cfg.epochs);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_loss_sum = 0.0f64;
        let mut head_loss_sum  = [0.0f64; 3];
        let mut train_samples  = 0usize;

        for batch in train_loader.iter() {
            let n = batch.lengths.dims()[0];
            let (loss, parts, _) = model.forward_loss(batch, &cfg.loss)?;
            train_loss_sum   += parts.total * n as f64;
            head_loss_sum[0] += parts.next_title * n as f64;
            head_loss_sum[1] += parts.tenure * n as f64;
            head_loss_sum[2] += parts.hireability * n as f64;
            train_samples    += n;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.lr, model, grads);
        }

        let avg_train_loss = if train_samples > 0 {
            train_loss_sum / train_samples as f64
        } else { f64::NAN };
        if train_samples > 0 {
            let [next, tenure, hire] = head_loss_sum.map(|l| l / train_samples as f64);
            tracing::debug!(
                "Epoch {} unweighted head losses: next_title={:.4} tenure={:.4} hireability={:.4}",
                epoch, next, tenure, hire,
            );
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let val         = evaluate(&model_valid, val_loader.iter(), &cfg.loss)?;
        let metrics     = EpochMetrics::new(epoch, avg_train_loss, &val);

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | next_acc={:.1}% | tenure_mae={:.2} | hire_acc={:.1}%",
            epoch, cfg.epochs, avg_train_loss, val.loss,
            val.next_title_acc * 100.0, val.tenure_mae, val.hireability_acc * 100.0,
        );
        logger.log(&metrics)?;

        ckpt.save_model(&model, epoch)?;
        meta.latest_epoch = Some(epoch);
        if metrics.is_improvement(meta.best_val_loss.unwrap_or(f64::NAN)) {
            meta.best_epoch    = Some(epoch);
            meta.best_val_loss = (!val.is_empty()).then_some(val.loss);
            tracing::info!("New best epoch {}", epoch);
        }
        ckpt.save_meta(&meta)?;
        history.push(metrics);
    }

    // ── Held-out test on the best weights ─────────────────────────────────────
    let test = match (meta.best_epoch, has_test) {
        (Some(best), true) => {
            let best_model = ckpt
                .load_model(model_cfg.init::<B::InnerBackend>(&device), best, &device)
                .context("Cannot reload the best epoch for test evaluation")?;
            Some(evaluate(&best_model, test_loader.iter(), &cfg.loss)?)
        }
        _ => None,
    };

    tracing::info!("Training complete!");
    Ok(TrainOutcome {
        epochs:        history,
        best_epoch:    meta.best_epoch,
        best_val_loss: meta.best_val_loss,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use chrono::NaiveDate;

    type B = Autodiff<NdArray>;

    fn inst(person: &str, history: Vec<u32>, next: u32) -> TrajectoryInstance {
        TrajectoryInstance {
            person_id:     person.into(),
            history,
            next_title_id: next,
            tenure_months: 18.0,
            hireable:      next % 2 == 0,
            anchor_date:   NaiveDate::from_ymd_opt(2019, 3, 1).unwrap(),
        }
    }

    fn dataset(items: Vec<TrajectoryInstance>) -> TrajectoryDataset {
        TrajectoryDataset::new(items).unwrap()
    }

    fn tiny_config() -> (TrainConfig, TrajectoryModelConfig) {
        let cfg = TrainConfig {
            epochs:      2,
            batch_size:  2,
            num_workers: 1,
            lr:          1e-2,
            ..TrainConfig::default()
        };
        let model = TrajectoryModelConfig::new(5)
            .with_embedding_dim(4)
            .with_hidden_dim(4)
            .with_head_hidden_dim(6)
            .with_dropout(0.0);
        (cfg, model)
    }

    #[test]
    fn test_two_epochs_checkpoint_and_log() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let (cfg, model_cfg) = tiny_config();
        let meta = CheckpointMeta::new(cfg.clone(), model_cfg.clone());

        let splits = TrainingSplits {
            train: dataset(vec![
                inst("a", vec![1], 2),
                inst("a", vec![1, 2], 3),
                inst("b", vec![2], 4),
                inst("b", vec![2, 4], 1),
            ]),
            validation: dataset(vec![inst("c", vec![1], 2)]),
            test:       dataset(vec![inst("d", vec![3], 4), inst("d", vec![3, 4], 2)]),
        };

        let out = train_loop::<B>(&cfg, &model_cfg, splits, &ckpt, meta, Default::default()).unwrap();
        assert_eq!(out.epochs.len(), 2);
        assert!(out.epochs.iter().all(|e| e.train_loss.is_finite() && e.val_loss.is_finite()));
        assert!(out.best_epoch.is_some());
        assert_eq!(out.test.map(|t| t.samples), Some(2));

        let meta = ckpt.load_meta().unwrap();
        assert_eq!(meta.latest_epoch, Some(2));
        assert_eq!(meta.best_epoch, out.best_epoch);

        let csv = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_without_validation_latest_epoch_is_best() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let (cfg, model_cfg) = tiny_config();
        let meta = CheckpointMeta::new(cfg.clone(), model_cfg.clone());

        let splits = TrainingSplits {
            train:      dataset(vec![inst("a", vec![1], 2), inst("a", vec![1, 2], 3)]),
            validation: dataset(Vec::new()),
            test:       dataset(Vec::new()),
        };

        let out = train_loop::<B>(&cfg, &model_cfg, splits, &ckpt, meta, Default::default()).unwrap();
        assert_eq!(out.best_epoch, Some(2));
        assert_eq!(out.best_val_loss, None);
        assert!(out.test.is_none());
    }

    #[test]
    fn test_empty_training_split_is_rejected() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let (cfg, model_cfg) = tiny_config();
        let meta = CheckpointMeta::new(cfg.clone(), model_cfg.clone());
        let splits = TrainingSplits {
            train:      dataset(Vec::new()),
            validation: dataset(Vec::new()),
            test:       dataset(Vec::new()),
        };
        assert!(train_loop::<B>(&cfg, &model_cfg, splits, &ckpt, meta, Default::default()).is_err());
    }
}
