// ============================================================
// Layer 5 — Trajectory Model
// ============================================================
// Embedding → 2-layer BiLSTM encoder → three heads.
//
//   title_ids [b, s] ──► Embedding [b, s, e]  (id 0 zeroed)
//                           │
//                           ▼  packed on true lengths
//                     TrajectoryEncoder ──► summary [b, 2h]
//                           │
//        ┌──────────────────┼──────────────────┐
//        ▼                  ▼                  ▼
//   next_role_logits    tenure_pred       hireability
//       [b, V]            [b, 2]              [b]
//
// Loss = w1·CE(next) + w2·Huber(tenure band) + w3·BCE(hireability)

use burn::{
    nn::{
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
    },
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::TrajectoryBatch;
use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::ml::encoder::{TrajectoryEncoder, TrajectoryEncoderConfig};
use crate::ml::heads::{
    HireabilityHead, MlpHeadConfig, NextTitleHead, TenureHead, TrajectoryHead,
};
use crate::ml::packing::host_lengths;

#[derive(Config, Debug)]
pub struct TrajectoryModelConfig {
    pub vocab_size:      usize,
    #[config(default = 64)]
    pub embedding_dim:   usize,
    /// Per direction.
    #[config(default = 128)]
    pub hidden_dim:      usize,
    #[config(default = 2)]
    pub num_layers:      usize,
    #[config(default = 128)]
    pub head_hidden_dim: usize,
    #[config(default = 0.2)]
    pub dropout:         f64,
}

impl TrajectoryModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TrajectoryModel<B> {
        let encoder = TrajectoryEncoderConfig::new(self.embedding_dim, self.hidden_dim)
            .with_num_layers(self.num_layers)
            .with_dropout(self.dropout)
            .init(device);
        let summary_dim = encoder.output_dim();
        let head = |d_output: usize| {
            MlpHeadConfig::new(summary_dim, self.head_hidden_dim, d_output)
                .with_dropout(self.dropout)
                .init(device)
        };

        TrajectoryModel {
            embedding:   EmbeddingConfig::new(self.vocab_size, self.embedding_dim).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
            encoder,
            next_title:  NextTitleHead { mlp: head(self.vocab_size) },
            tenure:      TenureHead { mlp: head(2) },
            hireability: HireabilityHead { mlp: head(1) },
            vocab_size:  self.vocab_size,
        }
    }

    pub fn validate(&self) -> TrajectoryResult<()> {
        if self.vocab_size < 2 {
            return Err(TrajectoryError::config(
                "model config",
                format!("vocab_size {} leaves no room for a title besides id 0", self.vocab_size),
            ));
        }
        if self.num_layers == 0 || self.hidden_dim == 0 || self.embedding_dim == 0 {
            return Err(TrajectoryError::config(
                "model config",
                "num_layers, hidden_dim and embedding_dim must all be positive",
            ));
        }
        Ok(())
    }
}

/// Weights of the three head losses plus the tenure loss shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    pub next_title_weight:  f32,
    pub tenure_weight:      f32,
    pub hireability_weight: f32,
    /// Huber transition point, in months.
    pub huber_delta:        f32,
    /// The tenure head is trained toward [t·(1−band), t·(1+band)].
    pub tenure_band:        f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            next_title_weight:  1.0,
            tenure_weight:      0.5,
            hireability_weight: 0.5,
            huber_delta:        6.0,
            tenure_band:        0.25,
        }
    }
}

#[derive(Module, Debug)]
pub struct TrajectoryModel<B: Backend> {
    pub embedding:   Embedding<B>,
    pub dropout:     Dropout,
    pub encoder:     TrajectoryEncoder<B>,
    pub next_title:  NextTitleHead<B>,
    pub tenure:      TenureHead<B>,
    pub hireability: HireabilityHead<B>,
    pub vocab_size:  usize,
}

pub struct TrajectoryOutput<B: Backend> {
    /// [batch, vocab_size]
    pub next_role_logits: Tensor<B, 2>,
    /// [batch, 2]
    pub tenure_pred:      Tensor<B, 2>,
    /// [batch]
    pub hireability:      Tensor<B, 1>,
}

/// Scalar loss values for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossBreakdown {
    pub total:       f64,
    pub next_title:  f64,
    pub tenure:      f64,
    pub hireability: f64,
}

impl<B: Backend> TrajectoryModel<B> {
    /// Row count of the embedding table; must equal the vocabulary size.
    pub fn embedding_rows(&self) -> usize {
        self.embedding.weight.dims()[0]
    }

    /// title_ids [batch, seq] + lengths [batch] → summary [batch, 2 * hidden].
    pub fn summarize(
        &self,
        title_ids: Tensor<B, 2, Int>,
        lengths:   Tensor<B, 1, Int>,
    ) -> TrajectoryResult<Tensor<B, 2>> {
        let [batch, seq_len] = title_ids.dims();
        let lengths          = host_lengths(lengths, batch, seq_len)?;

        // id 0 (unknown / padding) always embeds to the zero vector
        let keep = title_ids
            .clone()
            .not_equal_elem(0)
            .float()
            .reshape([batch, seq_len, 1]);
        let embedded = self.embedding.forward(title_ids);
        let [_, _, dim] = embedded.dims();
        let embedded = embedded * keep.expand([batch, seq_len, dim]);

        self.encoder.forward(self.dropout.forward(embedded), &lengths)
    }

    pub fn forward(
        &self,
        title_ids: Tensor<B, 2, Int>,
        lengths:   Tensor<B, 1, Int>,
    ) -> TrajectoryResult<TrajectoryOutput<B>> {
        let summary = self.summarize(title_ids, lengths)?;
        Ok(TrajectoryOutput {
            next_role_logits: self.next_title.predict(summary.clone()),
            tenure_pred:      self.tenure.predict(summary.clone()),
            hireability:      self.hireability.predict(summary),
        })
    }

    /// Weighted sum of the three head losses.
    pub fn forward_loss(
        &self,
        batch:   TrajectoryBatch<B>,
        weights: &LossConfig,
    ) -> TrajectoryResult<(Tensor<B, 1>, LossBreakdown, TrajectoryOutput<B>)> {
        let output = self.forward(batch.title_ids, batch.lengths)?;
        let device = output.next_role_logits.device();

        let ce = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(output.next_role_logits.clone(), batch.next_title_ids);
        let tenure = huber(
            output.tenure_pred.clone(),
            tenure_band_targets(batch.tenure_targets, weights.tenure_band),
            weights.huber_delta,
        );
        let bce = binary_cross_entropy(output.hireability.clone(), batch.hireable);

        let total = ce.clone() * weights.next_title_weight
            + tenure.clone() * weights.tenure_weight
            + bce.clone() * weights.hireability_weight;

        let breakdown = LossBreakdown {
            total:       scalar(&total),
            next_title:  scalar(&ce),
            tenure:      scalar(&tenure),
            hireability: scalar(&bce),
        };
        Ok((total, breakdown, output))
    }
}

/// [batch] targets → [batch, 2] lower/upper band.
pub fn tenure_band_targets<B: Backend>(targets: Tensor<B, 1>, band: f32) -> Tensor<B, 2> {
    let [batch] = targets.dims();
    let lower   = (targets.clone() * (1.0 - band)).reshape([batch, 1]);
    let upper   = (targets * (1.0 + band)).reshape([batch, 1]);
    Tensor::cat(vec![lower, upper], 1)
}

/// Mean Huber loss: quadratic inside ±delta, linear outside.
pub fn huber<B: Backend, const D: usize>(pred: Tensor<B, D>, target: Tensor<B, D>, delta: f32) -> Tensor<B, 1> {
    let abs       = (pred - target).abs();
    let quadratic = abs.clone().clamp_max(delta);
    let linear    = abs - quadratic.clone();
    (quadratic.powf_scalar(2.0) * 0.5 + linear * delta).mean()
}

const BCE_EPS: f32 = 1e-6;

/// Mean binary cross-entropy on probabilities.
pub fn binary_cross_entropy<B: Backend>(probs: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    let p   = probs.clamp(BCE_EPS, 1.0 - BCE_EPS);
    let pos = targets.clone() * p.clone().log();
    let neg = targets.neg().add_scalar(1.0) * p.neg().add_scalar(1.0).log();
    (pos + neg).mean().neg()
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}
