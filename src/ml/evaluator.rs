// ============================================================
// Layer 5 — Evaluation
// ============================================================
// Full passes over a split with a frozen model. Used by the trainer
// (validation + final test), by calibration (confidence collection)
// and by the predict command (top-k decoding).
//
// Metrics per pass:
//   loss             weighted total, averaged per sample
//   next_title_acc   argmax == label
//   tenure_mae       |midpoint(min, max) − target| in months
//   hireability_acc  (p ≥ 0.5) == label

use burn::{prelude::*, tensor::activation::softmax};
use serde::{Deserialize, Serialize};

use crate::data::batcher::TrajectoryBatch;
use crate::domain::error::TrajectoryResult;
use crate::ml::calibration::ConfidenceSample;
use crate::ml::model::{LossConfig, TrajectoryModel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss:            f64,
    pub next_title_acc:  f64,
    pub tenure_mae:      f64,
    pub hireability_acc: f64,
    pub samples:         usize,
}

impl EvalMetrics {
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

#[derive(Default)]
struct Accumulator {
    loss_sum:     f64,
    title_hits:   usize,
    tenure_err:   f64,
    hire_hits:    usize,
    samples:      usize,
}

impl Accumulator {
    fn finish(self) -> EvalMetrics {
        if self.samples == 0 {
            return EvalMetrics { loss: f64::NAN, ..EvalMetrics::default() };
        }
        let n = self.samples as f64;
        EvalMetrics {
            loss:            self.loss_sum / n,
            next_title_acc:  self.title_hits as f64 / n,
            tenure_mae:      self.tenure_err / n,
            hireability_acc: self.hire_hits as f64 / n,
            samples:         self.samples,
        }
    }
}

pub fn evaluate<B: Backend>(
    model:   &TrajectoryModel<B>,
    batches: impl IntoIterator<Item = TrajectoryBatch<B>>,
    weights: &LossConfig,
) -> TrajectoryResult<EvalMetrics> {
    let mut acc = Accumulator::default();

    for batch in batches {
        let [n]     = batch.lengths.dims();
        let labels  = to_i64(batch.next_title_ids.clone());
        let tenure  = to_f32(batch.tenure_targets.clone());
        let hire    = to_f32(batch.hireable.clone());

        let (_, loss, out) = model.forward_loss(batch, weights)?;

        let predicted = to_i64(out.next_role_logits.argmax(1).reshape([n]));
        let band      = to_f32(out.tenure_pred.reshape([n * 2]));
        let probs     = to_f32(out.hireability);

        acc.loss_sum   += loss.total * n as f64;
        acc.title_hits += predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
        acc.tenure_err += band
            .chunks(2)
            .zip(&tenure)
            .map(|(b, t)| (((b[0] + b[1]) / 2.0) - t).abs() as f64)
            .sum::<f64>();
        acc.hire_hits  += probs
            .iter()
            .zip(&hire)
            .filter(|(p, y)| (**p >= 0.5) == (**y >= 0.5))
            .count();
        acc.samples    += n;
    }

    Ok(acc.finish())
}

/// `(max softmax probability, argmax == label)` per sample.
pub fn collect_confidences<B: Backend>(
    model:   &TrajectoryModel<B>,
    batches: impl IntoIterator<Item = TrajectoryBatch<B>>,
) -> TrajectoryResult<Vec<ConfidenceSample>> {
    let mut samples = Vec::new();

    for batch in batches {
        let labels = to_i64(batch.next_title_ids);
        let out    = model.forward(batch.title_ids, batch.lengths)?;
        let [_, v] = out.next_role_logits.dims();
        let probs  = to_f32(softmax(out.next_role_logits, 1));

        for (row, &label) in probs.chunks(v).zip(&labels) {
            let (best, conf) = argmax(row);
            samples.push(ConfidenceSample {
                confidence: conf,
                correct:    best as i64 == label,
            });
        }
    }

    Ok(samples)
}

/// The `k` most probable ids of one probability row, best first.
/// Ties keep the lower id first.
pub fn top_k(row: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

fn argmax(row: &[f32]) -> (usize, f32) {
    row.iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best })
}

pub(crate) fn to_f32<B: Backend, const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data().iter::<f32>().collect()
}

pub(crate) fn to_i64<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> Vec<i64> {
    t.into_data().iter::<i64>().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::collate;
    use crate::domain::career::TrajectoryInstance;
    use crate::ml::model::TrajectoryModelConfig;
    use burn::backend::NdArray;
    use chrono::NaiveDate;

    type B = NdArray;

    fn inst(history: Vec<u32>, next: u32, hireable: bool) -> TrajectoryInstance {
        TrajectoryInstance {
            person_id:     "p".into(),
            history,
            next_title_id: next,
            tenure_months: 10.0,
            hireable,
            anchor_date:   NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
        }
    }

    fn model() -> TrajectoryModel<B> {
        TrajectoryModelConfig::new(5)
            .with_embedding_dim(4)
            .with_hidden_dim(4)
            .with_head_hidden_dim(6)
            .with_dropout(0.0)
            .init(&Default::default())
    }

    fn batches() -> Vec<TrajectoryBatch<B>> {
        let device = Default::default();
        vec![
            collate(&[inst(vec![1], 2, true), inst(vec![1, 2], 3, true)]).unwrap().to_tensors(&device),
            collate(&[inst(vec![3, 4, 2], 1, false)]).unwrap().to_tensors(&device),
        ]
    }

    #[test]
    fn test_metrics_are_in_range() {
        let m = evaluate(&model(), batches(), &LossConfig::default()).unwrap();
        assert_eq!(m.samples, 3);
        assert!(m.loss.is_finite());
        assert!((0.0..=1.0).contains(&m.next_title_acc));
        assert!((0.0..=1.0).contains(&m.hireability_acc));
        assert!(m.tenure_mae >= 0.0);
    }

    #[test]
    fn test_empty_pass() {
        let m = evaluate(&model(), Vec::new(), &LossConfig::default()).unwrap();
        assert!(m.is_empty());
        assert!(m.loss.is_nan());
    }

    #[test]
    fn test_confidences_one_per_sample() {
        let c = collect_confidences(&model(), batches()).unwrap();
        assert_eq!(c.len(), 3);
        // max of a 5-way softmax is at least 1/5
        assert!(c.iter().all(|s| s.confidence >= 0.2 - 1e-6 && s.confidence <= 1.0));
    }

    #[test]
    fn test_top_k_orders_by_probability() {
        let row = [0.1, 0.4, 0.05, 0.4, 0.05];
        assert_eq!(top_k(&row, 3), vec![(1, 0.4), (3, 0.4), (0, 0.1)]);
        assert_eq!(top_k(&row, 10).len(), 5);
    }
}
