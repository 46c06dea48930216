// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Single-history prediction for the `predict` command:
//
//   titles ──vocab──► ids (unknown → 0) ──► model ──► top-k titles
//                                              ├──► tenure range
//                                              └──► hireability
//
// The top-1 confidence is passed through the calibrator when one has
// been fit for this checkpoint.

use anyhow::Result;
use burn::{prelude::*, tensor::{activation::softmax, TensorData}};
use serde::Serialize;

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::domain::vocabulary::{TitleVocabulary, UNKNOWN_ID};
use crate::infra::checkpoint::{CheckpointManager, CALIBRATOR_FILE};
use crate::ml::calibration::IsotonicCalibrator;
use crate::ml::evaluator::{to_f32, top_k};
use crate::ml::model::TrajectoryModel;

#[derive(Debug, Clone, Serialize)]
pub struct RankedTitle {
    pub id:          u32,
    pub title:       String,
    pub probability: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub next_titles:           Vec<RankedTitle>,
    pub tenure_min_months:     f32,
    pub tenure_max_months:     f32,
    pub hireability:           f32,
    pub calibrated_confidence: Option<f32>,
    /// Input titles the vocabulary has never seen.
    pub unknown_titles:        Vec<String>,
}

pub struct Inferencer<B: Backend> {
    model:       TrajectoryModel<B>,
    vocab:       TitleVocabulary,
    calibrator:  Option<IsotonicCalibrator>,
    max_history: usize,
    device:      B::Device,
}

impl<B: Backend> Inferencer<B> {
    pub fn new(
        model:       TrajectoryModel<B>,
        vocab:       TitleVocabulary,
        calibrator:  Option<IsotonicCalibrator>,
        max_history: usize,
        device:      B::Device,
    ) -> Self {
        Self { model, vocab, calibrator, max_history, device }
    }

    /// Loads the best checkpoint, its vocabulary and, if present, its
    /// calibrator.
    pub fn from_checkpoint(ckpt: &CheckpointManager, device: B::Device) -> Result<Self> {
        let vocab         = ckpt.load_vocabulary()?;
        let (model, meta) = ckpt.restore_model::<B>(&vocab, &device)?;

        let cal_path   = ckpt.path(CALIBRATOR_FILE);
        let calibrator = if cal_path.exists() {
            Some(IsotonicCalibrator::load_for(&cal_path, vocab.len())?)
        } else {
            tracing::info!("No calibrator in '{}'; confidences are raw", ckpt.dir().display());
            None
        };

        tracing::info!("Model loaded from checkpoint");
        Ok(Self::new(model, vocab, calibrator, meta.train.max_history, device))
    }

    pub fn predict<S: AsRef<str>>(&self, history: &[S], k: usize) -> TrajectoryResult<Prediction> {
        if history.is_empty() {
            return Err(TrajectoryError::EmptySequence { row: 0 });
        }
        let from   = history.len().saturating_sub(self.max_history.max(1));
        let recent = &history[from..];

        let ids: Vec<u32> = recent.iter().map(|t| self.vocab.get(t.as_ref())).collect();
        let unknown_titles = recent
            .iter()
            .zip(&ids)
            .filter(|(_, &id)| id == UNKNOWN_ID)
            .map(|(t, _)| t.as_ref().to_string())
            .collect();

        let len       = ids.len();
        let title_ids = Tensor::<B, 2, Int>::from_data(
            TensorData::new(ids.iter().map(|&i| i as i64).collect::<Vec<_>>(), [1, len]),
            &self.device,
        );
        let lengths = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![len as i64], [1]), &self.device);

        let out    = self.model.forward(title_ids, lengths)?;
        let probs  = to_f32(softmax(out.next_role_logits, 1));
        let tenure = to_f32(out.tenure_pred);
        let hire   = to_f32(out.hireability);

        let next_titles: Vec<RankedTitle> = top_k(&probs, k.max(1))
            .into_iter()
            .map(|(id, probability)| RankedTitle {
                id:    id as u32,
                title: self.vocab.title_of(id as u32).to_string(),
                probability,
            })
            .collect();

        let calibrated_confidence = match (&self.calibrator, next_titles.first()) {
            (Some(cal), Some(top)) => Some(cal.calibrate(top.probability)),
            _ => None,
        };

        tracing::debug!("Predicted {:?} for {} titles", next_titles.first().map(|t| &t.title), len);

        Ok(Prediction {
            next_titles,
            tenure_min_months: tenure[0],
            tenure_max_months: tenure[1],
            hireability: hire[0],
            calibrated_confidence,
            unknown_titles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::calibration::ConfidenceSample;
    use crate::ml::model::TrajectoryModelConfig;
    use burn::backend::NdArray;

    type B = NdArray;

    fn inferencer(calibrated: bool) -> Inferencer<B> {
        let vocab = TitleVocabulary::from_titles(["analyst", "engineer", "senior engineer", "manager"]);
        let model = TrajectoryModelConfig::new(vocab.len())
            .with_embedding_dim(4)
            .with_hidden_dim(4)
            .with_head_hidden_dim(6)
            .with_dropout(0.0)
            .init(&Default::default());
        let calibrator = calibrated.then(|| {
            IsotonicCalibrator::fit(
                &[
                    ConfidenceSample { confidence: 0.1, correct: false },
                    ConfidenceSample { confidence: 0.9, correct: true },
                ],
                vocab.len(),
            )
            .unwrap()
        });
        Inferencer::new(model, vocab, calibrator, 3, Default::default())
    }

    #[test]
    fn test_prediction_shape_and_ranges() {
        let p = inferencer(false).predict(&["Analyst", "Engineer"], 3).unwrap();
        assert_eq!(p.next_titles.len(), 3);
        assert!(p.next_titles.windows(2).all(|w| w[0].probability >= w[1].probability));
        assert!(p.tenure_min_months <= p.tenure_max_months);
        assert!((0.0..=1.0).contains(&p.hireability));
        assert!(p.unknown_titles.is_empty());
        assert!(p.calibrated_confidence.is_none());
    }

    #[test]
    fn test_unknown_titles_are_reported_not_fatal() {
        let p = inferencer(true).predict(&["astronaut", "engineer"], 1).unwrap();
        assert_eq!(p.unknown_titles, vec!["astronaut".to_string()]);
        assert!(p.calibrated_confidence.is_some());
    }

    #[test]
    fn test_long_history_is_truncated() {
        let inf  = inferencer(false);
        let long = ["analyst", "manager", "analyst", "engineer", "senior engineer"];
        let a = inf.predict(&long, 2).unwrap();
        let b = inf.predict(&long[2..], 2).unwrap();
        assert_eq!(a.next_titles[0].id, b.next_titles[0].id);
        assert!((a.hireability - b.hireability).abs() < 1e-6);
    }

    #[test]
    fn test_empty_history_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            inferencer(false).predict(&empty, 1),
            Err(TrajectoryError::EmptySequence { row: 0 })
        ));
    }
}
