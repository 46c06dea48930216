// ============================================================
// Layer 5b — Numerical Parity
// ============================================================
// Runs the in-memory model and an exported artifact on the same
// seeded random inputs and reports the worst absolute difference
// across all three outputs.
//
// Each probe shape (batch, seq) gets ids drawn from the whole
// vocabulary (unknown id 0 included) and lengths in 1..=seq, with
// row 0 always full so the padded width is really exercised.

use burn::{prelude::*, tensor::TensorData};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::export::graph::GraphArtifact;
use crate::export::runtime::GraphSession;
use crate::ml::evaluator::to_f32;
use crate::ml::model::TrajectoryModel;

/// One probe input in host form.
#[derive(Debug, Clone)]
pub struct Probe {
    pub batch:     usize,
    pub seq:       usize,
    pub title_ids: Vec<i64>,
    pub lengths:   Vec<i64>,
}

impl Probe {
    pub fn random(rng: &mut StdRng, batch: usize, seq: usize, vocab_size: usize) -> Self {
        let title_ids = (0..batch * seq)
            .map(|_| rng.gen_range(0..vocab_size) as i64)
            .collect();
        let lengths = (0..batch)
            .map(|row| if row == 0 { seq as i64 } else { rng.gen_range(1..=seq) as i64 })
            .collect();
        Self { batch, seq, title_ids, lengths }
    }
}

fn max_abs_diff(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max))
}

/// Worst |model − graph| over all outputs of one probe.
pub fn probe_diff<B: Backend>(
    model:  &TrajectoryModel<B>,
    graph:  &GraphArtifact,
    probe:  &Probe,
    device: &B::Device,
) -> TrajectoryResult<f32> {
    let ids = Tensor::<B, 2, Int>::from_data(
        TensorData::new(probe.title_ids.clone(), [probe.batch, probe.seq]),
        device,
    );
    let lengths = Tensor::<B, 1, Int>::from_data(TensorData::new(probe.lengths.clone(), [probe.batch]), device);
    let expected = model.forward(ids, lengths)?;

    let actual = GraphSession::new(graph)?.run(&probe.title_ids, &probe.lengths, probe.batch, probe.seq)?;

    let pairs = [
        ("next_role_logits", to_f32(expected.next_role_logits), &actual.next_role_logits.data),
        ("tenure_pred", to_f32(expected.tenure_pred), &actual.tenure_pred.data),
        ("hireability", to_f32(expected.hireability), &actual.hireability.data),
    ];

    let mut worst = 0.0f32;
    for (name, want, got) in pairs.iter() {
        let diff = max_abs_diff(want, got).ok_or_else(|| {
            TrajectoryError::export(
                graph.strategy.clone(),
                format!("{name} has {} values, model produced {}", got.len(), want.len()),
            )
        })?;
        if diff.is_nan() {
            return Err(TrajectoryError::export(graph.strategy.clone(), format!("{name} produced NaN")));
        }
        worst = worst.max(diff);
    }
    Ok(worst)
}

/// Runs every probe shape and fails if any difference exceeds `tolerance`.
pub fn verify_parity<B: Backend>(
    model:     &TrajectoryModel<B>,
    graph:     &GraphArtifact,
    shapes:    &[(usize, usize)],
    tolerance: f32,
    seed:      u64,
    device:    &B::Device,
) -> TrajectoryResult<f32> {
    let mut rng   = StdRng::seed_from_u64(seed);
    let mut worst = 0.0f32;

    for &(batch, seq) in shapes {
        let probe = Probe::random(&mut rng, batch, seq, model.embedding_rows());
        let diff  = probe_diff(model, graph, &probe, device)?;
        tracing::debug!("Parity [{batch}×{seq}] {}: max |Δ| = {:.2e}", graph.strategy, diff);
        if diff > tolerance {
            return Err(TrajectoryError::export(
                graph.strategy.clone(),
                format!("output differs by {diff:.2e} at shape [{batch}, {seq}] (tolerance {tolerance:.0e})"),
            ));
        }
        worst = worst.max(diff);
    }
    Ok(worst)
}
