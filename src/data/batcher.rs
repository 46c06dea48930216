// ============================================================
// Layer 4 — Batch Collator
// ============================================================
// Turns a Vec<TrajectoryInstance> into model-ready tensors.
//
// Histories have different lengths, so each batch is padded on the
// RIGHT with id 0 up to the longest history in THAT batch:
//
//   [A]        →  [A, 0, 0]   length 1
//   [A, B, C]  →  [A, B, C]   length 3
//   [B, C]     →  [B, C, 0]   length 2
//
// The true lengths travel alongside the padded ids. The model packs
// on them, so padded positions never reach a hidden state.
//
// Collation itself is a pure function over host vectors (easy to
// test); the Burn Batcher only moves its output onto the device.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::career::TrajectoryInstance;
use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::domain::vocabulary::UNKNOWN_ID;

/// Host-side padded batch, row-major `[batch_size, max_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollatedBatch {
    pub batch_size:     usize,
    pub max_len:        usize,
    pub title_ids:      Vec<i64>,
    pub lengths:        Vec<i64>,
    pub next_title_ids: Vec<i64>,
    pub tenure_targets: Vec<f32>,
    pub hireable:       Vec<f32>,
}

impl CollatedBatch {
    pub fn row(&self, r: usize) -> &[i64] {
        &self.title_ids[r * self.max_len..(r + 1) * self.max_len]
    }

    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> TrajectoryBatch<B> {
        let n = self.batch_size;
        TrajectoryBatch {
            title_ids: Tensor::from_data(
                TensorData::new(self.title_ids.clone(), [n, self.max_len]),
                device,
            ),
            lengths:        Tensor::from_data(TensorData::new(self.lengths.clone(), [n]), device),
            next_title_ids: Tensor::from_data(TensorData::new(self.next_title_ids.clone(), [n]), device),
            tenure_targets: Tensor::from_data(TensorData::new(self.tenure_targets.clone(), [n]), device),
            hireable:       Tensor::from_data(TensorData::new(self.hireable.clone(), [n]), device),
        }
    }
}

/// Pad histories to the batch maximum and record true lengths.
/// Fails fast on an empty batch or any zero-length history.
pub fn collate(items: &[TrajectoryInstance]) -> TrajectoryResult<CollatedBatch> {
    if items.is_empty() {
        return Err(TrajectoryError::config("batch", "cannot collate an empty batch"));
    }
    if let Some(row) = items.iter().position(|i| i.history.is_empty()) {
        return Err(TrajectoryError::EmptySequence { row });
    }

    let batch_size = items.len();
    let max_len    = items.iter().map(|i| i.history.len()).max().unwrap_or(0);

    let mut title_ids = vec![UNKNOWN_ID as i64; batch_size * max_len];
    for (r, item) in items.iter().enumerate() {
        for (t, &id) in item.history.iter().enumerate() {
            title_ids[r * max_len + t] = id as i64;
        }
    }

    Ok(CollatedBatch {
        batch_size,
        max_len,
        title_ids,
        lengths:        items.iter().map(|i| i.history.len() as i64).collect(),
        next_title_ids: items.iter().map(|i| i.next_title_id as i64).collect(),
        tenure_targets: items.iter().map(|i| i.tenure_months).collect(),
        hireable:       items.iter().map(|i| if i.hireable { 1.0 } else { 0.0 }).collect(),
    })
}

// ─── TrajectoryBatch ──────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TrajectoryBatch<B: Backend> {
    /// [batch, max_len], right-padded with 0
    pub title_ids:      Tensor<B, 2, Int>,
    /// [batch], true history length per row
    pub lengths:        Tensor<B, 1, Int>,
    /// [batch]
    pub next_title_ids: Tensor<B, 1, Int>,
    /// [batch], clamped months
    pub tenure_targets: Tensor<B, 1>,
    /// [batch], 0.0 or 1.0
    pub hireable:       Tensor<B, 1>,
}

// ─── TrajectoryBatcher ────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct TrajectoryBatcher;

impl<B: Backend> Batcher<B, TrajectoryInstance, TrajectoryBatch<B>> for TrajectoryBatcher {
    fn batch(&self, items: Vec<TrajectoryInstance>, device: &B::Device) -> TrajectoryBatch<B> {
        // TrajectoryDataset rejects empty histories at construction and the
        // DataLoader never emits empty batches, so this cannot fail here.
        match collate(&items) {
            Ok(collated) => collated.to_tensors(device),
            Err(e) => {
                let people: Vec<&str> = items.iter().map(|i| i.person_id.as_str()).collect();
                tracing::error!(
                    "Cannot collate a batch of {} instances (people {:?}): {}",
                    items.len(),
                    people,
                    e
                );
                panic!("collation invariant violated: {e}")
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use chrono::NaiveDate;

    fn inst(history: Vec<u32>, next: u32, tenure: f32, hireable: bool) -> TrajectoryInstance {
        TrajectoryInstance {
            person_id: "p".into(),
            history,
            next_title_id: next,
            tenure_months: tenure,
            hireable,
            anchor_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        }
    }

    #[test]
    #[should_panic(expected = "collation invariant violated")]
    fn test_batcher_panics_on_empty_history() {
        let items = vec![inst(vec![1], 2, 6.0, true), inst(vec![], 2, 6.0, false)];
        let _: TrajectoryBatch<NdArray> = TrajectoryBatcher.batch(items, &Default::default());
    }

    #[test]
    fn test_rows_match_originals_and_padding_is_zero() {
        let items = vec![
            inst(vec![3], 1, 6.0, true),
            inst(vec![1, 2, 4], 3, 12.0, false),
            inst(vec![2, 2], 4, 30.0, true),
        ];
        let b = collate(&items).unwrap();
        assert_eq!(b.max_len, 3);
        assert_eq!(b.lengths, vec![1, 3, 2]);

        for (r, item) in items.iter().enumerate() {
            let row = b.row(r);
            let len = item.history.len();
            let original: Vec<i64> = item.history.iter().map(|&x| x as i64).collect();
            assert_eq!(&row[..len], original.as_slice());
            assert!(row[len..].iter().all(|&x| x == 0));
        }
        assert_eq!(b.next_title_ids, vec![1, 3, 4]);
        assert_eq!(b.hireable, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_worked_example_pads_to_two() {
        let items = vec![inst(vec![1], 2, 12.0, true), inst(vec![1, 2], 3, 24.0, true)];
        let b     = collate(&items).unwrap();
        assert_eq!(b.max_len, 2);
        assert_eq!(b.title_ids, vec![1, 0, 1, 2]);
    }

    #[test]
    fn test_zero_length_fails_fast() {
        let items = vec![inst(vec![1], 2, 1.0, true), inst(vec![], 2, 1.0, true)];
        assert!(matches!(collate(&items), Err(TrajectoryError::EmptySequence { row: 1 })));
        assert!(collate(&[]).is_err());
    }

    #[test]
    fn test_batcher_shapes() {
        let items = vec![inst(vec![1, 2, 3, 4], 2, 1.0, true), inst(vec![5], 2, 1.0, false)];
        let batch: TrajectoryBatch<NdArray> =
            TrajectoryBatcher.batch(items, &Default::default());
        assert_eq!(batch.title_ids.dims(), [2, 4]);
        assert_eq!(batch.lengths.dims(), [2]);
        assert_eq!(batch.tenure_targets.dims(), [2]);
        let lengths: Vec<i64> = batch.lengths.into_data().iter::<i64>().collect();
        assert_eq!(lengths, vec![4, 1]);
    }
}
