// ============================================================
// Layer 5 — Sequence Packing
// ============================================================
// Packs a right-padded batch so the recurrent pass only ever sees
// real time steps.
//
// Rows are sorted by true length (longest first). At time step t
// only the first batch_sizes[t] sorted rows are still "alive", so
// the packed data is the concatenation of those row prefixes:
//
//   lengths [1, 3, 2]  → sorted order [1, 2, 0]
//   batch_sizes        = [3, 2, 1]
//   data               = [r1 t0, r2 t0, r0 t0, r1 t1, r2 t1, r1 t2]
//
// unpack() scatters the steps back into a zero-padded
// [batch, len, features] tensor in the ORIGINAL row order.

use burn::{prelude::*, tensor::TensorData};

use crate::domain::error::{TrajectoryError, TrajectoryResult};

#[derive(Debug, Clone)]
pub struct PackedSequence<B: Backend> {
    /// [sum(lengths), features]
    pub data:             Tensor<B, 2>,
    /// Alive rows per time step, non-increasing.
    pub batch_sizes:      Vec<usize>,
    /// sorted position → original row
    pub sorted_indices:   Vec<usize>,
    /// original row → sorted position
    pub unsorted_indices: Vec<usize>,
}

impl<B: Backend> PackedSequence<B> {
    pub fn batch_size(&self) -> usize {
        self.sorted_indices.len()
    }

    pub fn max_len(&self) -> usize {
        self.batch_sizes.len()
    }

    pub fn features(&self) -> usize {
        self.data.dims()[1]
    }

    /// Row offset of each time step inside `data`.
    pub fn offsets(&self) -> Vec<usize> {
        self.batch_sizes
            .iter()
            .scan(0usize, |acc, &n| {
                let start = *acc;
                *acc += n;
                Some(start)
            })
            .collect()
    }

    /// The alive rows at step `t`: [batch_sizes[t], features].
    pub fn step(&self, t: usize, offset: usize) -> Tensor<B, 2> {
        let n = self.batch_sizes[t];
        self.data.clone().slice([offset..offset + n, 0..self.features()])
    }

    /// Same layout, different payload (e.g. a layer's outputs).
    pub fn with_data(&self, data: Tensor<B, 2>) -> Self {
        Self {
            data,
            batch_sizes:      self.batch_sizes.clone(),
            sorted_indices:   self.sorted_indices.clone(),
            unsorted_indices: self.unsorted_indices.clone(),
        }
    }
}

/// Read a lengths tensor back to the host and validate it against
/// the padded batch it came with.
pub fn host_lengths<B: Backend>(
    lengths: Tensor<B, 1, Int>,
    batch:   usize,
    seq_len: usize,
) -> TrajectoryResult<Vec<usize>> {
    let raw: Vec<i64> = lengths.into_data().iter::<i64>().collect();
    check_lengths(&raw, batch, seq_len)?;
    Ok(raw.into_iter().map(|l| l as usize).collect())
}

pub fn check_lengths(lengths: &[i64], batch: usize, seq_len: usize) -> TrajectoryResult<()> {
    if lengths.len() != batch {
        return Err(TrajectoryError::config(
            "lengths",
            format!("{} lengths for a batch of {}", lengths.len(), batch),
        ));
    }
    for (row, &l) in lengths.iter().enumerate() {
        if l <= 0 {
            return Err(TrajectoryError::EmptySequence { row });
        }
        if l as usize > seq_len {
            return Err(TrajectoryError::config(
                "lengths",
                format!("row {row} claims length {l} but the padded sequence has {seq_len} steps"),
            ));
        }
    }
    Ok(())
}

pub fn pack_padded<B: Backend>(x: Tensor<B, 3>, lengths: &[usize]) -> TrajectoryResult<PackedSequence<B>> {
    let [batch, seq_len, features] = x.dims();
    let as_i64: Vec<i64> = lengths.iter().map(|&l| l as i64).collect();
    check_lengths(&as_i64, batch, seq_len)?;

    // stable: equal lengths keep their original relative order
    let mut sorted_indices: Vec<usize> = (0..batch).collect();
    sorted_indices.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]));

    let mut unsorted_indices = vec![0usize; batch];
    for (pos, &row) in sorted_indices.iter().enumerate() {
        unsorted_indices[row] = pos;
    }

    let max_len = lengths.iter().copied().max().unwrap_or(0);
    let batch_sizes: Vec<usize> = (0..max_len)
        .map(|t| lengths.iter().filter(|&&l| l > t).count())
        .collect();

    let device   = x.device();
    let x_sorted = x.select(0, index_tensor::<B>(&sorted_indices, &device));

    let steps: Vec<Tensor<B, 2>> = batch_sizes
        .iter()
        .enumerate()
        .map(|(t, &n)| {
            x_sorted
                .clone()
                .slice([0..n, t..t + 1, 0..features])
                .reshape([n, features])
        })
        .collect();

    Ok(PackedSequence {
        data: Tensor::cat(steps, 0),
        batch_sizes,
        sorted_indices,
        unsorted_indices,
    })
}

/// Back to [batch, total_len, features] in original row order; steps
/// past a row's length (and past max_len) are zero.
pub fn unpack<B: Backend>(packed: &PackedSequence<B>, total_len: usize) -> Tensor<B, 3> {
    let batch    = packed.batch_size();
    let features = packed.features();
    let device   = packed.data.device();
    let total    = total_len.max(packed.max_len());

    let mut steps = Vec::with_capacity(total);
    for (t, offset) in packed.offsets().into_iter().enumerate() {
        let n    = packed.batch_sizes[t];
        let mut step = packed.step(t, offset);
        if n < batch {
            step = Tensor::cat(vec![step, Tensor::zeros([batch - n, features], &device)], 0);
        }
        steps.push(step.reshape([batch, 1, features]));
    }
    for _ in packed.max_len()..total {
        steps.push(Tensor::zeros([batch, 1, features], &device));
    }

    Tensor::cat(steps, 1).select(0, index_tensor::<B>(&packed.unsorted_indices, &device))
}

pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}
