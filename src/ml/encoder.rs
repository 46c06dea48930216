// ============================================================
// Layer 5 — Bidirectional Recurrent Encoder
// ============================================================
// Two stacked bidirectional LSTM layers over a PACKED sequence.
//
// Per direction, per step (gate order i, f, g, o):
//
//   gates = x·W_ih + b + h·W_hh
//   c'    = σ(f) ⊙ c + σ(i) ⊙ tanh(g)
//   h'    = σ(o) ⊙ tanh(c')
//
// Packed rows are sorted longest-first, so at step t the alive rows
// are exactly rows 0..batch_sizes[t]. Only those rows are updated;
// the rest keep their state.
//
//   forward  (t = 0 → max) : a row's state freezes after its last step
//   backward (t = max → 0) : a row starts from zero at its last step
//
// Either way no padded position ever touches a hidden state, and the
// final states are each row's true last step in each direction.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::sigmoid,
};

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::ml::packing::{index_tensor, pack_padded, PackedSequence};

// ─── LSTM cell ────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct LstmCellConfig {
    pub d_input:    usize,
    pub hidden_dim: usize,
}

impl LstmCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LstmCell<B> {
        LstmCell {
            input_gates:  LinearConfig::new(self.d_input, 4 * self.hidden_dim).init(device),
            hidden_gates: LinearConfig::new(self.hidden_dim, 4 * self.hidden_dim)
                .with_bias(false)
                .init(device),
            hidden_dim:   self.hidden_dim,
        }
    }
}

#[derive(Module, Debug)]
pub struct LstmCell<B: Backend> {
    pub input_gates:  Linear<B>,
    pub hidden_gates: Linear<B>,
    pub hidden_dim:   usize,
}

impl<B: Backend> LstmCell<B> {
    /// One step for `n` rows: x [n, d_input], h/c [n, hidden] → (h', c').
    pub fn step(&self, x: Tensor<B, 2>, h: Tensor<B, 2>, c: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [n, _] = x.dims();
        let hd     = self.hidden_dim;
        let gates  = self.input_gates.forward(x) + self.hidden_gates.forward(h);
        let gate   = |k: usize| gates.clone().slice([0..n, k * hd..(k + 1) * hd]);

        let i = sigmoid(gate(0));
        let f = sigmoid(gate(1));
        let g = gate(2).tanh();
        let o = sigmoid(gate(3));

        let c = f * c + i * g;
        let h = o * c.clone().tanh();
        (h, c)
    }
}

// ─── One bidirectional layer ──────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BiLstmLayer<B: Backend> {
    pub forward_cell:  LstmCell<B>,
    pub backward_cell: LstmCell<B>,
}

pub struct BiLstmOutput<B: Backend> {
    /// Packed [total, 2 * hidden]: forward ‖ backward per step.
    pub packed:         PackedSequence<B>,
    /// [batch, hidden], in SORTED row order.
    pub final_forward:  Tensor<B, 2>,
    pub final_backward: Tensor<B, 2>,
}

impl<B: Backend> BiLstmLayer<B> {
    pub fn init(d_input: usize, hidden_dim: usize, device: &B::Device) -> Self {
        let cfg = LstmCellConfig::new(d_input, hidden_dim);
        Self {
            forward_cell:  cfg.init(device),
            backward_cell: cfg.init(device),
        }
    }

    pub fn forward_packed(&self, input: &PackedSequence<B>) -> BiLstmOutput<B> {
        let (fwd_steps, final_forward)  = run_direction(&self.forward_cell, input, false);
        let (bwd_steps, final_backward) = run_direction(&self.backward_cell, input, true);

        let steps: Vec<Tensor<B, 2>> = fwd_steps
            .into_iter()
            .zip(bwd_steps)
            .map(|(f, b)| Tensor::cat(vec![f, b], 1))
            .collect();

        BiLstmOutput {
            packed: input.with_data(Tensor::cat(steps, 0)),
            final_forward,
            final_backward,
        }
    }
}

/// Returns per-step outputs in time order plus the final hidden state.
fn run_direction<B: Backend>(
    cell:    &LstmCell<B>,
    input:   &PackedSequence<B>,
    reverse: bool,
) -> (Vec<Tensor<B, 2>>, Tensor<B, 2>) {
    let batch   = input.batch_size();
    let hd      = cell.hidden_dim;
    let device  = input.data.device();
    let offsets = input.offsets();

    let mut h = Tensor::<B, 2>::zeros([batch, hd], &device);
    let mut c = Tensor::<B, 2>::zeros([batch, hd], &device);
    let mut outputs: Vec<Option<Tensor<B, 2>>> = vec![None; input.max_len()];

    let order: Vec<usize> = if reverse {
        (0..input.max_len()).rev().collect()
    } else {
        (0..input.max_len()).collect()
    };

    for t in order {
        let n = input.batch_sizes[t];
        let (h_new, c_new) = cell.step(
            input.step(t, offsets[t]),
            h.clone().slice([0..n, 0..hd]),
            c.clone().slice([0..n, 0..hd]),
        );
        outputs[t] = Some(h_new.clone());
        h = merge_alive(h_new, h, n, batch);
        c = merge_alive(c_new, c, n, batch);
    }

    (outputs.into_iter().flatten().collect(), h)
}

/// Rows 0..n from `alive`, rows n..batch unchanged from `state`.
fn merge_alive<B: Backend>(alive: Tensor<B, 2>, state: Tensor<B, 2>, n: usize, batch: usize) -> Tensor<B, 2> {
    if n == batch {
        return alive;
    }
    let [_, width] = state.dims();
    Tensor::cat(vec![alive, state.slice([n..batch, 0..width])], 0)
}

// ─── Stacked encoder ──────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct TrajectoryEncoderConfig {
    pub d_input:    usize,
    pub hidden_dim: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 0.2)]
    pub dropout:    f64,
}

impl TrajectoryEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TrajectoryEncoder<B> {
        let layers = (0..self.num_layers)
            .map(|k| {
                let d_in = if k == 0 { self.d_input } else { 2 * self.hidden_dim };
                BiLstmLayer::init(d_in, self.hidden_dim, device)
            })
            .collect();
        TrajectoryEncoder {
            layers,
            dropout:    DropoutConfig::new(self.dropout).init(),
            hidden_dim: self.hidden_dim,
        }
    }
}

#[derive(Module, Debug)]
pub struct TrajectoryEncoder<B: Backend> {
    pub layers:     Vec<BiLstmLayer<B>>,
    pub dropout:    Dropout,
    pub hidden_dim: usize,
}

impl<B: Backend> TrajectoryEncoder<B> {
    pub fn output_dim(&self) -> usize {
        2 * self.hidden_dim
    }

    /// embedded [batch, seq, d_input] + true lengths → summary [batch, 2 * hidden],
    /// in the original row order.
    pub fn forward(&self, embedded: Tensor<B, 3>, lengths: &[usize]) -> TrajectoryResult<Tensor<B, 2>> {
        let device     = embedded.device();
        let mut packed = pack_padded(embedded, lengths)?;
        let mut finals = None;

        let last = self.layers.len().saturating_sub(1);
        for (k, layer) in self.layers.iter().enumerate() {
            let out = layer.forward_packed(&packed);
            packed = if k < last {
                out.packed.with_data(self.dropout.forward(out.packed.data.clone()))
            } else {
                out.packed
            };
            finals = Some((out.final_forward, out.final_backward));
        }

        let (fwd, bwd) = finals.ok_or_else(|| {
            TrajectoryError::config("model config", "encoder has no recurrent layers")
        })?;
        let summary_sorted = Tensor::cat(vec![fwd, bwd], 1);
        Ok(summary_sorted.select(0, index_tensor::<B>(&packed.unsorted_indices, &device)))
    }
}
