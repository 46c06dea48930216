// ============================================================
// Layer 5b — Weight Snapshot
// ============================================================
// Host copies of every trained parameter, read once from the model
// so export strategies never touch a backend.
//
// Linear weights keep Burn's layout: W is [d_in, d_out] and the layer
// computes x·W + b.

use burn::{module::Param, nn::Linear, prelude::*};

use crate::ml::encoder::LstmCell;
use crate::ml::heads::MlpHead;
use crate::ml::model::TrajectoryModel;

#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

impl HostTensor {
    pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Self {
        Self { dims, data }
    }

    pub fn zeros(dims: Vec<usize>) -> Self {
        let n = dims.iter().product();
        Self { dims, data: vec![0.0; n] }
    }

    pub fn from_tensor<B: Backend, const D: usize>(t: Tensor<B, D>) -> Self {
        let dims = t.dims().to_vec();
        let data = t.into_data().iter::<f32>().collect();
        Self { dims, data }
    }

    fn from_param<B: Backend, const D: usize>(p: &Param<Tensor<B, D>>) -> Self {
        Self::from_tensor(p.val())
    }
}

#[derive(Debug, Clone)]
pub struct LinearSnapshot {
    pub weight: HostTensor,
    pub bias:   Option<HostTensor>,
}

impl LinearSnapshot {
    fn read<B: Backend>(linear: &Linear<B>) -> Self {
        Self {
            weight: HostTensor::from_param(&linear.weight),
            bias:   linear.bias.as_ref().map(HostTensor::from_param),
        }
    }

    /// Bias, or zeros when the layer was built without one.
    pub fn bias_or_zeros(&self) -> HostTensor {
        self.bias
            .clone()
            .unwrap_or_else(|| HostTensor::zeros(vec![self.weight.dims[1]]))
    }
}

#[derive(Debug, Clone)]
pub struct CellSnapshot {
    /// [d_in, 4h] and [4h]
    pub w_ih: HostTensor,
    pub b_ih: HostTensor,
    /// [h, 4h]
    pub w_hh: HostTensor,
}

impl CellSnapshot {
    fn read<B: Backend>(cell: &LstmCell<B>) -> Self {
        let input = LinearSnapshot::read(&cell.input_gates);
        Self {
            b_ih: input.bias_or_zeros(),
            w_ih: input.weight,
            w_hh: LinearSnapshot::read(&cell.hidden_gates).weight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerSnapshot {
    pub forward:  CellSnapshot,
    pub backward: CellSnapshot,
}

#[derive(Debug, Clone)]
pub struct MlpSnapshot {
    pub hidden: LinearSnapshot,
    pub output: LinearSnapshot,
}

impl MlpSnapshot {
    fn read<B: Backend>(mlp: &MlpHead<B>) -> Self {
        Self {
            hidden: LinearSnapshot::read(&mlp.hidden),
            output: LinearSnapshot::read(&mlp.output),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub vocab_size:    usize,
    pub embedding_dim: usize,
    pub hidden_dim:    usize,
    /// [V, E]
    pub embedding:     HostTensor,
    pub layers:        Vec<LayerSnapshot>,
    pub next_title:    MlpSnapshot,
    pub tenure:        MlpSnapshot,
    pub hireability:   MlpSnapshot,
}

impl ModelSnapshot {
    pub fn from_model<B: Backend>(model: &TrajectoryModel<B>) -> Self {
        let embedding = HostTensor::from_param(&model.embedding.weight);
        Self {
            vocab_size:    embedding.dims[0],
            embedding_dim: embedding.dims[1],
            hidden_dim:    model.encoder.hidden_dim,
            embedding,
            layers: model
                .encoder
                .layers
                .iter()
                .map(|l| LayerSnapshot {
                    forward:  CellSnapshot::read(&l.forward_cell),
                    backward: CellSnapshot::read(&l.backward_cell),
                })
                .collect(),
            next_title:  MlpSnapshot::read(&model.next_title.mlp),
            tenure:      MlpSnapshot::read(&model.tenure.mlp),
            hireability: MlpSnapshot::read(&model.hireability.mlp),
        }
    }
}
