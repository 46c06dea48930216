// ============================================================
// Layer 5b — Interchange Graph
// ============================================================
// The exported artifact: a versioned JSON graph.
//
//   inputs        title_ids [batch, seq] i64, lengths [batch] i64
//   outputs       next_role_logits [batch, V], tenure_pred [batch, 2],
//                 hireability [batch]
//   initializers  named f32 weights
//   nodes         topologically ordered, every value assigned once
//
// `batch` and `seq` are symbolic so one artifact serves any shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::traits::Persistable;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
pub const PRODUCER: &str = concat!("career-trajectory ", env!("CARGO_PKG_VERSION"));

pub const INPUT_TITLE_IDS: &str = "title_ids";
pub const INPUT_LENGTHS:   &str = "lengths";
pub const OUTPUT_NEXT:     &str = "next_role_logits";
pub const OUTPUT_TENURE:   &str = "tenure_pred";
pub const OUTPUT_HIRE:     &str = "hireability";

pub const BATCH_DIM: &str = "batch";
pub const SEQ_DIM:   &str = "seq";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(usize),
    Symbolic(String),
}

impl Dim {
    pub fn symbol(name: &str) -> Self {
        Self::Symbolic(name.to_string())
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbolic(s) => Some(s),
            Self::Fixed(_)    => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Int64,
    Float32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name:  String,
    pub dtype: DType,
    pub dims:  Vec<Dim>,
}

impl ValueInfo {
    pub fn new(name: &str, dtype: DType, dims: Vec<Dim>) -> Self {
        Self { name: name.to_string(), dtype, dims }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Sigmoid,
    /// [min, min + softplus(width)]
    OrderedBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Op {
    // fine-grained
    /// (table [V, E], ids [b, s]) → [b, s, E]
    Gather,
    /// (x [b, s, E], ids [b, s]) → x with rows of id 0 zeroed
    PaddingMask,
    /// (x [b, s, d], lengths, w_ih_f, b_ih_f, w_hh_f, w_ih_b, b_ih_b, w_hh_b)
    ///   → (seq [b, s, 2h], h_fwd [b, h], h_bwd [b, h])
    BiLstm { hidden_dim: usize },
    Concat { axis: usize },
    /// (x [n, k], w [k, m], b [m]) → [n, m]
    Gemm,
    Relu,
    Sigmoid,
    /// [n, 2] → [n, 2] with column 1 ≥ column 0
    OrderedBand,
    Squeeze { axis: usize },
    Identity,

    // composite
    /// (ids, table) → masked embeddings
    Embedding,
    /// (x, lengths, 6 weights per layer) → summary [b, 2h]
    Encoder { num_layers: usize, hidden_dim: usize },
    /// (x, w1, b1, w2, b2) → Linear → ReLU → Linear [→ activation] [→ squeeze]
    MlpHead {
        activation: Option<Activation>,
        squeeze:    bool,
    },
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Gather         => "Gather",
            Op::PaddingMask    => "PaddingMask",
            Op::BiLstm { .. }  => "BiLstm",
            Op::Concat { .. }  => "Concat",
            Op::Gemm           => "Gemm",
            Op::Relu           => "Relu",
            Op::Sigmoid        => "Sigmoid",
            Op::OrderedBand    => "OrderedBand",
            Op::Squeeze { .. } => "Squeeze",
            Op::Identity       => "Identity",
            Op::Embedding      => "Embedding",
            Op::Encoder { .. } => "Encoder",
            Op::MlpHead { .. } => "MlpHead",
        }
    }

    /// Lowest opset that defines this op.
    pub fn min_opset(&self) -> u32 {
        match self {
            Op::Identity | Op::Embedding | Op::Encoder { .. } | Op::MlpHead { .. } => 1,
            _ => 2,
        }
    }

    /// (inputs, outputs)
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Op::Gather | Op::PaddingMask               => (2, 1),
            Op::BiLstm { .. }                          => (8, 3),
            Op::Concat { .. }                          => (2, 1),
            Op::Gemm                                   => (3, 1),
            Op::Relu | Op::Sigmoid | Op::Identity      => (1, 1),
            Op::OrderedBand                            => (1, 1),
            Op::Squeeze { .. }                         => (1, 1),
            Op::Embedding                              => (2, 1),
            Op::Encoder { num_layers, .. }             => (2 + 6 * num_layers, 1),
            Op::MlpHead { .. }                         => (5, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name:    String,
    #[serde(flatten)]
    pub op:      Op,
    pub inputs:  Vec<String>,
    pub outputs: Vec<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, op: Op, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name:    name.into(),
            op,
            inputs:  inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphArtifact {
    pub format_version: u32,
    pub opset:          u32,
    pub producer:       String,
    /// Export strategy that produced this graph.
    pub strategy:       String,
    pub inputs:         Vec<ValueInfo>,
    pub outputs:        Vec<ValueInfo>,
    pub initializers:   Vec<Initializer>,
    pub nodes:          Vec<Node>,
    #[serde(default)]
    pub metadata:       BTreeMap<String, String>,
}

impl Persistable for GraphArtifact {}

impl GraphArtifact {
    /// Empty graph with the standard input/output signature.
    pub fn with_signature(strategy: &str, opset: u32, vocab_size: usize) -> Self {
        let batch = || Dim::symbol(BATCH_DIM);
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            opset,
            producer:       PRODUCER.to_string(),
            strategy:       strategy.to_string(),
            inputs: vec![
                ValueInfo::new(INPUT_TITLE_IDS, DType::Int64, vec![batch(), Dim::symbol(SEQ_DIM)]),
                ValueInfo::new(INPUT_LENGTHS, DType::Int64, vec![batch()]),
            ],
            outputs: vec![
                ValueInfo::new(OUTPUT_NEXT, DType::Float32, vec![batch(), Dim::Fixed(vocab_size)]),
                ValueInfo::new(OUTPUT_TENURE, DType::Float32, vec![batch(), Dim::Fixed(2)]),
                ValueInfo::new(OUTPUT_HIRE, DType::Float32, vec![batch()]),
            ],
            initializers: Vec::new(),
            nodes:        Vec::new(),
            metadata:     BTreeMap::new(),
        }
    }

    pub fn initializer(&self, name: &str) -> Option<&Initializer> {
        self.initializers.iter().find(|i| i.name == name)
    }

    pub fn parameter_count(&self) -> usize {
        self.initializers.iter().map(|i| i.data.len()).sum()
    }

    /// Serialized size in bytes.
    pub fn byte_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    pub fn vocab_size(&self) -> Option<usize> {
        self.outputs
            .iter()
            .find(|o| o.name == OUTPUT_NEXT)
            .and_then(|o| match o.dims.get(1) {
                Some(Dim::Fixed(v)) => Some(*v),
                _ => None,
            })
    }
}
