// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model-side Burn code lives here.
//
//   packing.rs     — pack / unpack on true lengths
//   encoder.rs     — LSTM cell, bidirectional layer, 2-layer encoder
//   heads.rs       — next title, tenure range, hireability
//   model.rs       — embedding + encoder + heads, weighted loss
//   trainer.rs     — Adam loop with validation and checkpointing
//   evaluator.rs   — metrics, confidence collection, top-k
//   calibration.rs — isotonic calibrator, ECE, Brier, report
//   inferencer.rs  — single-history prediction
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Hochreiter & Schmidhuber (1997) LSTM
//            Zadrozny & Elkan (2002) isotonic calibration

pub use burn::backend::wgpu::WgpuDevice;

/// Gradient-tracking backend used for training.
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Plain backend for evaluation, calibration, export and predict.
pub type InferBackend = burn::backend::Wgpu;

/// Pack / unpack of right-padded batches
pub mod packing;

/// Bidirectional LSTM encoder over packed sequences
pub mod encoder;

/// The three prediction heads
pub mod heads;

/// Trajectory model and loss
pub mod model;

/// Full training loop with validation and checkpointing
pub mod trainer;

/// Evaluation passes and decoding helpers
pub mod evaluator;

/// Post-hoc confidence calibration
pub mod calibration;

/// Inference engine for single histories
pub mod inferencer;
