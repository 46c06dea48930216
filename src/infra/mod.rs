// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting persistence that doesn't belong to one business
// layer:
//
//   checkpoint.rs — weights via Burn's full-precision recorder, plus the
//                   metadata later phases need to rebuild the model
//                   and check it against the vocabulary
//
//   metrics.rs    — per-epoch CSV log
//
//   report.rs     — end-of-run JSON summary
//
// Reference: Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Training run summary
pub mod report;
