// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from raw employment rows to tensor batches:
//
//   SQLite store
//       │
//       ▼
//   SqliteCareerSource      → raw CareerRecord rows
//       │
//       ▼
//   SequenceDatasetBuilder  → one instance per history prefix
//       │
//       ▼
//   split_temporal          → people-level train / validation / test
//       │
//       ▼
//   TrajectoryDataset       → implements Burn's Dataset trait
//       │
//       ▼
//   TrajectoryBatcher       → right-padded ids + true lengths
//       │
//       ▼
//   DataLoader              → feeds batches to the model
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads employment rows from SQLite
pub mod loader;

/// Groups rows per person and expands history prefixes
pub mod builder;

/// Person-level temporal train/validation/test split
pub mod splitter;

/// Implements Burn's Dataset trait for trajectory instances
pub mod dataset;

/// Pads histories and builds tensor batches
pub mod batcher;
