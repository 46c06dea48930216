// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits describing careers.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO tensor math
//   - Only plain data, validation and small JSON persistence
//
// Every other layer depends on this one; it never imports from them.

// Raw rows, role sequences and per-prefix training instances
pub mod career;

// Error taxonomy shared by every library layer
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;

// Job title ↔ id mapping
pub mod vocabulary;
