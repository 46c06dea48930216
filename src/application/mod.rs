// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one command each.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - Only workflow coordination and artifact placement
//
// Every use case has an `execute()` that runs on the configured
// store and WGPU, and an `execute_on::<B>()` that takes the backend
// and record source explicitly.

// Load → build → split → train → report
pub mod train_use_case;

// Fit the isotonic calibrator and judge ECE
pub mod calibrate_use_case;

// Portable graph export with fallback
pub mod export_use_case;

// Single-history prediction
pub mod predict_use_case;
