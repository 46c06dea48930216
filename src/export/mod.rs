// ============================================================
// Layer 5b — Portable Export
// ============================================================
// Turns a trained model into a self-describing graph artifact that
// runs without Burn.
//
//   graph.rs     — artifact format, ops, signature
//   snapshot.rs  — host copies of the trained weights
//   strategy.rs  — traced-graph (preferred) and module-graph (fallback)
//   check.rs     — structural validation
//   runtime.rs   — host executor used for verification
//   parity.rs    — model vs artifact on seeded random inputs
//   simplify.rs  — identity folding, dead code, unused weights
//
// Pipeline per strategy, in order, first success wins:
//
//   snapshot → export → check → parity  ──ok──▶ simplify? → artifact
//                                 │
//                               error ──▶ warn!, next strategy
//
// If simplification fails its own check or parity, the unsimplified
// artifact is kept.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::domain::traits::Persistable;
use crate::ml::model::TrajectoryModel;

/// Artifact format, op set and signature
pub mod graph;

/// Weight snapshots read from the model
pub mod snapshot;

/// Export strategies
pub mod strategy;

/// Structural check
pub mod check;

/// Host executor
pub mod runtime;

/// Parity verification
pub mod parity;

/// Graph simplification
pub mod simplify;

use graph::GraphArtifact;
use simplify::SimplifyStats;
use snapshot::ModelSnapshot;
use strategy::{ExportStrategy, ModuleGraphStrategy, TracedGraphStrategy};

pub const ARTIFACT_FILE: &str = "model.graph.json";
pub const EXPORT_REPORT_FILE: &str = "export_report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Highest op set the target runtime supports.
    pub opset:        u32,
    /// Max absolute difference allowed between model and artifact.
    pub tolerance:    f32,
    pub simplify:     bool,
    /// (batch, seq) shapes used for the parity check.
    pub probe_shapes: Vec<(usize, usize)>,
    pub seed:         u64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            opset:        2,
            tolerance:    1e-4,
            simplify:     true,
            probe_shapes: vec![(1, 3), (4, 7)],
            seed:         42,
        }
    }
}

impl ExportOptions {
    pub fn validate(&self) -> TrajectoryResult<()> {
        if self.probe_shapes.len() < 2 {
            return Err(TrajectoryError::config(
                "export options",
                "parity needs at least two probe shapes to show dynamic batch and sequence",
            ));
        }
        if self.probe_shapes.iter().any(|&(b, s)| b == 0 || s == 0) {
            return Err(TrajectoryError::config("export options", "probe shapes must be non-empty"));
        }
        if !(self.tolerance > 0.0) {
            return Err(TrajectoryError::config("export options", "tolerance must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy:  String,
    pub succeeded: bool,
    pub reason:    Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimplificationOutcome {
    pub applied: bool,
    pub stats:   Option<SimplifyStats>,
    /// Why the simplified graph was discarded, if it was.
    pub reason:  Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub strategy:            String,
    pub opset:               u32,
    pub attempts:            Vec<StrategyAttempt>,
    pub probe_shapes:        Vec<(usize, usize)>,
    pub tolerance:           f32,
    pub parity_max_abs_diff: f32,
    pub parameters:          usize,
    pub nodes:               usize,
    pub bytes:               usize,
    pub simplification:      SimplificationOutcome,
}

impl Persistable for ExportReport {}

impl ExportReport {
    pub fn used_fallback(&self) -> bool {
        self.attempts.first().map(|a| !a.succeeded).unwrap_or(false)
    }
}

/// Ordered list of strategies; the first that passes every check wins.
pub struct Exporter {
    strategies: Vec<Box<dyn ExportStrategy>>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::with_strategies(vec![Box::new(TracedGraphStrategy), Box::new(ModuleGraphStrategy)])
    }
}

impl Exporter {
    pub fn with_strategies(strategies: Vec<Box<dyn ExportStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn run<B: Backend>(
        &self,
        model:  &TrajectoryModel<B>,
        opts:   &ExportOptions,
        device: &B::Device,
    ) -> TrajectoryResult<(GraphArtifact, ExportReport)> {
        opts.validate()?;
        let snap = ModelSnapshot::from_model(model);
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            tracing::info!("Trying export strategy '{}' (opset {})", name, opts.opset);

            match Self::attempt(strategy.as_ref(), model, &snap, opts, device) {
                Ok((graph, diff)) => {
                    attempts.push(StrategyAttempt { strategy: name.into(), succeeded: true, reason: None });
                    tracing::info!("✓ '{}' passed check and parity (max |Δ| = {:.2e})", name, diff);
                    return Ok(Self::finish(model, graph, diff, attempts, opts, device));
                }
                Err(e) => {
                    tracing::warn!("Export strategy '{}' failed: {}", name, e);
                    attempts.push(StrategyAttempt {
                        strategy:  name.into(),
                        succeeded: false,
                        reason:    Some(e.to_string()),
                    });
                }
            }
        }

        let summary = attempts
            .iter()
            .map(|a| format!("{}: {}", a.strategy, a.reason.as_deref().unwrap_or("unknown")))
            .collect::<Vec<_>>()
            .join("; ");
        Err(TrajectoryError::ExportFailed(if summary.is_empty() {
            "no strategies configured".into()
        } else {
            summary
        }))
    }

    fn attempt<B: Backend>(
        strategy: &dyn ExportStrategy,
        model:    &TrajectoryModel<B>,
        snap:     &ModelSnapshot,
        opts:     &ExportOptions,
        device:   &B::Device,
    ) -> TrajectoryResult<(GraphArtifact, f32)> {
        let graph = strategy.export(snap, opts)?;
        check::check(&graph).map_err(|e| TrajectoryError::export(strategy.name(), e.to_string()))?;
        let diff = parity::verify_parity(model, &graph, &opts.probe_shapes, opts.tolerance, opts.seed, device)?;
        Ok((graph, diff))
    }

    fn finish<B: Backend>(
        model:    &TrajectoryModel<B>,
        graph:    GraphArtifact,
        diff:     f32,
        attempts: Vec<StrategyAttempt>,
        opts:     &ExportOptions,
        device:   &B::Device,
    ) -> (GraphArtifact, ExportReport) {
        let mut outcome  = SimplificationOutcome::default();
        let mut chosen   = graph;
        let mut max_diff = diff;

        if opts.simplify {
            let (smaller, stats) = simplify::simplify(&chosen);
            outcome.stats = Some(stats);
            let verified = check::check(&smaller).and_then(|_| {
                parity::verify_parity(model, &smaller, &opts.probe_shapes, opts.tolerance, opts.seed, device)
            });
            match verified {
                Ok(d) => {
                    tracing::info!(
                        "Simplified: {} → {} nodes, {} bytes saved",
                        stats.nodes_before, stats.nodes_after, stats.bytes_saved()
                    );
                    outcome.applied = true;
                    chosen = smaller;
                    max_diff = d;
                }
                Err(e) => {
                    tracing::warn!("Simplification discarded, keeping unsimplified graph: {}", e);
                    outcome.reason = Some(e.to_string());
                }
            }
        }

        let report = ExportReport {
            strategy:            chosen.strategy.clone(),
            opset:               chosen.opset,
            attempts,
            probe_shapes:        opts.probe_shapes.clone(),
            tolerance:           opts.tolerance,
            parity_max_abs_diff: max_diff,
            parameters:          chosen.parameter_count(),
            nodes:               chosen.nodes.len(),
            bytes:               chosen.byte_size(),
            simplification:      outcome,
        };
        (chosen, report)
    }
}
