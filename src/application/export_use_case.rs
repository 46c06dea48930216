// ============================================================
// Layer 2 — ExportUseCase
// ============================================================
//   Step 1: Restore vocabulary + best model   (Layer 6 - infra)
//   Step 2: Export with fallback, check,      (Layer 5b - export)
//           parity, optional simplification
//   Step 3: Write artifact + export report    (Layer 6 - infra)
//           into {checkpoint_dir}/export/, or next to
//           --output when given
//
// Every failed strategy is recorded in the report; only the
// failure of all of them fails the command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::traits::Persistable;
use crate::export::{ExportOptions, ExportReport, Exporter, ARTIFACT_FILE, EXPORT_REPORT_FILE};
use crate::infra::checkpoint::{CheckpointManager, EXPORT_DIR};
use crate::ml::{InferBackend, WgpuDevice};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub checkpoint_dir: String,
    /// Defaults to `{checkpoint_dir}/vocab.json`.
    pub vocab_path:     Option<String>,
    /// Defaults to `{checkpoint_dir}/export`.
    pub output_dir:     Option<String>,
    /// Artifact file; overrides `output_dir`. The report lands beside it.
    pub output_path:    Option<String>,
    pub options:        ExportOptions,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: "checkpoints".to_string(),
            vocab_path:     None,
            output_dir:     None,
            output_path:    None,
            options:        ExportOptions::default(),
        }
    }
}

pub struct ExportUseCase {
    config:   ExportConfig,
    exporter: Exporter,
}

impl ExportUseCase {
    pub fn new(config: ExportConfig) -> Self {
        Self::with_exporter(config, Exporter::default())
    }

    pub fn with_exporter(config: ExportConfig, exporter: Exporter) -> Self {
        Self { config, exporter }
    }

    pub fn execute(&self) -> Result<ExportReport> {
        self.execute_on::<InferBackend>(WgpuDevice::default())
    }

    pub fn execute_on<B: Backend>(&self, device: B::Device) -> Result<ExportReport> {
        let cfg = &self.config;

        // ── Step 1 ───────────────────────────────────────────────────────────
        let ckpt       = CheckpointManager::open(&cfg.checkpoint_dir)?;
        let vocab      = ckpt.load_vocabulary_from(cfg.vocab_path.as_deref().map(Path::new))?;
        let (model, _) = ckpt.restore_model::<B>(&vocab, &device)?;

        // ── Step 2 ───────────────────────────────────────────────────────────
        let (graph, report) = self.exporter.run(&model, &cfg.options, &device)?;

        // ── Step 3 ───────────────────────────────────────────────────────────
        let artifact = match (&cfg.output_path, &cfg.output_dir) {
            (Some(file), _)   => PathBuf::from(file),
            (None, Some(dir)) => Path::new(dir).join(ARTIFACT_FILE),
            (None, None)      => ckpt.path(EXPORT_DIR).join(ARTIFACT_FILE),
        };
        graph
            .save(&artifact)
            .with_context(|| format!("Cannot write the artifact to '{}'", artifact.display()))?;
        report.save(artifact.with_file_name(EXPORT_REPORT_FILE))?;

        if report.used_fallback() {
            tracing::warn!("Exported with fallback strategy '{}'", report.strategy);
        }
        tracing::info!(
            "Exported '{}' (opset {}, {} nodes, {} parameters, {} bytes) to '{}'",
            report.strategy,
            report.opset,
            report.nodes,
            report.parameters,
            report.bytes,
            artifact.display(),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::tests::{records, small_config};
    use crate::application::train_use_case::TrainUseCase;
    use crate::export::check::check;
    use crate::export::graph::GraphArtifact;
    use crate::export::strategy::MODULE_GRAPH;
    use burn::backend::{Autodiff, NdArray};

    fn trained() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        TrainUseCase::new(small_config(dir.path()))
            .execute_on::<Autodiff<NdArray>>(&records(), Default::default())
            .unwrap();
        dir
    }

    #[test]
    fn test_export_writes_checked_artifact_and_report() {
        let dir = trained();
        let cfg = ExportConfig {
            checkpoint_dir: dir.path().display().to_string(),
            ..ExportConfig::default()
        };
        let report = ExportUseCase::new(cfg).execute_on::<NdArray>(Default::default()).unwrap();

        let export_dir = dir.path().join(EXPORT_DIR);
        let graph      = GraphArtifact::load(export_dir.join(ARTIFACT_FILE)).unwrap();
        check(&graph).unwrap();
        assert_eq!(graph.vocab_size(), Some(5));
        assert_eq!(graph.strategy, report.strategy);
        assert!(export_dir.join(EXPORT_REPORT_FILE).exists());
    }

    #[test]
    fn test_explicit_output_path_and_vocab() {
        let dir   = trained();
        let out   = dir.path().join("dist").join("careers.graph.json");
        let vocab = dir.path().join("titles.json");
        std::fs::copy(dir.path().join("vocab.json"), &vocab).unwrap();
        let cfg = ExportConfig {
            checkpoint_dir: dir.path().display().to_string(),
            vocab_path:     Some(vocab.display().to_string()),
            output_path:    Some(out.display().to_string()),
            options:        ExportOptions { simplify: false, ..ExportOptions::default() },
            ..ExportConfig::default()
        };
        let report = ExportUseCase::new(cfg).execute_on::<NdArray>(Default::default()).unwrap();

        assert!(!report.simplification.applied);
        check(&GraphArtifact::load(&out).unwrap()).unwrap();
        assert!(out.with_file_name(EXPORT_REPORT_FILE).exists());
        assert!(!dir.path().join(EXPORT_DIR).exists());
    }

    #[test]
    fn test_opset_one_target_uses_fallback() {
        let dir = trained();
        let cfg = ExportConfig {
            checkpoint_dir: dir.path().display().to_string(),
            options:        ExportOptions { opset: 1, ..ExportOptions::default() },
            ..ExportConfig::default()
        };
        let report = ExportUseCase::new(cfg).execute_on::<NdArray>(Default::default()).unwrap();
        assert_eq!(report.strategy, MODULE_GRAPH);
        assert!(report.used_fallback());
    }
}
