// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure the library layers can report.
//
//   Configuration   → fatal, abort immediately, name the artifact
//   DataQuality     → per-person, counted in BuildStats and skipped
//   ExportStrategy  → one export strategy failed, try the fallback
//   ExportFailed    → every strategy failed, the job fails
//
// Calibration quality is not an error: a calibrator that misses
// the ECE bar still completes and is flagged in its report.

use thiserror::Error;

pub type TrajectoryResult<T> = std::result::Result<T, TrajectoryError>;

#[derive(Debug, Error)]
pub enum TrajectoryError {
    /// Fatal misconfiguration; `artifact` names what disagreed.
    #[error("configuration error ({artifact}): {message}")]
    Configuration { artifact: String, message: String },

    #[error(
        "vocabulary size mismatch: {artifact} was built for {expected} titles \
         but the loaded vocabulary has {actual}"
    )]
    VocabularyMismatch {
        artifact: String,
        expected: usize,
        actual:   usize,
    },

    #[error("zero-length sequence at batch row {row}")]
    EmptySequence { row: usize },

    #[error("person '{person_id}' skipped: {issue}")]
    DataQuality {
        person_id: String,
        issue:     DataQualityIssue,
    },

    #[error("export strategy '{strategy}' failed: {reason}")]
    ExportStrategy { strategy: String, reason: String },

    #[error("export failed, no strategy produced an artifact: {0}")]
    ExportFailed(String),

    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl TrajectoryError {
    pub fn config(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            artifact: artifact.into(),
            message:  message.into(),
        }
    }

    pub fn export(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExportStrategy {
            strategy: strategy.into(),
            reason:   reason.into(),
        }
    }

    /// True for errors the pipeline recovers from instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DataQuality { .. } | Self::ExportStrategy { .. })
    }
}

/// Why a person's records could not become training instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataQualityIssue {
    UnparsableDate,
    EndBeforeStart,
    DuplicateStart,
    SingleRole,
    MissingOutcome,
}

impl std::fmt::Display for DataQualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnparsableDate => "unparsable date",
            Self::EndBeforeStart => "role ends before it starts",
            Self::DuplicateStart => "two roles start on the same date",
            Self::SingleRole     => "fewer than two roles",
            Self::MissingOutcome => "no outcome label",
        };
        f.write_str(s)
    }
}
