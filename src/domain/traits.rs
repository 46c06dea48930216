// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams other layers program against:
//
//   CareerSource  → where employment rows come from
//                   (SqliteCareerSource today; any store tomorrow)
//   Persistable   → small JSON artifacts saved next to a model
//                   (calibrator, reports)
//
// The application layer only sees these traits, so a unit test can
// hand it an in-memory source without touching SQLite.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::domain::career::CareerRecord;
use crate::domain::error::{TrajectoryError, TrajectoryResult};

// ─── CareerSource ─────────────────────────────────────────────────────────────
/// Anything that can produce raw employment rows.
pub trait CareerSource {
    fn load_records(&self) -> TrajectoryResult<Vec<CareerRecord>>;
}

impl CareerSource for Vec<CareerRecord> {
    fn load_records(&self) -> TrajectoryResult<Vec<CareerRecord>> {
        Ok(self.clone())
    }
}

// ─── Persistable ──────────────────────────────────────────────────────────────
/// A serde type that is written to and read from a pretty JSON file.
pub trait Persistable: Serialize + DeserializeOwned + Sized {
    fn save(&self, path: impl AsRef<Path>) -> TrajectoryResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!("Wrote '{}'", path.display());
        Ok(())
    }

    fn load(path: impl AsRef<Path>) -> TrajectoryResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TrajectoryError::config(path.display().to_string(), format!("cannot read: {e}"))
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
