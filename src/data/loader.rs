// ============================================================
// Layer 4 — Career Record Loader
// ============================================================
// Reads raw employment rows from the upstream SQLite store.
//
// The store is owned by the upstream data pipeline; all we rely on
// is a query returning these six columns, in this order:
//
//   person_id, title, company, start_date, end_date, outcome_label
//
// Loose typing is tolerated at this boundary (integer person ids,
// 0/1 or "true"/"false" outcomes, NULL end dates). Date parsing is
// deliberately left to the builder so a bad row costs one person,
// not the whole query.

use std::path::{Path, PathBuf};

use rusqlite::{types::Value, Connection, OpenFlags, Row};

use crate::domain::career::CareerRecord;
use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::domain::traits::CareerSource;

pub const DEFAULT_QUERY: &str = "SELECT person_id, title, company, start_date, end_date, outcome_label \
     FROM employment ORDER BY person_id, start_date";

/// Loads employment rows from a SQLite file.
pub struct SqliteCareerSource {
    path:  PathBuf,
    query: String,
}

impl SqliteCareerSource {
    /// Accepts `sqlite://path/to.db`, `sqlite:path/to.db` or a bare path.
    pub fn from_url(dataset_url: &str, query: impl Into<String>) -> TrajectoryResult<Self> {
        let path = dataset_url
            .strip_prefix("sqlite://")
            .or_else(|| dataset_url.strip_prefix("sqlite:"))
            .unwrap_or(dataset_url)
            .trim();
        if path.is_empty() {
            return Err(TrajectoryError::config("dataset_url", "empty dataset url"));
        }
        Ok(Self {
            path:  PathBuf::from(path),
            query: query.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CareerSource for SqliteCareerSource {
    fn load_records(&self) -> TrajectoryResult<Vec<CareerRecord>> {
        if !self.path.exists() {
            return Err(TrajectoryError::config(
                self.path.display().to_string(),
                "dataset file does not exist",
            ));
        }
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let records = load_from_connection(&conn, &self.query)?;
        tracing::info!(
            "Loaded {} employment rows from '{}'",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}

/// Run `query` and map every row into a `CareerRecord`.
pub fn load_from_connection(conn: &Connection, query: &str) -> TrajectoryResult<Vec<CareerRecord>> {
    let mut stmt = conn.prepare(query)?;
    if stmt.column_count() < 6 {
        return Err(TrajectoryError::config(
            "dataset query",
            format!("expected 6 columns, query returns {}", stmt.column_count()),
        ));
    }
    let rows = stmt.query_map([], read_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<CareerRecord> {
    Ok(CareerRecord {
        person_id:     value_to_string(row.get(0)?).unwrap_or_default(),
        title:         value_to_string(row.get(1)?).unwrap_or_default(),
        company:       value_to_string(row.get(2)?).unwrap_or_default(),
        start_date:    value_to_string(row.get(3)?).unwrap_or_default(),
        end_date:      value_to_string(row.get(4)?).filter(|s| !s.trim().is_empty()),
        outcome_label: value_to_outcome(row.get(5)?),
    })
}

fn value_to_string(v: Value) -> Option<String> {
    match v {
        Value::Null       => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f)    => Some(f.to_string()),
        Value::Text(s)    => Some(s),
        Value::Blob(b)    => String::from_utf8(b).ok(),
    }
}

fn value_to_outcome(v: Value) -> Option<bool> {
    match v {
        Value::Integer(i) => Some(i != 0),
        Value::Real(f)    => Some(f >= 0.5),
        Value::Text(s)    => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => Some(true),
            "0" | "false" | "no" | "n" => Some(false),
            _ => None,
        },
        Value::Null | Value::Blob(_) => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SCHEMA: &str = "CREATE TABLE employment (
        person_id     TEXT NOT NULL,
        title         TEXT,
        company       TEXT,
        start_date    TEXT,
        end_date      TEXT,
        outcome_label INTEGER
    )";

    pub(crate) fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(SCHEMA, []).unwrap();
        conn.execute_batch(
            "INSERT INTO employment VALUES ('p1', 'Analyst',  'Acme', '2015-01-01', '2017-01-01', 1);
             INSERT INTO employment VALUES ('p1', 'Engineer', 'Acme', '2017-01-01', NULL,         1);
             INSERT INTO employment VALUES ( 42,  'Manager',  'Init', '2019-05-01', '',           'no');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_loads_rows_with_loose_types() {
        let conn    = seeded_connection();
        let records = load_from_connection(&conn, DEFAULT_QUERY).unwrap();
        assert_eq!(records.len(), 3);

        let manager = records.iter().find(|r| r.title == "Manager").unwrap();
        assert_eq!(manager.person_id, "42");
        assert_eq!(manager.end_date, None);
        assert_eq!(manager.outcome_label, Some(false));

        let engineer = records.iter().find(|r| r.title == "Engineer").unwrap();
        assert_eq!(engineer.end_date, None);
        assert_eq!(engineer.outcome_label, Some(true));
    }

    #[test]
    fn test_rejects_narrow_query() {
        let conn = seeded_connection();
        let err  = load_from_connection(&conn, "SELECT person_id, title FROM employment").unwrap_err();
        assert!(matches!(err, TrajectoryError::Configuration { .. }));
    }

    #[test]
    fn test_url_forms() {
        let a = SqliteCareerSource::from_url("sqlite://data/careers.db", DEFAULT_QUERY).unwrap();
        let b = SqliteCareerSource::from_url("data/careers.db", DEFAULT_QUERY).unwrap();
        assert_eq!(a.path(), b.path());
        assert!(SqliteCareerSource::from_url("sqlite://", DEFAULT_QUERY).is_err());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let src = SqliteCareerSource::from_url("/definitely/not/here.db", DEFAULT_QUERY).unwrap();
        assert!(matches!(
            src.load_records().unwrap_err(),
            TrajectoryError::Configuration { .. }
        ));
    }
}
