// ============================================================
// Layer 3 — Title Vocabulary
// ============================================================
// Deterministic string ↔ id mapping for job titles.
//
//   id 0          → unknown title AND padding
//   ids 1..size   → titles, in insertion order
//
// The vocabulary is built once while training, frozen, written to
// vocab.json and then only ever loaded read-only. Its size is the
// embedding table's row count, so every later phase checks it.

use std::{collections::{BTreeMap, HashMap}, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::domain::error::{TrajectoryError, TrajectoryResult};

pub const UNKNOWN_ID: u32 = 0;
pub const UNKNOWN_TITLE: &str = "<unk>";
pub const VOCAB_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct TitleVocabulary {
    ids:    HashMap<String, u32>,
    titles: Vec<String>,
    frozen: bool,
}

/// On-disk layout of vocab.json.
#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    format_version: u32,
    size:           usize,
    ids:            BTreeMap<String, u32>,
}

impl TitleVocabulary {
    pub fn new() -> Self {
        Self {
            ids:    HashMap::new(),
            titles: vec![UNKNOWN_TITLE.to_string()],
            frozen: false,
        }
    }

    /// Build and freeze a vocabulary from every title in a corpus.
    pub fn from_titles<'a>(titles: impl IntoIterator<Item = &'a str>) -> Self {
        let mut vocab = Self::new();
        for t in titles {
            vocab.add_or_get(t);
        }
        vocab.freeze();
        vocab
    }

    /// Number of ids including the reserved id 0.
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    /// True when only the reserved id exists.
    pub fn is_empty(&self) -> bool {
        self.titles.len() <= 1
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Returns the id for `title`, inserting it while the vocabulary is
    /// still open. Frozen vocabularies map unseen titles to 0.
    pub fn add_or_get(&mut self, title: &str) -> u32 {
        let key = normalize_title(title);
        if key.is_empty() {
            return UNKNOWN_ID;
        }
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        if self.frozen {
            return UNKNOWN_ID;
        }
        let id = self.titles.len() as u32;
        self.titles.push(key.clone());
        self.ids.insert(key, id);
        id
    }

    pub fn get(&self, title: &str) -> u32 {
        self.ids
            .get(&normalize_title(title))
            .copied()
            .unwrap_or(UNKNOWN_ID)
    }

    pub fn to_ids<S: AsRef<str>>(&self, titles: &[S]) -> Vec<u32> {
        titles.iter().map(|t| self.get(t.as_ref())).collect()
    }

    pub fn title_of(&self, id: u32) -> &str {
        self.titles
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_TITLE)
    }

    /// Fails with a configuration error when another artifact was built
    /// against a different vocabulary size.
    pub fn ensure_size(&self, expected: usize, artifact: &str) -> TrajectoryResult<()> {
        if expected != self.len() {
            return Err(TrajectoryError::VocabularyMismatch {
                artifact: artifact.to_string(),
                expected,
                actual: self.len(),
            });
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> TrajectoryResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = VocabularyFile {
            format_version: VOCAB_FORMAT_VERSION,
            size:           self.len(),
            ids:            self.ids.iter().map(|(k, &v)| (k.clone(), v)).collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        tracing::debug!("Saved vocabulary ({} ids) to '{}'", self.len(), path.display());
        Ok(())
    }

    /// Load a vocabulary read-only. The result is always frozen.
    pub fn load(path: impl AsRef<Path>) -> TrajectoryResult<Self> {
        let path     = path.as_ref();
        let artifact = path.display().to_string();
        let json     = fs::read_to_string(path).map_err(|e| {
            TrajectoryError::config(&artifact, format!("cannot read vocabulary: {e}"))
        })?;
        let file: VocabularyFile = serde_json::from_str(&json)?;

        if file.format_version != VOCAB_FORMAT_VERSION {
            return Err(TrajectoryError::config(
                &artifact,
                format!(
                    "unsupported vocabulary format version {} (expected {})",
                    file.format_version, VOCAB_FORMAT_VERSION
                ),
            ));
        }
        if file.size != file.ids.len() + 1 {
            return Err(TrajectoryError::VocabularyMismatch {
                artifact,
                expected: file.size,
                actual:   file.ids.len() + 1,
            });
        }

        let mut titles = vec![String::new(); file.size];
        titles[0] = UNKNOWN_TITLE.to_string();
        for (title, &id) in &file.ids {
            let slot = id as usize;
            if slot == 0 || slot >= file.size || !titles[slot].is_empty() {
                return Err(TrajectoryError::config(
                    &artifact,
                    format!("id {id} for '{title}' is reserved, out of range or duplicated"),
                ));
            }
            titles[slot] = title.clone();
        }

        Ok(Self {
            ids: file.ids.into_iter().collect(),
            titles,
            frozen: true,
        })
    }
}

impl Default for TitleVocabulary {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_and_are_stable() {
        let mut v = TitleVocabulary::new();
        assert_eq!(v.add_or_get("Engineer"), 1);
        assert_eq!(v.add_or_get("Manager"), 2);
        assert_eq!(v.add_or_get("engineer"), 1);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn test_normalisation() {
        assert_eq!(normalize_title("  Senior   Data\tEngineer "), "senior data engineer");
        let v = TitleVocabulary::from_titles(["Senior Engineer"]);
        assert_eq!(v.get("senior  ENGINEER"), 1);
    }

    #[test]
    fn test_unknown_maps_to_zero() {
        let v = TitleVocabulary::from_titles(["a", "b"]);
        assert_eq!(v.to_ids(&["a", "zzz", "b"]), vec![1, 0, 2]);
        assert_eq!(v.title_of(0), UNKNOWN_TITLE);
        assert_eq!(v.title_of(99), UNKNOWN_TITLE);
    }

    #[test]
    fn test_frozen_does_not_grow() {
        let mut v = TitleVocabulary::from_titles(["a"]);
        assert!(v.is_frozen());
        assert_eq!(v.add_or_get("new title"), UNKNOWN_ID);
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        let v    = TitleVocabulary::from_titles(["analyst", "engineer", "director"]);
        v.save(&path).unwrap();

        let loaded = TitleVocabulary::load(&path).unwrap();
        assert!(loaded.is_frozen());
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.get("engineer"), v.get("engineer"));
        assert_eq!(loaded.title_of(3), "director");
    }

    #[test]
    fn test_load_rejects_inconsistent_size() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        fs::write(&path, r#"{"format_version":1,"size":5,"ids":{"a":1}}"#).unwrap();
        let err = TitleVocabulary::load(&path).unwrap_err();
        assert!(matches!(err, TrajectoryError::VocabularyMismatch { .. }));
    }

    #[test]
    fn test_ensure_size() {
        let v = TitleVocabulary::from_titles(["a", "b"]);
        assert!(v.ensure_size(3, "checkpoint").is_ok());
        let err = v.ensure_size(7, "checkpoint").unwrap_err();
        assert!(err.to_string().contains("checkpoint"));
    }
}
