// ============================================================
// Layer 4 — Sequence Dataset Builder
// ============================================================
// Turns raw employment rows into per-prefix training instances.
//
//   rows ──group by person──► sort by start date ──► CareerSequence
//        ──every prefix──► TrajectoryInstance
//
// For a person with roles [A, B, C]:
//
//   history [A]    → next B, tenure of A
//   history [A, B] → next C, tenure of B
//
// N roles give exactly N−1 instances. Histories longer than
// `max_history` keep only the most recent roles.
//
// A person with bad data is skipped and counted, never fatal.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::career::{CareerRecord, CareerSequence, Role, TrajectoryInstance};
use crate::domain::error::{DataQualityIssue, TrajectoryError, TrajectoryResult};
use crate::domain::vocabulary::TitleVocabulary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Most recent roles kept per history.
    pub max_history: usize,
    /// Tenure targets are clamped into [tenure_min, tenure_max] months.
    pub tenure_min:  f32,
    pub tenure_max:  f32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_history: 10,
            tenure_min:  1.0,
            tenure_max:  120.0,
        }
    }
}

/// Run-level counters. Per-person problems land here instead of
/// aborting the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub people_seen:             usize,
    pub people_used:             usize,
    pub skipped_unparsable_date: usize,
    pub skipped_end_before_start: usize,
    pub skipped_duplicate_start: usize,
    pub skipped_single_role:     usize,
    pub skipped_missing_outcome: usize,
    pub overlaps_clipped:        usize,
    pub truncated_histories:     usize,
    pub instances:               usize,
}

impl BuildStats {
    pub fn skipped(&self) -> usize {
        self.skipped_unparsable_date
            + self.skipped_end_before_start
            + self.skipped_duplicate_start
            + self.skipped_single_role
            + self.skipped_missing_outcome
    }

    fn record_skip(&mut self, issue: DataQualityIssue) {
        match issue {
            DataQualityIssue::UnparsableDate => self.skipped_unparsable_date += 1,
            DataQualityIssue::EndBeforeStart => self.skipped_end_before_start += 1,
            DataQualityIssue::DuplicateStart => self.skipped_duplicate_start += 1,
            DataQualityIssue::SingleRole     => self.skipped_single_role += 1,
            DataQualityIssue::MissingOutcome => self.skipped_missing_outcome += 1,
        }
    }
}

pub struct BuiltDataset {
    pub instances: Vec<TrajectoryInstance>,
    pub stats:     BuildStats,
}

pub struct SequenceDatasetBuilder {
    config: BuilderConfig,
}

impl SequenceDatasetBuilder {
    pub fn new(config: BuilderConfig) -> TrajectoryResult<Self> {
        if config.max_history == 0 {
            return Err(TrajectoryError::config("builder", "max_history must be at least 1"));
        }
        if !(config.tenure_min <= config.tenure_max) {
            return Err(TrajectoryError::config(
                "builder",
                format!(
                    "tenure_min ({}) must not exceed tenure_max ({})",
                    config.tenure_min, config.tenure_max
                ),
            ));
        }
        Ok(Self { config })
    }

    /// Build sequences and instances. Titles are resolved through
    /// `vocab`: an open vocabulary grows, a frozen one maps unseen
    /// titles to id 0.
    pub fn build(&self, records: Vec<CareerRecord>, vocab: &mut TitleVocabulary) -> BuiltDataset {
        let mut by_person: BTreeMap<String, Vec<CareerRecord>> = BTreeMap::new();
        for r in records {
            by_person.entry(r.person_id.clone()).or_default().push(r);
        }

        let mut stats     = BuildStats::default();
        let mut instances = Vec::new();

        for (person_id, rows) in by_person {
            stats.people_seen += 1;
            match self.build_sequence(&person_id, &rows, vocab, &mut stats) {
                Ok(seq) => {
                    instances.extend(self.expand(&seq, &mut stats));
                    stats.people_used += 1;
                }
                Err(TrajectoryError::DataQuality { person_id, issue }) => {
                    tracing::debug!("Skipping person '{}': {}", person_id, issue);
                    stats.record_skip(issue);
                }
                Err(other) => {
                    tracing::warn!("Skipping person '{}': {}", person_id, other);
                }
            }
        }

        stats.instances = instances.len();
        tracing::info!(
            "Built {} instances from {}/{} people ({} skipped, {} overlaps clipped, {} histories truncated)",
            stats.instances,
            stats.people_used,
            stats.people_seen,
            stats.skipped(),
            stats.overlaps_clipped,
            stats.truncated_histories,
        );

        BuiltDataset { instances, stats }
    }

    fn build_sequence(
        &self,
        person_id: &str,
        rows:      &[CareerRecord],
        vocab:     &mut TitleVocabulary,
        stats:     &mut BuildStats,
    ) -> TrajectoryResult<CareerSequence> {
        let skip = |issue| TrajectoryError::DataQuality {
            person_id: person_id.to_string(),
            issue,
        };

        if rows.len() < 2 {
            return Err(skip(DataQualityIssue::SingleRole));
        }

        // (start, end, row) with dates validated
        let mut spans = Vec::with_capacity(rows.len());
        for row in rows {
            let start = parse_date(&row.start_date).ok_or_else(|| skip(DataQualityIssue::UnparsableDate))?;
            let end = match &row.end_date {
                Some(s) => Some(parse_date(s).ok_or_else(|| skip(DataQualityIssue::UnparsableDate))?),
                None    => None,
            };
            if end.is_some_and(|e| e < start) {
                return Err(skip(DataQualityIssue::EndBeforeStart));
            }
            spans.push((start, end, row));
        }
        spans.sort_by_key(|(start, _, _)| *start);

        if spans.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(skip(DataQualityIssue::DuplicateStart));
        }

        let hireable = spans
            .iter()
            .rev()
            .find_map(|(_, _, row)| row.outcome_label)
            .ok_or_else(|| skip(DataQualityIssue::MissingOutcome))?;

        let mut roles: Vec<Role> = Vec::with_capacity(spans.len());
        for i in 0..spans.len() {
            let (start, mut end, row) = spans[i];
            if let Some(next) = spans.get(i + 1) {
                if end.is_some_and(|e| e > next.0) {
                    end = Some(next.0);
                    stats.overlaps_clipped += 1;
                }
            }
            roles.push(Role {
                title_id: vocab.add_or_get(&row.title),
                start,
                end,
            });
        }

        Ok(CareerSequence::new(person_id.to_string(), roles, hireable))
    }

    /// One instance per prefix length 1..N.
    fn expand(&self, seq: &CareerSequence, stats: &mut BuildStats) -> Vec<TrajectoryInstance> {
        let ids   = seq.title_ids();
        let roles = seq.roles();
        let cap   = self.config.max_history;

        (1..ids.len())
            .map(|i| {
                let from = i.saturating_sub(cap);
                if from > 0 {
                    stats.truncated_histories += 1;
                }
                let tenure = seq
                    .tenure_of(i - 1)
                    .unwrap_or(self.config.tenure_min)
                    .clamp(self.config.tenure_min, self.config.tenure_max);

                TrajectoryInstance {
                    person_id:     seq.person_id.clone(),
                    history:       ids[from..i].to_vec(),
                    next_title_id: ids[i],
                    tenure_months: tenure,
                    hireable:      seq.hireable,
                    anchor_date:   roles[i].start,
                }
            })
            .collect()
    }
}

/// ISO dates, with month precision (`YYYY-MM`) mapped to the 1st.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(p: &str, title: &str, start: &str, end: Option<&str>, out: Option<bool>) -> CareerRecord {
        CareerRecord::new(p, title, "Acme", start, end, out)
    }

    fn builder(max_history: usize) -> SequenceDatasetBuilder {
        SequenceDatasetBuilder::new(BuilderConfig { max_history, ..BuilderConfig::default() }).unwrap()
    }

    #[test]
    fn test_worked_example_two_instances() {
        let records = vec![
            rec("p1", "A", "2015-01-01", Some("2016-01-01"), Some(true)),
            rec("p1", "B", "2016-01-01", Some("2018-01-01"), Some(true)),
            rec("p1", "C", "2018-01-01", None,               Some(true)),
        ];
        let mut vocab = TitleVocabulary::new();
        let built     = builder(10).build(records, &mut vocab);

        let (a, b, c) = (vocab.get("A"), vocab.get("B"), vocab.get("C"));
        assert_eq!(built.instances.len(), 2);

        let first = &built.instances[0];
        assert_eq!(first.history, vec![a]);
        assert_eq!(first.next_title_id, b);
        assert!((first.tenure_months - 12.0).abs() < 0.1);
        assert!(first.hireable);

        let second = &built.instances[1];
        assert_eq!(second.history, vec![a, b]);
        assert_eq!(second.next_title_id, c);
        assert!((second.tenure_months - 24.0).abs() < 0.1);
    }

    #[test]
    fn test_n_roles_give_n_minus_one_increasing_prefixes() {
        let dates = ["2010-01", "2011-01", "2012-06", "2014-02", "2016-09", "2019-01"];
        let records: Vec<_> = dates
            .iter()
            .enumerate()
            .map(|(i, d)| rec("p", &format!("title {i}"), d, None, Some(false)))
            .collect();
        let mut vocab = TitleVocabulary::new();
        let built     = builder(100).build(records, &mut vocab);

        assert_eq!(built.instances.len(), dates.len() - 1);
        for (i, inst) in built.instances.iter().enumerate() {
            assert_eq!(inst.history.len(), i + 1);
            if i > 0 {
                assert!(inst.history.starts_with(&built.instances[i - 1].history));
            }
        }
    }

    #[test]
    fn test_long_history_keeps_most_recent_roles() {
        let records: Vec<_> = (0..6)
            .map(|i| rec("p", &format!("t{i}"), &format!("201{i}-01-01"), None, Some(true)))
            .collect();
        let mut vocab = TitleVocabulary::new();
        let built     = builder(2).build(records, &mut vocab);

        let last = built.instances.last().unwrap();
        assert_eq!(last.history, vec![vocab.get("t3"), vocab.get("t4")]);
        assert_eq!(last.next_title_id, vocab.get("t5"));
        assert_eq!(built.stats.truncated_histories, 3);
    }

    #[test]
    fn test_bad_people_are_counted_not_fatal() {
        let records = vec![
            rec("single", "A", "2015-01-01", None, Some(true)),
            rec("baddate", "A", "not a date", None, Some(true)),
            rec("baddate", "B", "2016-01-01", None, Some(true)),
            rec("backwards", "A", "2016-01-01", Some("2015-01-01"), Some(true)),
            rec("backwards", "B", "2017-01-01", None, Some(true)),
            rec("nolabel", "A", "2015-01-01", None, None),
            rec("nolabel", "B", "2016-01-01", None, None),
            rec("good", "A", "2015-01-01", None, Some(false)),
            rec("good", "B", "2016-01-01", None, None),
        ];
        let mut vocab = TitleVocabulary::new();
        let built     = builder(10).build(records, &mut vocab);

        assert_eq!(built.stats.people_seen, 5);
        assert_eq!(built.stats.people_used, 1);
        assert_eq!(built.stats.skipped_single_role, 1);
        assert_eq!(built.stats.skipped_unparsable_date, 1);
        assert_eq!(built.stats.skipped_end_before_start, 1);
        assert_eq!(built.stats.skipped_missing_outcome, 1);
        assert_eq!(built.instances.len(), 1);
        // terminal outcome comes from the latest labelled row
        assert!(!built.instances[0].hireable);
    }

    #[test]
    fn test_unsorted_rows_and_overlaps() {
        let records = vec![
            rec("p", "B", "2016-01-01", None,               Some(true)),
            rec("p", "A", "2015-01-01", Some("2016-06-01"), Some(true)),
        ];
        let mut vocab = TitleVocabulary::new();
        let built     = builder(10).build(records, &mut vocab);

        assert_eq!(built.stats.overlaps_clipped, 1);
        let inst = &built.instances[0];
        assert_eq!(inst.history, vec![vocab.get("A")]);
        assert!((inst.tenure_months - 12.0).abs() < 0.1);
    }

    #[test]
    fn test_tenure_is_clamped() {
        let records = vec![
            rec("p", "A", "1990-01-01", Some("2020-01-01"), Some(true)),
            rec("p", "B", "2020-01-01", None,               Some(true)),
        ];
        let mut vocab = TitleVocabulary::new();
        let built     = builder(10).build(records, &mut vocab);
        assert_eq!(built.instances[0].tenure_months, BuilderConfig::default().tenure_max);
    }

    #[test]
    fn test_frozen_vocab_maps_unknown_titles_to_zero() {
        let records = vec![
            rec("p", "Known",   "2015-01-01", None, Some(true)),
            rec("p", "Unknown", "2016-01-01", None, Some(true)),
        ];
        let mut vocab = TitleVocabulary::from_titles(["known"]);
        let built     = builder(10).build(records, &mut vocab);
        assert_eq!(built.instances[0].history, vec![1]);
        assert_eq!(built.instances[0].next_title_id, 0);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SequenceDatasetBuilder::new(BuilderConfig { max_history: 0, ..Default::default() }).is_err());
        assert!(SequenceDatasetBuilder::new(BuilderConfig {
            tenure_min: 10.0,
            tenure_max: 1.0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2020-03-15"), NaiveDate::from_ymd_opt(2020, 3, 15));
        assert_eq!(parse_date(" 2020-03 "), NaiveDate::from_ymd_opt(2020, 3, 1));
        assert_eq!(parse_date("03/15/2020"), None);
    }
}
