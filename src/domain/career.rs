// ============================================================
// Layer 3 — Career Domain Types
// ============================================================
// CareerRecord       one raw employment row from the store
// CareerSequence     one person's roles, chronological, no overlaps
// TrajectoryInstance one (history prefix → next title) training item

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A raw employment row, exactly as the upstream store returns it.
/// Dates stay strings here; parsing happens in the dataset builder so
/// bad rows can be counted instead of failing the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerRecord {
    pub person_id:     String,
    pub title:         String,
    pub company:       String,
    pub start_date:    String,
    pub end_date:      Option<String>,
    pub outcome_label: Option<bool>,
}

impl CareerRecord {
    pub fn new(
        person_id:  impl Into<String>,
        title:      impl Into<String>,
        company:    impl Into<String>,
        start_date: impl Into<String>,
        end_date:   Option<&str>,
        outcome:    Option<bool>,
    ) -> Self {
        Self {
            person_id:     person_id.into(),
            title:         title.into(),
            company:       company.into(),
            start_date:    start_date.into(),
            end_date:      end_date.map(str::to_string),
            outcome_label: outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub title_id: u32,
    pub start:    NaiveDate,
    /// `None` while the person is still in the role.
    pub end:      Option<NaiveDate>,
}

/// A person's roles in strictly chronological, non-overlapping order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerSequence {
    pub person_id: String,
    roles:         Vec<Role>,
    pub hireable:  bool,
}

impl CareerSequence {
    /// Callers must pass roles sorted by start date with each role
    /// ending no later than the next one starts.
    pub(crate) fn new(person_id: String, roles: Vec<Role>, hireable: bool) -> Self {
        debug_assert!(roles
            .windows(2)
            .all(|w| w[0].start < w[1].start && w[0].end.map_or(true, |e| e <= w[1].start)));
        Self { person_id, roles, hireable }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn title_ids(&self) -> Vec<u32> {
        self.roles.iter().map(|r| r.title_id).collect()
    }

    /// Months spent in role `k`. A role without an end date ends where
    /// the next one starts; the final open role has no tenure yet.
    pub fn tenure_of(&self, k: usize) -> Option<f32> {
        let role = self.roles.get(k)?;
        let end  = role.end.or_else(|| self.roles.get(k + 1).map(|next| next.start))?;
        Some(months_between(role.start, end))
    }
}

/// One training example: the titles held so far and what came next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryInstance {
    pub person_id:     String,
    /// Most recent roles last; never empty.
    pub history:       Vec<u32>,
    pub next_title_id: u32,
    /// Tenure of the last role in `history`, already clamped.
    pub tenure_months: f32,
    pub hireable:      bool,
    /// Start date of the label role, used by the temporal splitter.
    pub anchor_date:   NaiveDate,
}

/// Average Gregorian month length in days.
pub const DAYS_PER_MONTH: f32 = 30.4375;

pub fn months_between(start: NaiveDate, end: NaiveDate) -> f32 {
    (end - start).num_days().max(0) as f32 / DAYS_PER_MONTH
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_tenure_falls_back_to_next_start() {
        let seq = CareerSequence::new(
            "p".into(),
            vec![
                Role { title_id: 1, start: d("2020-01-01"), end: Some(d("2021-01-01")) },
                Role { title_id: 2, start: d("2021-01-01"), end: None },
                Role { title_id: 3, start: d("2021-07-01"), end: None },
            ],
            true,
        );
        assert!((seq.tenure_of(0).unwrap() - 12.0).abs() < 0.05);
        assert!((seq.tenure_of(1).unwrap() - 6.0).abs() < 0.1);
        assert_eq!(seq.tenure_of(2), None);
        assert_eq!(seq.title_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_negative_span_is_zero() {
        assert_eq!(months_between(d("2021-01-01"), d("2020-01-01")), 0.0);
    }
}
