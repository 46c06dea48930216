// ============================================================
// Layer 4 — Temporal Splitter
// ============================================================
// Partitions PEOPLE (not instances) into train / validation / test
// by two calendar cutoffs:
//
//   anchor <  validation_from                 → train
//   validation_from <= anchor < test_from     → validation
//   anchor >= test_from                       → test
//
// A person's anchor is the latest date any of its instances
// references, i.e. the start of its most recent transition. All of a
// person's instances follow it into the same split, so nobody is
// seen in two splits and evaluation only ever scores transitions
// that happened after everything the model trained on.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::career::TrajectoryInstance;
use crate::domain::error::{TrajectoryError, TrajectoryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCutoffs {
    pub validation_from: NaiveDate,
    pub test_from:       NaiveDate,
}

impl SplitCutoffs {
    pub fn new(validation_from: NaiveDate, test_from: NaiveDate) -> TrajectoryResult<Self> {
        if test_from < validation_from {
            return Err(TrajectoryError::config(
                "split cutoffs",
                format!("test cutoff {test_from} precedes validation cutoff {validation_from}"),
            ));
        }
        Ok(Self { validation_from, test_from })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    Validation,
    Test,
}

#[derive(Debug, Default)]
pub struct TemporalSplit {
    pub train:      Vec<TrajectoryInstance>,
    pub validation: Vec<TrajectoryInstance>,
    pub test:       Vec<TrajectoryInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train_people:         usize,
    pub validation_people:    usize,
    pub test_people:          usize,
    pub train_instances:      usize,
    pub validation_instances: usize,
    pub test_instances:       usize,
}

impl TemporalSplit {
    pub fn summary(&self) -> SplitSummary {
        let people = |v: &[TrajectoryInstance]| {
            v.iter().map(|i| i.person_id.as_str()).collect::<BTreeSet<_>>().len()
        };
        SplitSummary {
            train_people:         people(&self.train),
            validation_people:    people(&self.validation),
            test_people:          people(&self.test),
            train_instances:      self.train.len(),
            validation_instances: self.validation.len(),
            test_instances:       self.test.len(),
        }
    }
}

/// Which split a person with this anchor date belongs to.
pub fn assign(anchor: NaiveDate, cutoffs: &SplitCutoffs) -> Split {
    if anchor < cutoffs.validation_from {
        Split::Train
    } else if anchor < cutoffs.test_from {
        Split::Validation
    } else {
        Split::Test
    }
}

pub fn split_temporal(instances: Vec<TrajectoryInstance>, cutoffs: &SplitCutoffs) -> TemporalSplit {
    let mut anchors: BTreeMap<String, NaiveDate> = BTreeMap::new();
    for inst in &instances {
        anchors
            .entry(inst.person_id.clone())
            .and_modify(|d| *d = (*d).max(inst.anchor_date))
            .or_insert(inst.anchor_date);
    }

    let mut out = TemporalSplit::default();
    for inst in instances {
        let split = anchors
            .get(&inst.person_id)
            .map(|&anchor| assign(anchor, cutoffs))
            .unwrap_or(Split::Train);
        match split {
            Split::Train      => out.train.push(inst),
            Split::Validation => out.validation.push(inst),
            Split::Test       => out.test.push(inst),
        }
    }

    let s = out.summary();
    tracing::info!(
        "Temporal split: train {} people / {} instances, validation {} / {}, test {} / {}",
        s.train_people,
        s.train_instances,
        s.validation_people,
        s.validation_instances,
        s.test_people,
        s.test_instances,
    );
    out
}
