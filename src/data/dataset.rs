use burn::data::dataset::Dataset;

use crate::domain::career::TrajectoryInstance;
use crate::domain::error::{TrajectoryError, TrajectoryResult};

/// Burn `Dataset` over per-prefix training instances.
///
/// Construction rejects empty histories, so every batch the
/// `DataLoader` hands to the batcher can be collated.
pub struct TrajectoryDataset {
    instances: Vec<TrajectoryInstance>,
}

impl TrajectoryDataset {
    pub fn new(instances: Vec<TrajectoryInstance>) -> TrajectoryResult<Self> {
        if let Some(row) = instances.iter().position(|i| i.history.is_empty()) {
            return Err(TrajectoryError::EmptySequence { row });
        }
        Ok(Self { instances })
    }

    pub fn max_history_len(&self) -> usize {
        self.instances.iter().map(|i| i.history.len()).max().unwrap_or(0)
    }
}

impl Dataset<TrajectoryInstance> for TrajectoryDataset {
    fn get(&self, index: usize) -> Option<TrajectoryInstance> {
        self.instances.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.instances.len()
    }
}
