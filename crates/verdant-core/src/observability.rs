use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Priority;

/// Point-in-time counts for a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    /// Every tier is present, including empty ones.
    pub by_priority: BTreeMap<Priority, usize>,
    pub processing_count: usize,
}

impl Default for QueueStats {
    fn default() -> Self {
        Self {
            total: 0,
            by_priority: Priority::ALL.iter().map(|p| (*p, 0)).collect(),
            processing_count: 0,
        }
    }
}

impl QueueStats {
    pub(crate) fn record(&mut self, priority: Priority, processing: bool) {
        self.total += 1;
        *self.by_priority.entry(priority).or_default() += 1;
        if processing {
            self.processing_count += 1;
        }
    }

    pub fn count(&self, priority: Priority) -> usize {
        self.by_priority.get(&priority).copied().unwrap_or(0)
    }
}
