//! Recently settled outcomes, kept for a bounded grace window so dependents
//! can tell "succeeded" from "failed" from "still running".

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::state::Settlement;
use crate::domain::EntryId;

#[derive(Debug)]
pub struct SettledLog {
    outcomes: HashMap<EntryId, (Settlement, Instant)>,
    /// Insertion order, for expiry and capacity eviction. May hold stale
    /// pairs for ids that were re-recorded or forgotten.
    order: VecDeque<(EntryId, Instant)>,
    grace: Duration,
    capacity: usize,
}

impl SettledLog {
    pub fn new(grace: Duration, capacity: usize) -> Self {
        Self {
            outcomes: HashMap::new(),
            order: VecDeque::new(),
            grace,
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, id: EntryId, settlement: Settlement, now: Instant) {
        self.outcomes.insert(id.clone(), (settlement, now));
        self.order.push_back((id, now));
        self.prune(now);
    }

    pub fn get(&self, id: &EntryId, now: Instant) -> Option<&Settlement> {
        self.outcomes
            .get(id)
            .filter(|(_, at)| now.saturating_duration_since(*at) <= self.grace)
            .map(|(settlement, _)| settlement)
    }

    /// Forget an id that is being admitted again.
    pub fn forget(&mut self, id: &EntryId) {
        self.outcomes.remove(id);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn prune(&mut self, now: Instant) {
        while let Some((id, at)) = self.order.front() {
            let expired = now.saturating_duration_since(*at) > self.grace;
            let over_capacity = self.outcomes.len() > self.capacity;
            if !expired && !over_capacity {
                break;
            }
            let current = self.outcomes.get(id).is_some_and(|(_, recorded)| recorded == at);
            if let Some((id, _)) = self.order.pop_front()
                && current
            {
                self.outcomes.remove(&id);
            }
        }
    }
}
