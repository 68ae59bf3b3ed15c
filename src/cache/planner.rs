//! Merges drained events into one invalidation plan.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use uuid::Uuid;

use super::cascade::cascade_tags;
use super::events::{CacheEvent, Epoch};
use super::tags::Tag;

#[derive(Debug, Default)]
pub struct InvalidationPlan {
    pub tags: BTreeSet<Tag>,
    pub event_ids: Vec<Uuid>,
    /// Highest epoch covered by this plan.
    pub through_epoch: Option<Epoch>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ events: {}, tags: {}, through_epoch: {:?} }}",
            self.event_ids.len(),
            self.tags.len(),
            self.through_epoch,
        )
    }
}

impl InvalidationPlan {
    /// Union of every event's cascade, skipping repeated event ids.
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen = HashSet::new();

        for queued in events {
            if !seen.insert(queued.id) {
                continue;
            }
            plan.tags.extend(cascade_tags(&queued.event));
            plan.event_ids.push(queued.id);
            plan.through_epoch = plan.through_epoch.max(Some(queued.epoch));
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
