//! Content mutation events.
//!
//! The CMS (or the revalidate endpoint on its behalf) publishes one event per
//! mutation; the consumer drains them in FIFO order.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::lock::mutex_guard;
use super::metrics::EVENT_QUEUE_LEN;

const SOURCE: &str = "cache::events";

pub type Epoch = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Collection,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection => f.write_str("collection"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// One CMS mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub scope: Scope,
    /// Collection slug or global name.
    pub identifier: String,
    /// The mutated record, used to resolve slugs and relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_doc: Option<Value>,
}

impl InvalidationEvent {
    pub fn collection(name: impl Into<String>, doc: Option<Value>) -> Self {
        Self {
            scope: Scope::Collection,
            identifier: name.into(),
            affected_doc: doc,
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        Self {
            scope: Scope::Global,
            identifier: name.into(),
            affected_doc: None,
        }
    }
}

/// Queued event with an idempotency id and process-local ordering.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub event: InvalidationEvent,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(event: InvalidationEvent, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            event,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Bounded in-memory FIFO. Past `limit` the oldest event is dropped; the
/// fallback sweep covers whatever it would have invalidated.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    dropped: AtomicU64,
    limit: NonZeroUsize,
}

impl EventQueue {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            limit,
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue `event`, returning the queued record.
    pub fn publish(&self, event: InvalidationEvent) -> CacheEvent {
        let queued = CacheEvent::new(event, self.next_epoch());

        info!(
            event_id = %queued.id,
            event_epoch = queued.epoch,
            scope = %queued.event.scope,
            identifier = %queued.event.identifier,
            "Invalidation event enqueued"
        );

        let mut queue = mutex_guard(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit.get()
            && let Some(oldest) = queue.pop_front()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %oldest.id,
                identifier = %oldest.event.identifier,
                limit = self.limit.get(),
                "Invalidation queue full, dropped oldest event"
            );
        }
        queue.push_back(queued.clone());
        gauge!(EVENT_QUEUE_LEN).set(queue.len() as f64);
        queued
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_guard(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(EVENT_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_guard(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn queue(limit: usize) -> EventQueue {
        EventQueue::new(NonZeroUsize::new(limit).expect("non-zero"))
    }

    #[test]
    fn drains_in_fifo_order_with_increasing_epochs() {
        let queue = queue(16);
        queue.publish(InvalidationEvent::global("home"));
        queue.publish(InvalidationEvent::collection("images", None));
        queue.publish(InvalidationEvent::collection("galleries", None));

        let first = queue.drain(2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].event.identifier, "home");
        assert_eq!(first[1].event.identifier, "images");
        assert!(first[0].epoch < first[1].epoch);

        let rest = queue.drain(10);
        assert_eq!(rest.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = queue(2);
        queue.publish(InvalidationEvent::global("a"));
        queue.publish(InvalidationEvent::global("b"));
        queue.publish(InvalidationEvent::global("c"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        let names: Vec<_> = queue
            .drain(10)
            .into_iter()
            .map(|queued| queued.event.identifier)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn event_uses_camel_case_wire_names() {
        let event: InvalidationEvent = serde_json::from_value(json!({
            "scope": "collection",
            "identifier": "images",
            "affectedDoc": {"slug": "half-dome"}
        }))
        .expect("valid event");
        assert_eq!(event.scope, Scope::Collection);
        assert_eq!(event.affected_doc, Some(json!({"slug": "half-dome"})));
    }
}
