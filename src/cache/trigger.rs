//! Entry point for content mutations.
//!
//! Publishes an event and, by default, consumes the queue right away so the
//! writer observes its own invalidation. Delivery failures never reach the
//! caller.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::cascade::cascade_tags;
use super::consumer::InvalidationConsumer;
use super::events::{EventQueue, InvalidationEvent};
use super::tags::Tag;

#[derive(Debug, Clone)]
pub struct Submission {
    /// Id of the queued event; `None` when caching is disabled.
    pub event_id: Option<Uuid>,
    /// Tags the event cascades to.
    pub tags: BTreeSet<Tag>,
}

impl Submission {
    pub fn queued(&self) -> bool {
        self.event_id.is_some()
    }
}

pub struct CacheTrigger {
    enabled: bool,
    consume_on_submit: bool,
    queue: Arc<EventQueue>,
    consumer: Arc<InvalidationConsumer>,
}

impl CacheTrigger {
    pub fn new(
        enabled: bool,
        consume_on_submit: bool,
        queue: Arc<EventQueue>,
        consumer: Arc<InvalidationConsumer>,
    ) -> Self {
        Self {
            enabled,
            consume_on_submit,
            queue,
            consumer,
        }
    }

    /// Publish `event`, consuming immediately when configured to.
    pub async fn submit(&self, event: InvalidationEvent) -> Submission {
        self.submit_with(event, self.consume_on_submit).await
    }

    pub async fn submit_with(&self, event: InvalidationEvent, consume_now: bool) -> Submission {
        let tags = cascade_tags(&event);
        if !self.enabled {
            debug!(
                scope = %event.scope,
                identifier = %event.identifier,
                "Invalidation skipped: cache disabled"
            );
            return Submission {
                event_id: None,
                tags,
            };
        }

        let queued = self.queue.publish(event);
        if consume_now {
            self.consumer.consume().await;
        }
        Submission {
            event_id: Some(queued.id),
            tags,
        }
    }

    /// A record in `collection` was created, updated or deleted.
    pub async fn collection_changed(&self, collection: &str, doc: Option<Value>) -> Submission {
        self.submit(InvalidationEvent::collection(collection, doc))
            .await
    }

    /// The global document `name` changed.
    pub async fn global_changed(&self, name: &str) -> Submission {
        self.submit(InvalidationEvent::global(name)).await
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<InvalidationConsumer> {
        &self.consumer
    }
}
