//! Drains the event queue and delivers invalidations to every sink.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, instrument, warn};

use super::events::EventQueue;
use super::metrics::{INVALIDATION_CONSUME_MS, INVALIDATION_SINK_FAILURES};
use super::planner::InvalidationPlan;
use super::sinks::InvalidationSink;
use super::tags::Tag;

/// Outcome of delivering one tag set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Entries removed by sinks that can count them.
    pub removed: usize,
    /// Names of sinks that failed.
    pub failed: Vec<&'static str>,
}

pub struct InvalidationConsumer {
    batch_limit: NonZeroUsize,
    queue: Arc<EventQueue>,
    sinks: Vec<Arc<dyn InvalidationSink>>,
}

impl InvalidationConsumer {
    pub fn new(
        batch_limit: NonZeroUsize,
        queue: Arc<EventQueue>,
        sinks: Vec<Arc<dyn InvalidationSink>>,
    ) -> Self {
        Self {
            batch_limit,
            queue,
            sinks,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Drain one batch and deliver its merged plan.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let started_at = Instant::now();
        let events = self.queue.drain(self.batch_limit.get());
        if events.is_empty() {
            return false;
        }

        let plan = InvalidationPlan::from_events(events);
        info!(
            event_ids = ?plan.event_ids,
            plan = %plan,
            "Invalidation consumption starting"
        );

        let report = self.deliver(&plan.tags).await;

        info!(
            events = plan.event_ids.len(),
            tags = plan.tags.len(),
            removed = report.removed,
            failed_sinks = report.failed.len(),
            "Invalidation consumption complete"
        );
        histogram!(INVALIDATION_CONSUME_MS, "mode" => "events")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        true
    }

    /// Consume until the queue is empty.
    pub async fn consume_all(&self) -> usize {
        let mut batches = 0;
        while self.consume().await {
            batches += 1;
        }
        batches
    }

    /// Send `tags` to every sink. Failures are logged and counted, never
    /// returned.
    #[instrument(skip(self, tags), fields(tags = tags.len()))]
    pub async fn deliver(&self, tags: &BTreeSet<Tag>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if tags.is_empty() {
            return report;
        }

        for sink in &self.sinks {
            match sink.invalidate(tags).await {
                Ok(removed) => report.removed += removed,
                Err(err) => {
                    warn!(sink = sink.name(), error = %err, "Invalidation sink failed");
                    counter!(INVALIDATION_SINK_FAILURES, "sink" => sink.name()).increment(1);
                    report.failed.push(sink.name());
                }
            }
        }
        report
    }
}
