//! Periodic full invalidation.
//!
//! Covers events lost to queue overflow, sink outages and entries cached by
//! other instances behind the same CDN.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::histogram;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::consumer::{DeliveryReport, InvalidationConsumer};
use super::metrics::INVALIDATION_CONSUME_MS;
use super::store::TagStore;
use super::tags::{Tag, view_tags};

pub struct FallbackSweep {
    store: Arc<TagStore<Bytes>>,
    consumer: Arc<InvalidationConsumer>,
}

impl FallbackSweep {
    pub fn new(store: Arc<TagStore<Bytes>>, consumer: Arc<InvalidationConsumer>) -> Self {
        Self { store, consumer }
    }

    /// Tags held by the local store plus every static view tag.
    pub fn known_tags(&self) -> BTreeSet<Tag> {
        let mut tags = self.store.tags();
        tags.extend(view_tags());
        tags
    }

    pub async fn run_once(&self) -> DeliveryReport {
        let started_at = std::time::Instant::now();
        let tags = self.known_tags();
        let report = self.consumer.deliver(&tags).await;
        info!(
            tags = tags.len(),
            removed = report.removed,
            failed_sinks = report.failed.len(),
            "Fallback sweep complete"
        );
        histogram!(INVALIDATION_CONSUME_MS, "mode" => "sweep")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        report
    }

    /// Run [`run_once`](Self::run_once) every `interval`, skipping the
    /// immediate first tick.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::events::EventQueue;
    use crate::cache::sinks::{InvalidationSink, StoreSink};

    fn sweep(store: &Arc<TagStore<Bytes>>) -> Arc<FallbackSweep> {
        let queue = Arc::new(EventQueue::new(NonZeroUsize::new(4).expect("non-zero")));
        let sink: Arc<dyn InvalidationSink> = Arc::new(StoreSink::new(Arc::clone(store)));
        let sinks = vec![sink];
        let consumer = Arc::new(InvalidationConsumer::new(
            NonZeroUsize::new(4).expect("non-zero"),
            queue,
            sinks,
        ));
        Arc::new(FallbackSweep::new(Arc::clone(store), consumer))
    }

    #[tokio::test]
    async fn run_once_clears_every_stored_tag() {
        let store = Arc::new(TagStore::new());
        let ttl = Duration::from_secs(600);
        store.put("a", Bytes::new(), [Tag::from("gallery_yosemite")], ttl);
        store.put("b", Bytes::new(), [Tag::from("prints_a3")], ttl);
        let sweep = sweep(&store);

        let known = sweep.known_tags();
        assert!(known.contains(&Tag::from("prints_a3")));
        assert!(known.contains(&Tag::from("galleries-list-optimized")));

        let report = sweep.run_once().await;
        assert_eq!(report.removed, 2);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweep_runs_on_interval() {
        let store = Arc::new(TagStore::new());
        store.put("a", Bytes::new(), [Tag::from("galleries")], Duration::from_secs(86_400));
        let handle = sweep(&store).spawn(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.is_empty());
        handle.abort();
    }
}
