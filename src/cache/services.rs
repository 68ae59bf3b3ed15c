//! Construction of the cache object graph.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use super::client::{ClientCache, ReqwestTransport, Transport};
use super::config::CacheConfig;
use super::consumer::InvalidationConsumer;
use super::events::EventQueue;
use super::policy::PolicyTable;
use super::server::ServerCache;
use super::sinks::{ClientCacheSink, InvalidationSink, PurgeWebhookSink, StoreSink};
use super::store::TagStore;
use super::sweep::FallbackSweep;
use super::trigger::CacheTrigger;

/// Every cache component, wired once at startup and shared by `Arc`.
#[derive(Clone)]
pub struct CacheServices {
    pub config: CacheConfig,
    pub store: Arc<TagStore<Bytes>>,
    pub server: Arc<ServerCache>,
    pub queue: Arc<EventQueue>,
    pub consumer: Arc<InvalidationConsumer>,
    pub trigger: Arc<CacheTrigger>,
    pub sweep: Arc<FallbackSweep>,
    pub client: ClientCache,
}

impl CacheServices {
    /// Wire the production graph, adding the purge webhook sink when a URL is
    /// configured.
    pub fn build(config: &CacheConfig, http: reqwest::Client) -> Self {
        let mut extra: Vec<Arc<dyn InvalidationSink>> = Vec::new();
        if let Some(url) = config.dispatch.purge_webhook_url.as_deref() {
            info!(url, "CDN purge webhook enabled");
            extra.push(Arc::new(PurgeWebhookSink::new(
                http.clone(),
                url,
                config.dispatch.purge_webhook_token.clone(),
                config.dispatch.purge_timeout(),
            )));
        }
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(http));
        Self::with_parts(config, transport, extra)
    }

    /// Wire the graph around `transport`, delivering to the store, the client
    /// cache and `extra_sinks`.
    pub fn with_parts(
        config: &CacheConfig,
        transport: Arc<dyn Transport>,
        extra_sinks: Vec<Arc<dyn InvalidationSink>>,
    ) -> Self {
        let store = Arc::new(TagStore::new());
        let server = Arc::new(ServerCache::new(
            Arc::clone(&store),
            PolicyTable::from_config(&config.policies),
            config.enabled,
        ));
        let queue = Arc::new(EventQueue::new(
            config.dispatch.event_queue_limit_non_zero(),
        ));

        let client = ClientCache::new(
            transport,
            config.client.max_entries_non_zero(),
            config.client.default_max_age(),
        );

        let store_sink: Arc<dyn InvalidationSink> = Arc::new(StoreSink::new(Arc::clone(&store)));
        let client_sink: Arc<dyn InvalidationSink> = Arc::new(ClientCacheSink::new(client.clone()));
        let mut sinks = vec![store_sink, client_sink];
        sinks.extend(extra_sinks);
        let consumer = Arc::new(InvalidationConsumer::new(
            config.dispatch.consume_batch_limit_non_zero(),
            Arc::clone(&queue),
            sinks,
        ));
        let trigger = Arc::new(CacheTrigger::new(
            config.enabled,
            config.dispatch.consume_on_submit,
            Arc::clone(&queue),
            Arc::clone(&consumer),
        ));
        let sweep = Arc::new(FallbackSweep::new(Arc::clone(&store), Arc::clone(&consumer)));

        Self {
            config: config.clone(),
            store,
            server,
            queue,
            consumer,
            trigger,
            sweep,
            client,
        }
    }
}
