//! Destinations for tag invalidations.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::client::{ClientCache, InvalidatePattern};
use super::metrics::CACHE_INVALIDATED_ENTRIES;
use super::store::TagStore;
use super::tags::{Tag, names};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("purge request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("purge endpoint returned {status}")]
    Rejected { status: reqwest::StatusCode },
}

#[async_trait]
pub trait InvalidationSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Invalidate `tags`. Returns how many entries the sink knows it removed;
    /// remote sinks report zero.
    async fn invalidate(&self, tags: &BTreeSet<Tag>) -> Result<usize, SinkError>;
}

/// The in-process tag store.
pub struct StoreSink {
    store: Arc<TagStore<Bytes>>,
}

impl StoreSink {
    pub fn new(store: Arc<TagStore<Bytes>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl InvalidationSink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn invalidate(&self, tags: &BTreeSet<Tag>) -> Result<usize, SinkError> {
        let removed = self.store.invalidate_tags(tags);
        counter!(CACHE_INVALIDATED_ENTRIES).increment(removed as u64);
        debug!(sink = "store", tags = tags.len(), removed, "Invalidated store entries");
        Ok(removed)
    }
}

/// Outbound CMS responses behind a [`ClientCache`].
///
/// Collection and global tags map onto CMS REST paths (`/api/<collection>`,
/// `/api/globals/<name>`). Gallery view and record tags map onto
/// `/api/galleries`, since those views read the galleries collection. Other
/// tags have no URL form and are skipped.
pub struct ClientCacheSink {
    client: ClientCache,
}

impl ClientCacheSink {
    pub fn new(client: ClientCache) -> Self {
        Self { client }
    }

    pub fn url_fragment(tag: &Tag) -> Option<String> {
        let raw = tag.as_str();
        if matches!(
            raw,
            names::GALLERIES
                | names::GALLERIES_LIST_OPTIMIZED
                | names::GALLERIES_PAGINATED
                | names::GALLERY_BY_SLUG
        ) || raw.starts_with("gallery_")
        {
            return Some(format!("/api/{}", names::GALLERIES));
        }
        if let Some(name) = raw.strip_prefix("collection_") {
            return Some(format!("/api/{name}"));
        }
        raw.strip_prefix("global_")
            .map(|name| format!("/api/globals/{name}"))
    }
}

#[async_trait]
impl InvalidationSink for ClientCacheSink {
    fn name(&self) -> &'static str {
        "client"
    }

    async fn invalidate(&self, tags: &BTreeSet<Tag>) -> Result<usize, SinkError> {
        let fragments: BTreeSet<String> = tags.iter().filter_map(Self::url_fragment).collect();
        let removed: usize = fragments
            .into_iter()
            .map(|fragment| self.client.invalidate(&InvalidatePattern::Substring(fragment)))
            .sum();
        debug!(sink = "client", tags = tags.len(), removed, "Invalidated client entries");
        Ok(removed)
    }
}

#[derive(Serialize)]
struct PurgeBody<'a> {
    tags: Vec<&'a str>,
}

/// POSTs `{"tags": [...]}` to a CDN purge endpoint.
pub struct PurgeWebhookSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl PurgeWebhookSink {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            token,
            timeout,
        }
    }
}

#[async_trait]
impl InvalidationSink for PurgeWebhookSink {
    fn name(&self) -> &'static str {
        "purge_webhook"
    }

    async fn invalidate(&self, tags: &BTreeSet<Tag>) -> Result<usize, SinkError> {
        let body = PurgeBody {
            tags: tags.iter().map(Tag::as_str).collect(),
        };
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected { status });
        }
        debug!(sink = "purge_webhook", tags = tags.len(), "Purge request accepted");
        Ok(0)
    }
}
