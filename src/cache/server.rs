//! Server-side memoization over the tag store.
//!
//! Every read goes through [`ServerCache::cached_entry`]: fresh entries are
//! returned directly, concurrent misses for one key share a single fetch, and
//! stale entries are served while refreshing in the background or when the
//! fetch fails, depending on the content class.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::edge::compute_etag;
use super::entry::CacheEntry;
use super::metrics::{CACHE_COALESCED, CACHE_HIT, CACHE_MISS, CACHE_STALE_SERVED};
use super::policy::{ContentClass, ContentPolicy, PolicyTable};
use super::store::TagStore;
use super::tags::Tag;

pub type UpstreamError = Arc<dyn StdError + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<CacheEntry<Bytes>, CacheError>>>;

/// A fetch in progress and the store generation it started under.
struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("fetch for `{key}` failed: {source}")]
    Upstream {
        key: String,
        #[source]
        source: UpstreamError,
    },
    #[error("failed to encode `{key}`: {reason}")]
    Encode { key: String, reason: String },
    #[error("failed to decode `{key}`: {reason}")]
    Decode { key: String, reason: String },
}

impl CacheError {
    /// The error returned by the fetch function, if that is what failed.
    pub fn upstream(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Upstream { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Coalesced,
}

impl CacheStatus {
    /// Value of the `X-Cache` response header.
    pub fn as_header(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
            Self::Coalesced => "COALESCED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cached {
    pub entry: CacheEntry<Bytes>,
    pub status: CacheStatus,
}

impl Cached {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        serde_json::from_slice(&self.entry.value).map_err(|err| CacheError::Decode {
            key: self.entry.key.clone(),
            reason: err.to_string(),
        })
    }
}

/// Tag-aware memoization for content reads.
pub struct ServerCache {
    store: Arc<TagStore<Bytes>>,
    policies: PolicyTable,
    in_flight: Arc<DashMap<String, InFlight>>,
    enabled: bool,
}

impl ServerCache {
    pub fn new(store: Arc<TagStore<Bytes>>, policies: PolicyTable, enabled: bool) -> Self {
        Self {
            store,
            policies,
            in_flight: Arc::new(DashMap::new()),
            enabled,
        }
    }

    pub fn store(&self) -> &Arc<TagStore<Bytes>> {
        &self.store
    }

    pub fn policy(&self, class: ContentClass) -> &ContentPolicy {
        self.policies.get(class)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Memoize `fetch` under `key` and return the decoded value.
    pub async fn cached<T, F, Fut, E>(
        &self,
        key: &str,
        tags: impl IntoIterator<Item = Tag>,
        class: ContentClass,
        fetch: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        self.cached_entry(key, tags, class, fetch).await?.decode()
    }

    /// Like [`cached`](Self::cached) but returns the stored entry and how it
    /// was obtained.
    pub async fn cached_entry<T, F, Fut, E>(
        &self,
        key: &str,
        tags: impl IntoIterator<Item = Tag>,
        class: ContentClass,
        fetch: F,
    ) -> Result<Cached, CacheError>
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let tags: BTreeSet<Tag> = tags.into_iter().collect();
        let policy = self.policies.get(class).clone();

        if !self.enabled {
            let entry = fetch_entry(key.to_string(), tags, policy.ttl, fetch).await?;
            return Ok(Cached {
                entry,
                status: CacheStatus::Miss,
            });
        }

        let now = Instant::now();
        let mut existing = self.store.get(key);

        if let Some(entry) = existing.as_ref() {
            if entry.is_fresh_at(now) {
                debug!(cache = "server", outcome = "hit", key, "Cache hit");
                counter!(CACHE_HIT, "class" => class.as_str()).increment(1);
                return Ok(Cached {
                    entry: entry.clone(),
                    status: CacheStatus::Hit,
                });
            }

            if let Some(window) = policy.stale_while_revalidate
                && entry.is_within_grace(now, window)
            {
                let (refresh, joined) = self.join_or_start(key, tags, &policy, fetch);
                if !joined {
                    let key = key.to_string();
                    tokio::spawn(async move {
                        if let Err(err) = refresh.await {
                            warn!(cache = "server", key = %key, error = %err, "Background refresh failed");
                        }
                    });
                }
                debug!(cache = "server", outcome = "stale", key, "Serving stale entry while refreshing");
                counter!(CACHE_STALE_SERVED, "class" => class.as_str(), "reason" => "revalidate")
                    .increment(1);
                return Ok(Cached {
                    entry: entry.clone(),
                    status: CacheStatus::Stale,
                });
            }

            if !entry.is_within_grace(now, policy.retention()) {
                self.store.invalidate_key(key);
                existing = None;
            }
        }

        let (shared, joined) = self.join_or_start(key, tags, &policy, fetch);
        if joined {
            counter!(CACHE_COALESCED, "class" => class.as_str()).increment(1);
        } else {
            counter!(CACHE_MISS, "class" => class.as_str()).increment(1);
        }

        match shared.await {
            Ok(entry) => Ok(Cached {
                entry,
                status: if joined {
                    CacheStatus::Coalesced
                } else {
                    CacheStatus::Miss
                },
            }),
            Err(err) => {
                if let CacheError::Upstream { .. } = err
                    && let Some(stale) = existing
                    && let Some(window) = policy.stale_if_error
                    && stale.is_within_grace(Instant::now(), window)
                {
                    warn!(
                        cache = "server",
                        outcome = "stale_if_error",
                        key,
                        error = %err,
                        "Fetch failed, serving stale entry"
                    );
                    counter!(CACHE_STALE_SERVED, "class" => class.as_str(), "reason" => "error")
                        .increment(1);
                    return Ok(Cached {
                        entry: stale,
                        status: CacheStatus::Stale,
                    });
                }
                Err(err)
            }
        }
    }

    /// Returns the in-flight fetch for `key`, starting one if none exists or
    /// if a tag invalidation ran after it started. The flag is true when an
    /// existing fetch was joined.
    fn join_or_start<T, F, Fut, E>(
        &self,
        key: &str,
        tags: BTreeSet<Tag>,
        policy: &ContentPolicy,
        fetch: F,
    ) -> (SharedFetch, bool)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let generation = self.store.generation();
        let slot = self.in_flight.entry(key.to_string());
        if let Entry::Occupied(running) = &slot
            && running.get().generation == generation
        {
            return (running.get().fetch.clone(), true);
        }

        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();
        let ttl = policy.ttl;
        // Entries that can never be served again are not worth storing.
        let retain = !ttl.is_zero() || !policy.retention().is_zero();

        let future = async move {
            let result = fetch_entry(owned_key.clone(), tags, ttl, fetch).await;
            if retain
                && let Ok(entry) = result.as_ref()
                && !store.put_entry_if_current(entry.clone(), generation)
            {
                debug!(
                    cache = "server",
                    key = %owned_key,
                    "Discarded fetch result invalidated while in flight"
                );
            }
            in_flight.remove_if(&owned_key, |_, running| running.generation == generation);
            result
        }
        .boxed()
        .shared();

        slot.insert(InFlight {
            generation,
            fetch: future.clone(),
        });
        (future, false)
    }

    /// Remove every entry carrying any of `tags`.
    pub fn invalidate_tags<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> usize {
        self.store.invalidate_tags(tags)
    }

    pub fn invalidate_key(&self, key: &str) -> bool {
        self.store.invalidate_key(key)
    }
}

async fn fetch_entry<T, F, Fut, E>(
    key: String,
    tags: BTreeSet<Tag>,
    ttl: Duration,
    fetch: F,
) -> Result<CacheEntry<Bytes>, CacheError>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StdError + Send + Sync + 'static,
{
    let value = fetch().await.map_err(|err| CacheError::Upstream {
        key: key.clone(),
        source: Arc::new(err),
    })?;
    let body = serde_json::to_vec(&value).map_err(|err| CacheError::Encode {
        key: key.clone(),
        reason: err.to_string(),
    })?;
    let etag = compute_etag(&body);
    Ok(CacheEntry::new(key, Bytes::from(body), tags, ttl).with_etag(etag))
}
