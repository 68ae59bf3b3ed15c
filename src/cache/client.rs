//! Outbound request cache for API consumers.
//!
//! Wraps a [`Transport`] with an LRU of response bodies keyed by
//! method, URL and a digest of the body. Entries are revalidated with `If-None-Match` once
//! older than the caller's `max_age`; a failed revalidation falls back to the
//! cached body. A request still in flight when [`ClientCache::invalidate`]
//! matches its URL completes for its callers but is not stored.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use metrics::counter;
use regex::Regex;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lock::mutex_guard;
use super::metrics::{CLIENT_CACHE_HIT, CLIENT_CACHE_MISS, CLIENT_CACHE_STALE};

const SOURCE: &str = "cache::client";

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub etag: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one HTTP request. Timeouts are the transport's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport over `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status();
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError(err.to_string()))?;

        Ok(TransportResponse { status, etag, body })
    }
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Bytes>,
    pub headers: HeaderMap,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: HeaderMap::new(),
        }
    }
}

/// Selects entries by URL.
#[derive(Debug, Clone)]
pub enum InvalidatePattern {
    Substring(String),
    Regex(Regex),
}

impl InvalidatePattern {
    fn matches(&self, url: &str) -> bool {
        match self {
            Self::Substring(needle) => url.contains(needle.as_str()),
            Self::Regex(pattern) => pattern.is_match(url),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("request to {url} returned {status}")]
    Status { url: String, status: StatusCode },
    #[error("response from {url} is not valid JSON: {reason}")]
    Decode { url: String, reason: String },
    #[error("request to {url} returned 304 without a cached body")]
    UnexpectedNotModified { url: String },
}

#[derive(Debug, Clone)]
struct ClientEntry {
    url: String,
    body: Bytes,
    etag: Option<String>,
    fetched_at: Instant,
}

type SharedRequest = Shared<BoxFuture<'static, Result<Bytes, ClientError>>>;

struct InFlightRequest {
    url: String,
    /// Set under the entries lock once an invalidation matched `url`.
    discarded: Arc<AtomicBool>,
    request: SharedRequest,
}

impl InFlightRequest {
    fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    entries: Mutex<LruCache<String, ClientEntry>>,
    in_flight: DashMap<String, InFlightRequest>,
}

/// Deduplicating, ETag-aware cache around a [`Transport`].
#[derive(Clone)]
pub struct ClientCache {
    inner: Arc<ClientInner>,
    default_max_age: Duration,
}

impl ClientCache {
    pub fn new(
        transport: Arc<dyn Transport>,
        capacity: NonZeroUsize,
        default_max_age: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                entries: Mutex::new(LruCache::new(capacity)),
                in_flight: DashMap::new(),
            }),
            default_max_age,
        }
    }

    pub fn default_max_age(&self) -> Duration {
        self.default_max_age
    }

    /// Fetch `url` and decode the JSON body, serving from cache while the
    /// stored body is younger than `max_age`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
        max_age: Duration,
    ) -> Result<T, ClientError> {
        let body = self.fetch_bytes(url, options, max_age).await?;
        serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    pub async fn fetch_bytes(
        &self,
        url: &str,
        options: RequestOptions,
        max_age: Duration,
    ) -> Result<Bytes, ClientError> {
        let key = request_key(&options.method, url, options.body.as_ref());

        let cached = mutex_guard(&self.inner.entries, SOURCE, "fetch.lookup")
            .get(&key)
            .cloned();
        if let Some(entry) = cached.as_ref()
            && entry.fetched_at.elapsed() < max_age
        {
            debug!(cache = "client", outcome = "hit", url, "Client cache hit");
            counter!(CLIENT_CACHE_HIT).increment(1);
            return Ok(entry.body.clone());
        }
        counter!(CLIENT_CACHE_MISS).increment(1);

        let request = self.join_or_send(key, url, options, cached);
        request.await
    }

    fn join_or_send(
        &self,
        key: String,
        url: &str,
        options: RequestOptions,
        cached: Option<ClientEntry>,
    ) -> SharedRequest {
        match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => slot.get().request.clone(),
            Entry::Vacant(slot) => {
                let inner = Arc::clone(&self.inner);
                let discarded = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&discarded);
                let url = url.to_string();
                let slot_url = url.clone();
                let future = async move {
                    let result = revalidate(&inner, &key, url, options, cached, &flag).await;
                    inner
                        .in_flight
                        .remove_if(&key, |_, running| Arc::ptr_eq(&running.discarded, &flag));
                    result
                }
                .boxed()
                .shared();
                slot.insert(InFlightRequest {
                    url: slot_url,
                    discarded,
                    request: future.clone(),
                });
                future
            }
        }
    }

    /// Drop entries whose URL matches. Returns how many were removed.
    ///
    /// Matching requests still in flight are detached: their callers get the
    /// response but it is not stored, and later callers send a new request.
    pub fn invalidate(&self, pattern: &InvalidatePattern) -> usize {
        let mut entries = mutex_guard(&self.inner.entries, SOURCE, "invalidate");
        self.inner.in_flight.retain(|_, running| {
            if pattern.matches(&running.url) {
                running.discard();
                false
            } else {
                true
            }
        });
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| pattern.matches(&entry.url))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut entries = mutex_guard(&self.inner.entries, SOURCE, "clear");
        self.inner.in_flight.retain(|_, running| {
            running.discard();
            false
        });
        entries.clear();
    }

    pub fn len(&self) -> usize {
        mutex_guard(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn revalidate(
    inner: &ClientInner,
    key: &str,
    url: String,
    options: RequestOptions,
    cached: Option<ClientEntry>,
    discarded: &AtomicBool,
) -> Result<Bytes, ClientError> {
    let mut headers = options.headers;
    if let Some(etag) = cached.as_ref().and_then(|entry| entry.etag.as_deref())
        && let Ok(value) = HeaderValue::from_str(etag)
    {
        headers.insert(header::IF_NONE_MATCH, value);
    }

    let outcome = inner
        .transport
        .send(TransportRequest {
            method: options.method,
            url: url.clone(),
            headers,
            body: options.body,
        })
        .await;

    let mut entries = mutex_guard(&inner.entries, SOURCE, "revalidate.store");
    let current = !discarded.load(Ordering::SeqCst);
    if !current {
        debug!(cache = "client", url = %url, "Discarded response invalidated while in flight");
    }
    match outcome {
        Ok(response) if response.status == StatusCode::NOT_MODIFIED => {
            let Some(mut entry) = cached else {
                return Err(ClientError::UnexpectedNotModified { url });
            };
            debug!(cache = "client", outcome = "revalidated", url = %url, "Client entry still valid");
            entry.fetched_at = Instant::now();
            let body = entry.body.clone();
            if current {
                entries.put(key.to_string(), entry);
            }
            Ok(body)
        }
        Ok(response) if response.status.is_success() => {
            if current {
                entries.put(
                    key.to_string(),
                    ClientEntry {
                        url,
                        body: response.body.clone(),
                        etag: response.etag,
                        fetched_at: Instant::now(),
                    },
                );
            }
            Ok(response.body)
        }
        Ok(response) => stale_or(
            &mut entries,
            key,
            ClientError::Status {
                url,
                status: response.status,
            },
        ),
        Err(source) => stale_or(&mut entries, key, ClientError::Transport { url, source }),
    }
}

fn stale_or(
    entries: &mut LruCache<String, ClientEntry>,
    key: &str,
    err: ClientError,
) -> Result<Bytes, ClientError> {
    match entries.get(key) {
        Some(entry) => {
            warn!(cache = "client", outcome = "stale", url = %entry.url, error = %err, "Request failed, serving cached body");
            counter!(CLIENT_CACHE_STALE).increment(1);
            Ok(entry.body.clone())
        }
        None => Err(err),
    }
}

fn request_key(method: &Method, url: &str, body: Option<&Bytes>) -> String {
    match body {
        Some(body) => format!("{method} {url} {}", hex::encode(Sha256::digest(body).as_slice())),
        None => format!("{method} {url}"),
    }
}


#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::mock::{MockTransport, ok, status};
    use super::*;

    const URL: &str = "https://cms.example/api/galleries";

    fn client(transport: &Arc<MockTransport>) -> ClientCache {
        let transport: Arc<dyn Transport> = transport.clone();
        ClientCache::new(
            transport,
            NonZeroUsize::new(8).expect("non-zero"),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_hit_avoids_network() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, ok(r#"{"docs":[1]}"#, Some("\"v1\"")));
        let cache = client(&transport);

        let first: Value = cache
            .fetch(URL, RequestOptions::default(), Duration::from_secs(30))
            .await
            .expect("first fetch");
        let second: Value = cache
            .fetch(URL, RequestOptions::default(), Duration::from_secs(30))
            .await
            .expect("second fetch");

        assert_eq!(first, second);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_modified_keeps_body_and_refreshes_timestamp() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, ok(r#"{"docs":[1]}"#, Some("\"v1\"")));
        let cache = client(&transport);
        let max_age = Duration::from_secs(30);

        cache
            .fetch_bytes(URL, RequestOptions::default(), max_age)
            .await
            .expect("seed");
        tokio::time::advance(Duration::from_secs(31)).await;

        transport.respond(URL, status(StatusCode::NOT_MODIFIED));
        let body = cache
            .fetch_bytes(URL, RequestOptions::default(), max_age)
            .await
            .expect("revalidated");
        assert_eq!(body, Bytes::from_static(br#"{"docs":[1]}"#));

        let sent = transport.last_request().expect("revalidation request");
        assert_eq!(
            sent.headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()),
            Some("\"v1\"")
        );

        // Timestamp refreshed: the next call within max_age stays local.
        cache
            .fetch_bytes(URL, RequestOptions::default(), max_age)
            .await
            .expect("local hit");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_with_cached_value_serves_stale() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, ok(r#"{"docs":[]}"#, None));
        let cache = client(&transport);

        cache
            .fetch_bytes(URL, RequestOptions::default(), Duration::ZERO)
            .await
            .expect("seed");

        transport.respond(URL, status(StatusCode::BAD_GATEWAY));
        let body = cache
            .fetch_bytes(URL, RequestOptions::default(), Duration::ZERO)
            .await
            .expect("stale body");
        assert_eq!(body, Bytes::from_static(br#"{"docs":[]}"#));

        transport.respond(URL, Err(TransportError("connection reset".into())));
        assert!(
            cache
                .fetch_bytes(URL, RequestOptions::default(), Duration::ZERO)
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_without_cached_value_propagates() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, status(StatusCode::NOT_FOUND));
        let cache = client(&transport);

        let err = cache
            .fetch_bytes(URL, RequestOptions::default(), Duration::from_secs(30))
            .await
            .expect_err("no fallback");
        assert!(matches!(err, ClientError::Status { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_requests_share_one_call() {
        let mut mock = MockTransport::new();
        mock.delay = Duration::from_millis(100);
        let transport = Arc::new(mock);
        transport.respond(URL, ok("[1,2,3]", None));
        let cache = client(&transport);

        let reads = (0..5).map(|_| {
            let cache = cache.clone();
            async move {
                cache
                    .fetch::<Vec<u32>>(URL, RequestOptions::default(), Duration::from_secs(30))
                    .await
            }
        });
        let results = futures::future::join_all(reads).await;

        assert_eq!(transport.request_count(), 1);
        for result in results {
            assert_eq!(result.expect("shared response"), vec![1, 2, 3]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn body_is_part_of_the_key() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, ok("{}", None));
        let cache = client(&transport);
        let post = |body: &'static str| RequestOptions {
            method: Method::POST,
            body: Some(Bytes::from_static(body.as_bytes())),
            headers: HeaderMap::new(),
        };

        cache
            .fetch_bytes(URL, post("a"), Duration::from_secs(30))
            .await
            .expect("first body");
        cache
            .fetch_bytes(URL, post("b"), Duration::from_secs(30))
            .await
            .expect("second body");
        assert_eq!(transport.request_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bodies_differing_only_in_invalid_utf8_get_distinct_entries() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, ok("{}", None));
        let cache = client(&transport);
        let post = |body: &'static [u8]| RequestOptions {
            method: Method::POST,
            body: Some(Bytes::from_static(body)),
            headers: HeaderMap::new(),
        };

        cache
            .fetch_bytes(URL, post(b"\xff"), Duration::from_secs(30))
            .await
            .expect("first body");
        cache
            .fetch_bytes(URL, post(b"\xfe"), Duration::from_secs(30))
            .await
            .expect("second body");
        assert_eq!(transport.request_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn response_in_flight_during_invalidation_is_not_stored() {
        let mut mock = MockTransport::new();
        mock.delay = Duration::from_millis(100);
        let transport = Arc::new(mock);
        transport.respond(URL, ok("[1]", None));
        let cache = client(&transport);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch::<Vec<u32>>(URL, RequestOptions::default(), Duration::from_secs(30))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.inner.in_flight.len(), 1);

        cache.invalidate(&InvalidatePattern::Substring("galleries".into()));
        transport.respond(URL, ok("[2]", None));

        assert_eq!(pending.await.expect("join").expect("early read"), vec![1]);
        assert!(cache.is_empty());

        let fresh: Vec<u32> = cache
            .fetch(URL, RequestOptions::default(), Duration::from_secs(30))
            .await
            .expect("fresh read");
        assert_eq!(fresh, vec![2]);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_after_invalidation_does_not_join_old_request() {
        let mut mock = MockTransport::new();
        mock.delay = Duration::from_millis(100);
        let transport = Arc::new(mock);
        transport.respond(URL, ok("[1]", None));
        let cache = client(&transport);

        let early = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch::<Vec<u32>>(URL, RequestOptions::default(), Duration::from_secs(30))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();
        transport.respond(URL, ok("[2]", None));

        let late: Vec<u32> = cache
            .fetch(URL, RequestOptions::default(), Duration::from_secs(30))
            .await
            .expect("late read");
        assert_eq!(late, vec![2]);
        early.await.expect("join").expect("early read");

        let cached: Vec<u32> = cache
            .fetch(URL, RequestOptions::default(), Duration::from_secs(30))
            .await
            .expect("cached read");
        assert_eq!(cached, vec![2]);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_by_substring_and_regex() {
        let transport = Arc::new(MockTransport::new());
        let urls = [
            "https://cms.example/api/galleries",
            "https://cms.example/api/galleries?page=2",
            "https://cms.example/api/blog-posts",
        ];
        for url in urls {
            transport.respond(url, ok("{}", None));
        }
        let cache = client(&transport);
        for url in urls {
            cache
                .fetch_bytes(url, RequestOptions::default(), Duration::from_secs(30))
                .await
                .expect("seed");
        }

        let removed = cache.invalidate(&InvalidatePattern::Substring("galleries".into()));
        assert_eq!(removed, 2);

        let pattern = Regex::new(r"/blog-posts$").expect("valid regex");
        assert_eq!(cache.invalidate(&InvalidatePattern::Regex(pattern)), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_least_recently_used() {
        let transport = Arc::new(MockTransport::new());
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let cache = ClientCache::new(
            transport_dyn,
            NonZeroUsize::new(2).expect("non-zero"),
            Duration::from_secs(60),
        );
        for i in 0..3 {
            let url = format!("https://cms.example/api/images/{i}");
            transport.respond(&url, ok("{}", None));
            cache
                .fetch_bytes(&url, RequestOptions::default(), Duration::from_secs(30))
                .await
                .expect("fetch");
        }
        assert_eq!(cache.len(), 2);
    }
}
