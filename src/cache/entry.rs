use std::collections::BTreeSet;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;

use super::tags::Tag;

/// One cached computation.
///
/// Freshness is tracked on the monotonic clock; `stored_at` is the wall-clock
/// time used for `Last-Modified` and `X-Cache-Timestamp`.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub tags: BTreeSet<Tag>,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub stored_at: OffsetDateTime,
    pub etag: Option<String>,
}

impl<V> CacheEntry<V> {
    pub fn new(
        key: impl Into<String>,
        value: V,
        tags: impl IntoIterator<Item = Tag>,
        ttl: Duration,
    ) -> Self {
        let created_at = Instant::now();
        Self {
            key: key.into(),
            value,
            tags: tags.into_iter().collect(),
            created_at,
            expires_at: expiry(created_at, ttl),
            stored_at: OffsetDateTime::now_utc(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// True while `now` lies before `expires_at + grace`.
    pub fn is_within_grace(&self, now: Instant, grace: Duration) -> bool {
        self.expires_at
            .checked_add(grace)
            .is_none_or(|limit| now < limit)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// How long past expiry the entry is; zero while fresh.
    pub fn staleness(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.expires_at)
    }
}

/// Far enough out to never expire in practice.
const NEVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `created_at + ttl`, clamped for ttls past what the clock can represent.
fn expiry(created_at: Instant, ttl: Duration) -> Instant {
    created_at
        .checked_add(ttl)
        .or_else(|| created_at.checked_add(NEVER))
        .unwrap_or(created_at)
}
