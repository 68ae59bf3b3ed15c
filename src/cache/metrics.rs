//! Metric names emitted by the cache tiers.

pub const CACHE_HIT: &str = "aperture_cache_hit_total";
pub const CACHE_MISS: &str = "aperture_cache_miss_total";
pub const CACHE_STALE_SERVED: &str = "aperture_cache_stale_served_total";
pub const CACHE_COALESCED: &str = "aperture_cache_coalesced_total";
pub const CACHE_INVALIDATED_ENTRIES: &str = "aperture_cache_invalidated_entries_total";

pub const INVALIDATION_CONSUME_MS: &str = "aperture_invalidation_consume_ms";
pub const INVALIDATION_SINK_FAILURES: &str = "aperture_invalidation_sink_failures_total";
pub const EVENT_QUEUE_LEN: &str = "aperture_event_queue_len";

pub const CLIENT_CACHE_HIT: &str = "aperture_client_cache_hit_total";
pub const CLIENT_CACHE_MISS: &str = "aperture_client_cache_miss_total";
pub const CLIENT_CACHE_STALE: &str = "aperture_client_cache_stale_total";
