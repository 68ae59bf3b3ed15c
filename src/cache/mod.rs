//! Aperture cache system
//!
//! Three tiers in front of the CMS, kept consistent by one invalidation path:
//!
//! - **Server**: tag-indexed memoization of content reads ([`ServerCache`])
//! - **Edge**: `Cache-Control`, `ETag` and conditional-request handling for
//!   the CDN and browsers ([`edge`])
//! - **Client**: ETag-aware cache for outbound CMS requests ([`ClientCache`])
//!
//! Mutations enter through [`CacheTrigger`], cascade into tags
//! ([`cascade_tags`]) and are delivered to every [`InvalidationSink`].
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//!
//! [cache.policies.semi_static]
//! ttl_secs = 300
//! stale_if_error_secs = 86400
//!
//! [cache.dispatch]
//! consume_batch_limit = 100
//! fallback_sweep_interval_secs = 3600
//! # ... see config.rs for all options
//! ```

mod cascade;
mod client;
mod config;
mod consumer;
pub mod edge;
mod entry;
mod events;
mod lock;
pub mod metrics;
mod middleware;
mod planner;
mod policy;
mod server;
mod services;
mod sinks;
mod store;
mod sweep;
pub mod tags;
mod trigger;

pub use cascade::{KnownCollection, cascade_tags, gallery_slug, record_id};
pub use client::{
    ClientCache, ClientError, InvalidatePattern, RequestOptions, ReqwestTransport, Transport,
    TransportError, TransportRequest, TransportResponse,
};
pub use config::{CacheConfig, ClassPolicyConfig, ClientCacheConfig, DispatchConfig, PolicyConfig};
pub use consumer::{DeliveryReport, InvalidationConsumer};
pub use edge::{CacheControl, Visibility, build_cache_control, compute_etag, handle_conditional};
pub use entry::CacheEntry;
pub use events::{CacheEvent, Epoch, EventQueue, InvalidationEvent, Scope};
pub use middleware::{EdgePolicy, X_CACHE, X_CACHE_TIMESTAMP, edge_cache_layer};
pub use planner::InvalidationPlan;
pub use policy::{ContentClass, ContentPolicy, PolicyTable};
pub use server::{CacheError, CacheStatus, Cached, ServerCache, UpstreamError};
pub use services::CacheServices;
pub use sinks::{ClientCacheSink, InvalidationSink, PurgeWebhookSink, SinkError, StoreSink};
pub use store::TagStore;
pub use sweep::FallbackSweep;
pub use tags::Tag;
pub use trigger::{CacheTrigger, Submission};
