//! Cache configuration.
//!
//! Deserialized from the `[cache]` table of `aperture.toml`; validated by
//! `crate::config` before use.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::edge::CacheControl;

const DEFAULT_CLIENT_MAX_ENTRIES: usize = 256;
const DEFAULT_CLIENT_MAX_AGE_SECS: u64 = 60;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5_000;
const DEFAULT_FALLBACK_SWEEP_INTERVAL_SECS: u64 = 3_600;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1_024;
const DEFAULT_PURGE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch. When off every read goes straight to the source and
    /// mutation events are dropped.
    pub enabled: bool,
    pub policies: PolicyConfig,
    pub client: ClientCacheConfig,
    pub dispatch: DispatchConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policies: PolicyConfig::default(),
            client: ClientCacheConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// `[cache.policies.<class>]`. Unset fields keep the class default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub dynamic: ClassPolicyConfig,
    pub semi_static: ClassPolicyConfig,
    pub static_pages: ClassPolicyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassPolicyConfig {
    pub ttl_secs: Option<u64>,
    /// `0` disables background refresh.
    pub stale_while_revalidate_secs: Option<u64>,
    /// `0` disables stale-if-error.
    pub stale_if_error_secs: Option<u64>,
    pub edge: Option<CacheControl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientCacheConfig {
    pub max_entries: usize,
    pub default_max_age_secs: u64,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CLIENT_MAX_ENTRIES,
            default_max_age_secs: DEFAULT_CLIENT_MAX_AGE_SECS,
        }
    }
}

impl ClientCacheConfig {
    /// Clamped to 1 when configured as zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_max_age(&self) -> Duration {
        Duration::from_secs(self.default_max_age_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Consume the queue as part of every submission.
    pub consume_on_submit: bool,
    pub consume_batch_limit: usize,
    /// `0` disables the periodic drain.
    pub auto_consume_interval_ms: u64,
    /// `0` disables the full sweep.
    pub fallback_sweep_interval_secs: u64,
    /// Oldest events are dropped past this many queued.
    pub event_queue_limit: usize,
    /// CDN purge endpoint receiving `{"tags": [...]}`.
    pub purge_webhook_url: Option<String>,
    pub purge_webhook_token: Option<String>,
    pub purge_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            consume_on_submit: true,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            fallback_sweep_interval_secs: DEFAULT_FALLBACK_SWEEP_INTERVAL_SECS,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            purge_webhook_url: None,
            purge_webhook_token: None,
            purge_timeout_ms: DEFAULT_PURGE_TIMEOUT_MS,
        }
    }
}

impl DispatchConfig {
    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn event_queue_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.event_queue_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn auto_consume_interval(&self) -> Option<Duration> {
        (self.auto_consume_interval_ms > 0)
            .then(|| Duration::from_millis(self.auto_consume_interval_ms))
    }

    pub fn fallback_sweep_interval(&self) -> Option<Duration> {
        (self.fallback_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.fallback_sweep_interval_secs))
    }

    pub fn purge_timeout(&self) -> Duration {
        Duration::from_millis(self.purge_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.client.max_entries, 256);
        assert_eq!(config.client.default_max_age(), Duration::from_secs(60));
        assert!(config.dispatch.consume_on_submit);
        assert_eq!(config.dispatch.consume_batch_limit, 100);
        assert_eq!(
            config.dispatch.auto_consume_interval(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            config.dispatch.fallback_sweep_interval(),
            Some(Duration::from_secs(3_600))
        );
        assert!(config.dispatch.purge_webhook_url.is_none());
    }

    #[test]
    fn zero_intervals_disable_background_tasks() {
        let config = DispatchConfig {
            auto_consume_interval_ms: 0,
            fallback_sweep_interval_secs: 0,
            ..DispatchConfig::default()
        };
        assert_eq!(config.auto_consume_interval(), None);
        assert_eq!(config.fallback_sweep_interval(), None);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = ClientCacheConfig {
            max_entries: 0,
            ..ClientCacheConfig::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 1);
    }
}
