//! Caching policy per content class.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ClassPolicyConfig, PolicyConfig};
use super::edge::CacheControl;

/// Policy bucket a read belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// Changes on every request or close to it (stats, search).
    Dynamic,
    /// Galleries and posts: edited a few times a day.
    SemiStatic,
    /// Home and globals: edited rarely.
    StaticPage,
}

impl ContentClass {
    pub const ALL: [ContentClass; 3] = [Self::Dynamic, Self::SemiStatic, Self::StaticPage];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::SemiStatic => "semi_static",
            Self::StaticPage => "static_pages",
        }
    }

    pub fn default_policy(self) -> ContentPolicy {
        match self {
            Self::Dynamic => ContentPolicy {
                ttl: Duration::ZERO,
                stale_while_revalidate: None,
                stale_if_error: None,
                edge: CacheControl::public().s_maxage(60).stale_while_revalidate(300),
            },
            Self::SemiStatic => ContentPolicy {
                ttl: Duration::from_secs(300),
                stale_while_revalidate: Some(Duration::from_secs(86_400)),
                stale_if_error: Some(Duration::from_secs(86_400)),
                edge: CacheControl::public()
                    .s_maxage(3_600)
                    .stale_while_revalidate(86_400)
                    .stale_if_error(86_400),
            },
            Self::StaticPage => ContentPolicy {
                ttl: Duration::from_secs(3_600),
                stale_while_revalidate: Some(Duration::from_secs(604_800)),
                stale_if_error: Some(Duration::from_secs(604_800)),
                edge: CacheControl::public()
                    .s_maxage(86_400)
                    .stale_while_revalidate(604_800)
                    .stale_if_error(604_800),
            },
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-process and edge caching behavior for one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPolicy {
    pub ttl: Duration,
    /// Serve stale and refresh in the background while within this window
    /// past expiry. `None` means refresh inline.
    pub stale_while_revalidate: Option<Duration>,
    /// Serve stale when the fetch fails, while within this window past expiry.
    pub stale_if_error: Option<Duration>,
    pub edge: CacheControl,
}

impl ContentPolicy {
    /// Longest time past expiry an entry can still be served from.
    pub fn retention(&self) -> Duration {
        self.stale_while_revalidate
            .unwrap_or_default()
            .max(self.stale_if_error.unwrap_or_default())
    }

    fn overridden(mut self, config: &ClassPolicyConfig) -> Self {
        if let Some(secs) = config.ttl_secs {
            self.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = config.stale_while_revalidate_secs {
            self.stale_while_revalidate = window(secs);
        }
        if let Some(secs) = config.stale_if_error_secs {
            self.stale_if_error = window(secs);
        }
        if let Some(edge) = config.edge.as_ref() {
            self.edge = edge.clone();
        }
        self
    }
}

// Zero disables a window.
fn window(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Debug, Clone)]
pub struct PolicyTable {
    dynamic: ContentPolicy,
    semi_static: ContentPolicy,
    static_pages: ContentPolicy,
}

impl PolicyTable {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            dynamic: ContentClass::Dynamic
                .default_policy()
                .overridden(&config.dynamic),
            semi_static: ContentClass::SemiStatic
                .default_policy()
                .overridden(&config.semi_static),
            static_pages: ContentClass::StaticPage
                .default_policy()
                .overridden(&config.static_pages),
        }
    }

    pub fn get(&self, class: ContentClass) -> &ContentPolicy {
        match class {
            ContentClass::Dynamic => &self.dynamic,
            ContentClass::SemiStatic => &self.semi_static,
            ContentClass::StaticPage => &self.static_pages,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::edge::build_cache_control;

    #[test]
    fn default_edge_headers_per_class() {
        let table = PolicyTable::default();
        assert_eq!(
            build_cache_control(&table.get(ContentClass::Dynamic).edge),
            "public, s-maxage=60, stale-while-revalidate=300"
        );
        assert_eq!(
            build_cache_control(&table.get(ContentClass::SemiStatic).edge),
            "public, s-maxage=3600, stale-while-revalidate=86400, stale-if-error=86400"
        );
        assert_eq!(
            build_cache_control(&table.get(ContentClass::StaticPage).edge),
            "public, s-maxage=86400, stale-while-revalidate=604800, stale-if-error=604800"
        );
    }

    #[test]
    fn dynamic_never_serves_stale() {
        let policy = ContentClass::Dynamic.default_policy();
        assert_eq!(policy.ttl, Duration::ZERO);
        assert_eq!(policy.retention(), Duration::ZERO);
    }

    #[test]
    fn overrides_apply_and_zero_disables_windows() {
        let config = PolicyConfig {
            semi_static: ClassPolicyConfig {
                ttl_secs: Some(30),
                stale_while_revalidate_secs: Some(0),
                stale_if_error_secs: None,
                edge: None,
            },
            ..PolicyConfig::default()
        };
        let table = PolicyTable::from_config(&config);
        let policy = table.get(ContentClass::SemiStatic);

        assert_eq!(policy.ttl, Duration::from_secs(30));
        assert_eq!(policy.stale_while_revalidate, None);
        assert_eq!(policy.stale_if_error, Some(Duration::from_secs(86_400)));
        assert_eq!(policy.retention(), Duration::from_secs(86_400));
    }
}
