//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::CacheConfig;

pub use cli::{CascadeArgs, CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "aperture";
const ENV_PREFIX: &str = "APERTURE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONTENT_ROOT: &str = "content";
const DEFAULT_PAGE_SIZE: u64 = 12;
const DEFAULT_RECENT_LIMIT: u64 = 6;
/// Upper bound for any policy duration (ten years).
const MAX_POLICY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub content: ContentSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBackend {
    Fs { root: PathBuf },
    Cms { base_url: Url },
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub backend: ContentBackend,
    pub page_size: NonZeroU32,
    pub recent_limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AdminSettings {
    /// Shared secret for the admin hooks; `None` disables them.
    pub revalidate_secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cascade(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: CacheConfig,
    content: RawContentSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = enabled;
        }
        if let Some(root) = overrides.content_root.as_ref() {
            self.content.source = Some("fs".into());
            self.content.root = Some(root.clone());
        }
        if let Some(url) = overrides.cms_url.as_ref() {
            self.content.source = Some("cms".into());
            self.content.cms_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            content,
            admin,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            content: build_content_settings(content)?,
            admin: build_admin_settings(admin),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(mut cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    if cache.client.max_entries == 0 {
        return Err(LoadError::invalid(
            "cache.client.max_entries",
            "must be greater than zero",
        ));
    }
    if cache.dispatch.consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.dispatch.consume_batch_limit",
            "must be greater than zero",
        ));
    }
    if cache.dispatch.event_queue_limit == 0 {
        return Err(LoadError::invalid(
            "cache.dispatch.event_queue_limit",
            "must be greater than zero",
        ));
    }
    if cache.dispatch.purge_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.dispatch.purge_timeout_ms",
            "must be greater than zero",
        ));
    }

    let policies = &cache.policies;
    let durations = [
        ("cache.policies.dynamic.ttl_secs", policies.dynamic.ttl_secs),
        (
            "cache.policies.dynamic.stale_while_revalidate_secs",
            policies.dynamic.stale_while_revalidate_secs,
        ),
        ("cache.policies.dynamic.stale_if_error_secs", policies.dynamic.stale_if_error_secs),
        ("cache.policies.semi_static.ttl_secs", policies.semi_static.ttl_secs),
        (
            "cache.policies.semi_static.stale_while_revalidate_secs",
            policies.semi_static.stale_while_revalidate_secs,
        ),
        (
            "cache.policies.semi_static.stale_if_error_secs",
            policies.semi_static.stale_if_error_secs,
        ),
        ("cache.policies.static_pages.ttl_secs", policies.static_pages.ttl_secs),
        (
            "cache.policies.static_pages.stale_while_revalidate_secs",
            policies.static_pages.stale_while_revalidate_secs,
        ),
        (
            "cache.policies.static_pages.stale_if_error_secs",
            policies.static_pages.stale_if_error_secs,
        ),
    ];
    if let Some((key, _)) = durations
        .into_iter()
        .find(|(_, secs)| secs.is_some_and(|secs| secs > MAX_POLICY_SECS))
    {
        return Err(LoadError::invalid(
            key,
            format!("must be at most {MAX_POLICY_SECS} seconds"),
        ));
    }

    cache.dispatch.purge_webhook_url = non_empty(cache.dispatch.purge_webhook_url.take());
    cache.dispatch.purge_webhook_token = non_empty(cache.dispatch.purge_webhook_token.take());
    if let Some(url) = cache.dispatch.purge_webhook_url.as_deref() {
        parse_http_url(url, "cache.dispatch.purge_webhook_url")?;
    }

    Ok(cache)
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let source = content.source.unwrap_or_else(|| "fs".to_string());
    let backend = match source.trim().to_ascii_lowercase().as_str() {
        "fs" => {
            let root = content
                .root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_ROOT));
            if root.as_os_str().is_empty() {
                return Err(LoadError::invalid("content.root", "path must not be empty"));
            }
            ContentBackend::Fs { root }
        }
        "cms" => {
            let raw = non_empty(content.cms_url).ok_or_else(|| {
                LoadError::invalid("content.cms_url", "required when content.source = \"cms\"")
            })?;
            ContentBackend::Cms {
                base_url: parse_http_url(&raw, "content.cms_url")?,
            }
        }
        other => {
            return Err(LoadError::invalid(
                "content.source",
                format!("unknown source `{other}` (expected `fs` or `cms`)"),
            ));
        }
    };

    let page_size = non_zero_u32(
        content.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        "content.page_size",
    )?;
    let recent_limit = usize::try_from(content.recent_limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .map_err(|_| LoadError::invalid("content.recent_limit", "value out of range"))?;

    Ok(ContentSettings {
        backend,
        page_size,
        recent_limit,
    })
}

fn build_admin_settings(admin: RawAdminSettings) -> AdminSettings {
    AdminSettings {
        revalidate_secret: non_empty(admin.revalidate_secret),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    source: Option<String>,
    root: Option<PathBuf>,
    cms_url: Option<String>,
    page_size: Option<u64>,
    recent_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    revalidate_secret: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value).map_err(|err| LoadError::invalid(key, err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{scheme}`"),
        )),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
