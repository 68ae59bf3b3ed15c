use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics as names;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            names::CACHE_HIT,
            Unit::Count,
            "Server cache reads answered from a fresh entry."
        );
        describe_counter!(
            names::CACHE_MISS,
            Unit::Count,
            "Server cache reads that started an upstream fetch."
        );
        describe_counter!(
            names::CACHE_STALE_SERVED,
            Unit::Count,
            "Stale entries served under stale-while-revalidate or stale-if-error."
        );
        describe_counter!(
            names::CACHE_COALESCED,
            Unit::Count,
            "Server cache reads that joined an in-flight fetch."
        );
        describe_counter!(
            names::CACHE_INVALIDATED_ENTRIES,
            Unit::Count,
            "Server cache entries removed by tag invalidation."
        );
        describe_histogram!(
            names::INVALIDATION_CONSUME_MS,
            Unit::Milliseconds,
            "Invalidation batch delivery latency in milliseconds."
        );
        describe_counter!(
            names::INVALIDATION_SINK_FAILURES,
            Unit::Count,
            "Invalidation deliveries rejected by a sink."
        );
        describe_gauge!(
            names::EVENT_QUEUE_LEN,
            Unit::Count,
            "Invalidation events waiting to be consumed."
        );
        describe_counter!(
            names::CLIENT_CACHE_HIT,
            Unit::Count,
            "Outbound requests answered from the client cache."
        );
        describe_counter!(
            names::CLIENT_CACHE_MISS,
            Unit::Count,
            "Outbound requests sent to the network."
        );
        describe_counter!(
            names::CLIENT_CACHE_STALE,
            Unit::Count,
            "Stale client cache values returned after a failed request."
        );
    });
}
