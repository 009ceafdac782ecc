use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

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

/// Register descriptions for every metric the crate emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "parley_cache_hit_total",
            Unit::Count,
            "Total number of cache reads that found a value."
        );
        describe_counter!(
            "parley_cache_miss_total",
            Unit::Count,
            "Total number of cache reads that fell through, labelled by reason."
        );
        describe_counter!(
            "parley_cache_degraded_total",
            Unit::Count,
            "Number of times the cache entered the DNS cooldown."
        );
        describe_counter!(
            "parley_write_behind_enqueued_total",
            Unit::Count,
            "Write intents accepted by the write-behind queue."
        );
        describe_counter!(
            "parley_write_behind_succeeded_total",
            Unit::Count,
            "Write intents durably committed."
        );
        describe_counter!(
            "parley_write_behind_retried_total",
            Unit::Count,
            "Write intents requeued after a retryable failure."
        );
        describe_counter!(
            "parley_write_behind_dropped_total",
            Unit::Count,
            "Write intents abandoned without being committed, labelled by reason."
        );
        describe_gauge!(
            "parley_write_behind_queue_len",
            Unit::Count,
            "Write intents waiting for the worker."
        );
        describe_histogram!(
            "parley_durable_write_ms",
            Unit::Milliseconds,
            "Latency of one durable write attempt in milliseconds."
        );
    });
}
