use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "furrow_coherence_redirect_total",
            Unit::Count,
            "Navigations redirected to align cacheHash with the stored entry."
        );
        describe_counter!(
            "furrow_loader_short_circuit_total",
            Unit::Count,
            "Loads resolved from the store because the input hash was unchanged."
        );
        describe_counter!(
            "furrow_engine_compute_total",
            Unit::Count,
            "Calculation engine invocations."
        );
        describe_counter!(
            "furrow_engine_failure_total",
            Unit::Count,
            "Calculation engine rejections, labelled by error code."
        );
        describe_counter!(
            "furrow_stale_resolution_dropped_total",
            Unit::Count,
            "Resolutions discarded because a later navigation owns the slot."
        );
        describe_counter!(
            "furrow_render_cache_miss_total",
            Unit::Count,
            "Authoritative resolutions whose stored entry had disappeared."
        );
        describe_counter!(
            "furrow_cache_flush_failure_total",
            Unit::Count,
            "Cache store flushes that failed to reach durable storage."
        );
        describe_histogram!(
            "furrow_engine_compute_ms",
            Unit::Milliseconds,
            "Calculation engine latency in milliseconds."
        );
    });
}
