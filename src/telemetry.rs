use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_COLD, METRIC_COLD_WRITE, METRIC_COLD_WRITE_FAILED, METRIC_ERROR, METRIC_EVICT,
    METRIC_FETCH_MS, METRIC_HIT, METRIC_MISS, METRIC_NO_CACHE,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::error::AppError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), AppError> {
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| AppError::telemetry(format!("failed to install tracing subscriber: {err}")))
}

/// Register metric descriptions once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT,
            Unit::Count,
            "Responses served from the hot store without revalidation."
        );
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Responses fetched from the origin and stored."
        );
        describe_counter!(
            METRIC_COLD,
            Unit::Count,
            "Responses served through the cold tier."
        );
        describe_counter!(
            METRIC_NO_CACHE,
            Unit::Count,
            "Responses passed through without being stored."
        );
        describe_counter!(
            METRIC_ERROR,
            Unit::Count,
            "Lookups that ended in an error, labelled by kind."
        );
        describe_counter!(
            METRIC_EVICT,
            Unit::Count,
            "Hot-store evictions, labelled by cause."
        );
        describe_counter!(
            METRIC_COLD_WRITE,
            Unit::Count,
            "Entries written to the cold tier."
        );
        describe_counter!(
            METRIC_COLD_WRITE_FAILED,
            Unit::Count,
            "Cold-tier writes that failed and were rolled back."
        );
        describe_histogram!(
            METRIC_FETCH_MS,
            Unit::Milliseconds,
            "Origin fetch latency in milliseconds."
        );
    });
}
