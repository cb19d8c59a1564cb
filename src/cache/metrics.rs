//! Metric names and recording helpers. Descriptions are registered by
//! `telemetry::init`.

use metrics::{counter, histogram};

use super::http::CacheStatus;
use super::store::Eviction;

pub const METRIC_HIT: &str = "herdcache_hit_total";
pub const METRIC_MISS: &str = "herdcache_miss_total";
pub const METRIC_COLD: &str = "herdcache_cold_total";
pub const METRIC_NO_CACHE: &str = "herdcache_no_cache_total";
pub const METRIC_ERROR: &str = "herdcache_error_total";
pub const METRIC_EVICT: &str = "herdcache_evict_total";
pub const METRIC_COLD_WRITE: &str = "herdcache_cold_write_total";
pub const METRIC_COLD_WRITE_FAILED: &str = "herdcache_cold_write_failed_total";
pub const METRIC_FETCH_MS: &str = "herdcache_fetch_ms";

pub(crate) fn record_served(status: CacheStatus) {
    let name = match status {
        CacheStatus::Hit => METRIC_HIT,
        CacheStatus::Miss => METRIC_MISS,
        CacheStatus::Cold => METRIC_COLD,
        CacheStatus::NoCache => METRIC_NO_CACHE,
    };
    counter!(name).increment(1);
}

pub(crate) fn record_error(kind: &'static str) {
    counter!(METRIC_ERROR, "kind" => kind).increment(1);
}

pub(crate) fn record_eviction(cause: Eviction) {
    counter!(METRIC_EVICT, "cause" => cause.as_str()).increment(1);
}

pub(crate) fn record_cold_write(ok: bool) {
    if ok {
        counter!(METRIC_COLD_WRITE).increment(1);
    } else {
        counter!(METRIC_COLD_WRITE_FAILED).increment(1);
    }
}

pub(crate) fn record_fetch_ms(millis: f64, conditional: bool) {
    histogram!(
        METRIC_FETCH_MS,
        "conditional" => if conditional { "true" } else { "false" }
    )
    .record(millis);
}
