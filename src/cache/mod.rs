//! Coalescing HTTP response cache.
//!
//! - **Hot store**: bounded, cost-weighted, in-process. Holds ready
//!   responses, negatively cached failures and in-flight placeholders.
//! - **Cold store** (optional): slower and durable. Receives hot entries as
//!   they are evicted and is consulted before going to the origin.
//!
//! Concurrent lookups for one key share a single fetch. Stale entries are
//! revalidated with their validators and a matching 304 is merged onto the
//! stored response.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! capacity_bytes = 524288000
//! max_age_seconds = 86400
//! busy_timeout_ms = 10000
//! error_ttl_ms = 200
//! cold_min_ttl_seconds = 3600
//!
//! [cold]
//! directory = "/var/cache/herdcache"
//! ```

mod clock;
mod cold;
mod cold_fs;
mod config;
mod entry;
mod http;
mod http_date;
mod lock;
pub mod metrics;
mod orchestrator;
mod policy;
mod revalidate;
mod store;
mod tiering;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cold::{ColdRecord, ColdStore, MemoryColdStore};
pub use cold_fs::FsColdStore;
pub use config::CacheConfig;
pub use entry::{ERROR_COST, Fetched, IN_FLIGHT_COST, RESPONSE_OVERHEAD};
pub use http::{CACHE_STATUS_HEADER, CacheRequest, CacheStatus, CachedResponse, Headers};
pub use http_date::{format_http_date, parse_http_date};
pub use orchestrator::{ResponseCache, ResponseCacheBuilder};
pub use policy::{HttpCachePolicy, PolicyEvaluator, PolicySnapshot, Revalidated};
pub use store::{Eviction, EvictionListener, HotStore};
