//! Coalescing HTTP response cache with conditional revalidation and an
//! optional cold tier.
//!
//! The entry point is [`cache::ResponseCache::get_cached`]; everything else
//! in this crate supports the `herdcache` binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod telemetry;
