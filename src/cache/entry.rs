//! Hot-store records and their sizing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};

use super::http::{CacheStatus, CachedResponse};
use super::lock::{rw_read, rw_write};
use super::policy::PolicySnapshot;
use crate::error::CacheError;

const SOURCE: &str = "cache::entry";

/// Fixed overhead charged for every stored response.
pub const RESPONSE_OVERHEAD: u64 = 4000;
/// Cost of a negatively cached failure.
pub const ERROR_COST: u64 = 30_000;
/// Cost of an in-flight placeholder.
pub const IN_FLIGHT_COST: u64 = 1;

const MAX_STALE_JITTER_MS: u64 = 10_000;

/// Outcome of one coalesced fetch, shared by every waiter.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub response: Arc<CachedResponse>,
    pub status: CacheStatus,
    /// Whether the result landed in the hot store. Waiters that find it
    /// missing take this response instead of fetching again.
    pub stored: bool,
}

/// Stored response a revalidation is built on.
#[derive(Debug, Clone)]
pub(crate) struct Stale {
    pub response: Arc<CachedResponse>,
    pub policy: Arc<PolicySnapshot>,
}

pub(crate) type ResultHandle = Shared<BoxFuture<'static, Result<Fetched, CacheError>>>;

pub(crate) enum EntryState {
    /// Being produced; await the handle.
    InFlight(ResultHandle),
    Ready(Arc<CachedResponse>),
    Error(CacheError),
}

pub(crate) struct Entry {
    state: EntryState,
    policy: Option<Arc<PolicySnapshot>>,
    /// Base of the conditional request, published once the producer knows it.
    revalidating: RwLock<Option<Stale>>,
    hard_expiry_ms: u64,
    cold_persisted: AtomicBool,
}

impl Entry {
    pub(crate) fn in_flight(handle: ResultHandle, hard_expiry_ms: u64) -> Self {
        Self::with_state(EntryState::InFlight(handle), None, hard_expiry_ms, false)
    }

    pub(crate) fn ready(
        response: Arc<CachedResponse>,
        policy: Arc<PolicySnapshot>,
        hard_expiry_ms: u64,
        cold_persisted: bool,
    ) -> Self {
        Self::with_state(
            EntryState::Ready(response),
            Some(policy),
            hard_expiry_ms,
            cold_persisted,
        )
    }

    pub(crate) fn error(error: CacheError, hard_expiry_ms: u64) -> Self {
        Self::with_state(EntryState::Error(error), None, hard_expiry_ms, false)
    }

    fn with_state(
        state: EntryState,
        policy: Option<Arc<PolicySnapshot>>,
        hard_expiry_ms: u64,
        cold_persisted: bool,
    ) -> Self {
        Self {
            state,
            policy,
            revalidating: RwLock::new(None),
            hard_expiry_ms,
            cold_persisted: AtomicBool::new(cold_persisted),
        }
    }

    pub(crate) fn state(&self) -> &EntryState {
        &self.state
    }

    pub(crate) fn policy(&self) -> Option<Arc<PolicySnapshot>> {
        self.policy.clone()
    }

    /// Record the stored response this in-flight fetch is revalidating.
    pub(crate) fn publish_revalidation(&self, base: Stale) {
        *rw_write(&self.revalidating, SOURCE, "publish_revalidation") = Some(base);
    }

    pub(crate) fn revalidation(&self) -> Option<Stale> {
        rw_read(&self.revalidating, SOURCE, "revalidation").clone()
    }

    pub(crate) fn is_expired(&self, now_ms: u64) -> bool {
        self.hard_expiry_ms <= now_ms
    }

    /// Claim the right to write this entry to the cold store. Returns `false`
    /// when another writer already holds it.
    pub(crate) fn claim_cold_write(&self) -> bool {
        self.cold_persisted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_cold_write(&self) {
        self.cold_persisted.store(false, Ordering::Release);
    }

    pub(crate) fn is_cold_persisted(&self) -> bool {
        self.cold_persisted.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            EntryState::InFlight(_) => "in_flight",
            EntryState::Ready(_) => "ready",
            EntryState::Error(_) => "error",
        };
        f.debug_struct("Entry")
            .field("state", &state)
            .field("hard_expiry_ms", &self.hard_expiry_ms)
            .field("revalidating", &self.revalidation().is_some())
            .field("cold_persisted", &self.is_cold_persisted())
            .finish_non_exhaustive()
    }
}

pub(crate) fn response_cost(response: &CachedResponse) -> u64 {
    RESPONSE_OVERHEAD + u64::try_from(response.body.len()).unwrap_or(u64::MAX - RESPONSE_OVERHEAD)
}

/// Extra hot-store lifetime past freshness: 1% of the lifetime, one second,
/// and up to ten seconds of jitter so entries stored together do not all
/// go stale together.
pub(crate) fn stale_grace(ttl: Duration) -> Duration {
    ttl / 100 + Duration::from_millis(1000 + fastrand::u64(0..=MAX_STALE_JITTER_MS))
}

/// Hot-store lifetime of a fresh response, capped by `max_age`.
pub(crate) fn hot_ttl(ttl: Duration, max_age: Duration) -> Duration {
    (ttl + stale_grace(ttl)).min(max_age)
}
