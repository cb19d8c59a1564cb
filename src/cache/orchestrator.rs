use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, instrument, warn};

use super::clock::{Clock, SystemClock, duration_millis};
use super::cold::ColdStore;
use super::config::CacheConfig;
use super::entry::{
    ERROR_COST, Entry, EntryState, Fetched, IN_FLIGHT_COST, ResultHandle, Stale, hot_ttl,
    response_cost,
};
use super::http::{CacheRequest, CacheStatus, CachedResponse, Headers};
use super::metrics::{record_error, record_served};
use super::policy::{HttpCachePolicy, PolicyEvaluator};
use super::revalidate::{Resolved, resolve};
use super::store::HotStore;
use crate::error::{CacheError, FetchError};

pub(crate) struct CacheInner {
    pub(crate) config: CacheConfig,
    pub(crate) store: HotStore<Entry>,
    pub(crate) cold: Option<Arc<dyn ColdStore>>,
    pub(crate) policy: Arc<dyn PolicyEvaluator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Coalescing response cache with an optional cold tier.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("cold", &self.inner.cold)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

#[derive(Debug)]
pub struct ResponseCacheBuilder {
    config: CacheConfig,
    cold: Option<Arc<dyn ColdStore>>,
    policy: Option<Arc<dyn PolicyEvaluator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ResponseCacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            cold: None,
            policy: None,
            clock: None,
        }
    }

    pub fn cold_store(mut self, cold: Arc<dyn ColdStore>) -> Self {
        self.cold = Some(cold);
        self
    }

    /// Defaults to [`HttpCachePolicy`] on the builder's clock.
    pub fn policy(mut self, policy: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> ResponseCache {
        let ResponseCacheBuilder {
            config,
            cold,
            policy,
            clock,
        } = self;
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let policy =
            policy.unwrap_or_else(|| Arc::new(HttpCachePolicy::new(Arc::clone(&clock))));

        let inner = Arc::new_cyclic(|weak: &Weak<CacheInner>| {
            let weak = weak.clone();
            let store = HotStore::with_listener(
                config.capacity_bytes,
                Arc::clone(&clock),
                move |key, entry, cause| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_evicted(key, entry, cause);
                    }
                },
            );
            CacheInner {
                config,
                store,
                cold,
                policy,
                clock,
                pending: Mutex::new(Vec::new()),
            }
        });

        ResponseCache { inner }
    }
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> ResponseCacheBuilder {
        ResponseCacheBuilder::new(config)
    }

    /// Answer `request` for `key`, calling `on_miss` only when no stored or
    /// in-flight result can be used.
    ///
    /// `on_miss` receives the conditional headers to send upstream (empty
    /// for an unconditional fetch). It runs on a spawned task and finishes
    /// even if this future is dropped.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_cached<F, Fut>(
        &self,
        key: &str,
        request: &CacheRequest,
        on_miss: F,
    ) -> Result<CachedResponse, CacheError>
    where
        F: FnOnce(Headers) -> Fut + Send + 'static,
        Fut: Future<Output = Result<CachedResponse, FetchError>> + Send + 'static,
    {
        let result = self.lookup(key, request, on_miss).await;
        match &result {
            Ok(response) => {
                if let Some(status) = served_status(response) {
                    record_served(status);
                }
            }
            Err(err) => record_error(err.kind()),
        }
        result
    }

    async fn lookup<F, Fut>(
        &self,
        key: &str,
        request: &CacheRequest,
        on_miss: F,
    ) -> Result<CachedResponse, CacheError>
    where
        F: FnOnce(Headers) -> Fut + Send + 'static,
        Fut: Future<Output = Result<CachedResponse, FetchError>> + Send + 'static,
    {
        if key.is_empty() {
            return Err(CacheError::bad_request("cache key must not be empty"));
        }
        if request.method.trim().is_empty() {
            return Err(CacheError::bad_request("request method must not be empty"));
        }

        let inner = &self.inner;
        let mut on_miss = Some(on_miss);
        // Revalidation base of a producer we stopped waiting for.
        let mut carried: Option<Stale> = None;

        loop {
            let now = inner.clock.now_millis();
            let observed = inner.store.get(key);
            let usable = observed.as_ref().filter(|entry| !entry.is_expired(now));

            let mut existing = None;
            match usable.map(|entry| (entry, entry.state())) {
                Some((entry, EntryState::InFlight(handle))) => {
                    let handle = handle.clone();
                    match tokio::time::timeout(inner.config.busy_timeout, handle).await {
                        Err(_) => {
                            debug!(cache = "hot", outcome = "busy_timeout", "Retrying lookup");
                            if let Some(base) = entry.revalidation() {
                                carried = Some(base);
                            }
                        }
                        Ok(Ok(fetched)) if !fetched.stored => {
                            return Ok(fetched.response.as_ref().clone().marked(fetched.status));
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => return Err(err),
                    }
                    continue;
                }
                Some((entry, EntryState::Ready(response))) => {
                    if let Some(policy) = entry.policy() {
                        if inner.policy.satisfies_without_revalidation(&policy, request) {
                            debug!(cache = "hot", outcome = "hit", "Serving stored response");
                            if !entry.is_cold_persisted() {
                                inner.schedule_write_behind(key, entry);
                            }
                            let served = CachedResponse {
                                status: response.status,
                                headers: inner.policy.response_headers(&policy),
                                body: response.body.clone(),
                            };
                            return Ok(served.marked(CacheStatus::Hit));
                        }
                        existing = Some(Stale {
                            response: Arc::clone(response),
                            policy,
                        });
                    }
                }
                Some((_, EntryState::Error(err))) => {
                    debug!(cache = "hot", outcome = "error", "Serving cached failure");
                    return Err(err.clone());
                }
                None => existing = carried.take(),
            }

            let (sender, receiver) = oneshot::channel::<Result<Fetched, CacheError>>();
            let abandoned_key = key.to_string();
            let handle: ResultHandle = receiver
                .map(move |received| {
                    received.unwrap_or_else(|_| Err(CacheError::abandoned(abandoned_key)))
                })
                .boxed()
                .shared();
            let busy = inner.config.busy_timeout;
            let placeholder = Arc::new(Entry::in_flight(
                handle.clone(),
                now.saturating_add(duration_millis(busy)),
            ));

            if !inner.store.publish(
                key,
                observed.as_ref(),
                Arc::clone(&placeholder),
                IN_FLIGHT_COST,
                busy,
            ) {
                debug!(cache = "hot", outcome = "lost_race", "Retrying lookup");
                continue;
            }

            // Consumed only on the path that returns below.
            let Some(fetch) = on_miss.take() else {
                return Err(CacheError::abandoned(key));
            };
            debug!(
                cache = "hot",
                outcome = if existing.is_some() { "stale" } else { "miss" },
                "Producing response"
            );

            let producer = Arc::clone(inner);
            let key_owned = key.to_string();
            let request_owned = request.clone();
            tokio::spawn(
                async move {
                    let result = producer
                        .produce(&key_owned, &request_owned, existing, &placeholder, fetch)
                        .await;
                    let _ = sender.send(result);
                }
                .instrument(Span::current()),
            );

            let fetched = handle.await?;
            return Ok(fetched.response.as_ref().clone().marked(fetched.status));
        }
    }

    /// Empty the hot store. Entries worth keeping are written to the cold
    /// tier first; this returns once those writes finish.
    pub async fn purge(&self) {
        self.inner.store.clear();
        self.inner.flush().await;
    }

    /// Write every eligible hot entry to the cold tier and wait for the
    /// writes. Returns how many writes were started.
    pub async fn dump(&self) -> usize {
        let mut scheduled = 0;
        for (key, entry) in self.inner.store.entries() {
            if self.inner.schedule_write_behind(&key, &entry) {
                scheduled += 1;
            }
        }
        self.inner.flush().await;
        scheduled
    }

    /// Wait for outstanding cold-tier writes.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Hot-store slots, including in-flight placeholders.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn total_cost(&self) -> u64 {
        self.inner.store.total_cost()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl CacheInner {
    async fn produce<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        request: &CacheRequest,
        existing: Option<Stale>,
        placeholder: &Arc<Entry>,
        fetch: F,
    ) -> Result<Fetched, CacheError>
    where
        F: FnOnce(Headers) -> Fut,
        Fut: Future<Output = Result<CachedResponse, FetchError>>,
    {
        match resolve(self, key, request, existing, placeholder, fetch).await {
            Ok(resolved) => Ok(self.conclude(key, resolved, placeholder)),
            Err(err) => {
                if err.is_negative_cacheable() {
                    let ttl = self.config.error_ttl;
                    let expiry = self
                        .clock
                        .now_millis()
                        .saturating_add(duration_millis(ttl));
                    let failure = Arc::new(Entry::error(err.clone(), expiry));
                    if !self.store.settle(key, placeholder, failure, ERROR_COST, ttl) {
                        debug!(key, "Newer entry present; failure not cached");
                    }
                } else {
                    self.store.remove_if(key, placeholder);
                }
                warn!(key, error = %err, kind = err.kind(), "Producing response failed");
                Err(err)
            }
        }
    }

    fn conclude(&self, key: &str, resolved: Resolved, placeholder: &Arc<Entry>) -> Fetched {
        let Resolved {
            response,
            policy,
            from_cold,
            cold_current,
            cold_seen,
        } = resolved;

        let ttl = self.policy.time_to_live(&policy);
        if !self.policy.storable(&policy) || ttl.is_zero() {
            self.store.remove_if(key, placeholder);
            if cold_seen {
                self.schedule_cold_delete(key);
            }
            debug!(key, outcome = "no_cache", "Response not stored");
            return Fetched {
                response,
                status: CacheStatus::NoCache,
                stored: false,
            };
        }

        let lifetime = hot_ttl(ttl, self.config.max_age);
        let expiry = self
            .clock
            .now_millis()
            .saturating_add(duration_millis(lifetime));
        let cost = response_cost(&response);
        let entry = Entry::ready(Arc::clone(&response), Arc::new(policy), expiry, cold_current);
        // Refused when oversized or when a newer entry holds the key.
        let stored = self.store.settle(key, placeholder, Arc::new(entry), cost, lifetime);
        if !stored {
            debug!(key, cost, "Response not kept in the hot store");
        }

        let status = if from_cold {
            CacheStatus::Cold
        } else {
            CacheStatus::Miss
        };
        debug!(key, outcome = status.as_str(), ttl_ms = duration_millis(ttl), "Stored response");
        Fetched {
            response,
            status,
            stored,
        }
    }
}

fn served_status(response: &CachedResponse) -> Option<CacheStatus> {
    match response.cache_status()? {
        "hit" => Some(CacheStatus::Hit),
        "miss" => Some(CacheStatus::Miss),
        "cold" => Some(CacheStatus::Cold),
        "no-cache" => Some(CacheStatus::NoCache),
        _ => None,
    }
}
