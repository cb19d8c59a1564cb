#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use herdcache::cache::{
    CacheConfig, CachedResponse, Clock, ColdStore, Headers, ManualClock, ResponseCache,
};
use herdcache::error::FetchError;

pub type Fetch = BoxFuture<'static, Result<CachedResponse, FetchError>>;

/// Scripted origin: counts calls and records the conditional headers it was
/// given.
#[derive(Clone, Default)]
pub struct Origin {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Headers>>>,
}

impl Origin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Headers> {
        self.seen.lock().expect("seen lock").clone()
    }

    pub fn last_seen(&self) -> Headers {
        self.seen().pop().expect("origin was called")
    }

    /// Answer with `response` after `delay`.
    pub fn respond_after(
        &self,
        delay: Duration,
        response: CachedResponse,
    ) -> impl FnOnce(Headers) -> Fetch + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let seen = Arc::clone(&self.seen);
        move |headers| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().expect("seen lock").push(headers);
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            .boxed()
        }
    }

    pub fn respond(&self, response: CachedResponse) -> impl FnOnce(Headers) -> Fetch + Send + 'static {
        self.respond_after(Duration::ZERO, response)
    }

    pub fn fail(&self, message: &'static str) -> impl FnOnce(Headers) -> Fetch + Send + 'static {
        self.fail_after(Duration::ZERO, message)
    }

    /// Fail with `message` after `delay`.
    pub fn fail_after(
        &self,
        delay: Duration,
        message: &'static str,
    ) -> impl FnOnce(Headers) -> Fetch + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |_headers| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Err::<CachedResponse, FetchError>(message.into())
            }
            .boxed()
        }
    }

    pub fn never(&self) -> impl FnOnce(Headers) -> Fetch + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |_headers| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().boxed()
        }
    }
}

pub fn cacheable(max_age_secs: u64, body: &'static str) -> CachedResponse {
    CachedResponse::ok()
        .with_header("cache-control", format!("public, max-age={max_age_secs}"))
        .with_header("content-type", "text/plain")
        .with_body(body)
}

pub fn cache(clock: &ManualClock) -> ResponseCache {
    ResponseCache::builder(CacheConfig::default())
        .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
        .build()
}

pub fn cache_with_cold(clock: &ManualClock, cold: Arc<dyn ColdStore>) -> ResponseCache {
    ResponseCache::builder(CacheConfig::default())
        .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
        .cold_store(cold)
        .build()
}
