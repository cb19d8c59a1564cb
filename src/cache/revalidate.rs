//! Producing a result for a key nobody else is producing: consult the cold
//! tier, revalidate what we have, or fetch from scratch.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::entry::{Entry, Stale};
use super::http::{CacheRequest, CachedResponse, Headers};
use super::metrics::record_fetch_ms;
use super::orchestrator::CacheInner;
use super::policy::PolicySnapshot;
use crate::error::{CacheError, FetchError};

#[derive(Debug)]
pub(crate) struct Resolved {
    pub response: Arc<CachedResponse>,
    pub policy: PolicySnapshot,
    /// Served from, or confirmed against, a cold record.
    pub from_cold: bool,
    /// The cold record is identical to what we are about to store.
    pub cold_current: bool,
    /// A cold record existed for the key.
    pub cold_seen: bool,
}

/// Run at most one cold lookup and at most one fetch for `key`.
pub(crate) async fn resolve<F, Fut>(
    inner: &CacheInner,
    key: &str,
    request: &CacheRequest,
    existing: Option<Stale>,
    placeholder: &Entry,
    fetch: F,
) -> Result<Resolved, CacheError>
where
    F: FnOnce(Headers) -> Fut,
    Fut: Future<Output = Result<CachedResponse, FetchError>>,
{
    let mut base = existing;
    let mut from_cold = false;
    let mut cold_seen = false;

    if let Some(cold) = inner.cold.as_ref() {
        match cold.get(key).await {
            Ok(Some(record)) if record.key == key => {
                cold_seen = true;
                if inner
                    .policy
                    .satisfies_without_revalidation(&record.policy, request)
                {
                    debug!(key, cache = "cold", outcome = "hit", "Serving cold record");
                    return Ok(Resolved {
                        response: Arc::new(record.response),
                        policy: record.policy,
                        from_cold: true,
                        cold_current: true,
                        cold_seen,
                    });
                }
                debug!(key, cache = "cold", outcome = "stale", "Revalidating cold record");
                from_cold = true;
                base = Some(Stale {
                    response: Arc::new(record.response),
                    policy: Arc::new(record.policy),
                });
            }
            Ok(_) => debug!(key, cache = "cold", outcome = "miss", "No cold record"),
            Err(err) => warn!(
                key,
                cache = "cold",
                error = %err,
                "Cold lookup failed; fetching from origin"
            ),
        }
    }

    let headers = match base.as_ref() {
        Some(stale) => {
            // Waiters that give up on us revalidate the same response.
            placeholder.publish_revalidation(stale.clone());
            inner.policy.revalidation_headers(&stale.policy, request)
        }
        None => Headers::new(),
    };

    let started = Instant::now();
    let outcome = fetch(headers).await;
    record_fetch_ms(started.elapsed().as_secs_f64() * 1000.0, base.is_some());
    let response = outcome.map_err(CacheError::fetch)?;
    check_status(&response)?;

    let Some(stale) = base else {
        if response.is_not_modified() {
            return Err(CacheError::protocol_violation(
                "origin answered 304 to an unconditional request",
            ));
        }
        let policy = inner.policy.snapshot(request, &response);
        return Ok(Resolved {
            response: Arc::new(response),
            policy,
            from_cold: false,
            cold_current: false,
            cold_seen,
        });
    };

    let revalidated = inner
        .policy
        .revalidated_policy(&stale.policy, request, &response);

    if !response.is_not_modified() {
        return Ok(Resolved {
            response: Arc::new(response),
            policy: revalidated.snapshot,
            from_cold: false,
            cold_current: false,
            cold_seen,
        });
    }
    if revalidated.modified {
        return Err(CacheError::protocol_violation(
            "304 validators do not match the stored response",
        ));
    }

    debug!(key, outcome = "not_modified", from_cold, "Revalidated stored response");
    Ok(Resolved {
        response: Arc::new(stale.response.merge_not_modified(&response)),
        policy: revalidated.snapshot,
        from_cold,
        cold_current: false,
        cold_seen,
    })
}

fn check_status(response: &CachedResponse) -> Result<(), CacheError> {
    if (100..=599).contains(&response.status) {
        Ok(())
    } else {
        Err(CacheError::malformed(format!(
            "status {} is outside 100..=599",
            response.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_range_is_enforced() {
        assert!(check_status(&CachedResponse::new(100)).is_ok());
        assert!(check_status(&CachedResponse::new(599)).is_ok());
        assert!(matches!(
            check_status(&CachedResponse::new(0)),
            Err(CacheError::MalformedResponse(_))
        ));
        assert!(check_status(&CachedResponse::new(600)).is_err());
    }
}
