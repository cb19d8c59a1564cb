//! Freshness and revalidation policy.
//!
//! The cache only talks to [`PolicyEvaluator`]; it never interprets
//! `cache-control`, `expires` or `vary` itself. [`HttpCachePolicy`] is the
//! shared-cache evaluator used by default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::http::{CacheRequest, CachedResponse, Headers};
use super::http_date::parse_http_date;

/// Vary tokens that do not split the cache. Any other token disables caching.
const VARY_ALLOWED: &[&str] = &["accept-charset", "accept-encoding", "host", "accept", "origin"];

/// Statuses that may be stored without explicit freshness information.
const CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 204, 206, 300, 301, 308, 404, 405, 410, 414, 501];

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const MAX_CLOCK_DRIFT_MS: u64 = 8 * 3600 * 1000;

/// Decision state computed once per stored response.
///
/// Serializable so that it travels with cold records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    method: String,
    status: u16,
    /// Request headers selected by the response's `vary`, plus the request's
    /// own `cache-control` and `authorization` presence.
    request_headers: Headers,
    response_headers: Headers,
    response_time_ms: u64,
}

impl PolicySnapshot {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn response_headers(&self) -> &Headers {
        &self.response_headers
    }

    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms
    }

    pub fn etag(&self) -> Option<&str> {
        self.response_headers.get("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.response_headers.get("last-modified")
    }
}

/// Outcome of applying a conditional-fetch response to a snapshot.
#[derive(Debug, Clone)]
pub struct Revalidated {
    pub snapshot: PolicySnapshot,
    /// `false` when the response was a 304 matching the stored validators.
    pub modified: bool,
}

/// Capability the cache consumes to decide storability, freshness and
/// revalidation.
pub trait PolicyEvaluator: Send + Sync + fmt::Debug {
    /// Build the snapshot for a freshly fetched response.
    fn snapshot(&self, request: &CacheRequest, response: &CachedResponse) -> PolicySnapshot;

    fn storable(&self, snapshot: &PolicySnapshot) -> bool;

    /// Remaining freshness; zero means the response must not be reused as is.
    fn time_to_live(&self, snapshot: &PolicySnapshot) -> Duration;

    fn satisfies_without_revalidation(
        &self,
        snapshot: &PolicySnapshot,
        request: &CacheRequest,
    ) -> bool;

    /// Sanitized headers for a response served from storage.
    fn response_headers(&self, snapshot: &PolicySnapshot) -> Headers;

    /// Validators to send with a conditional fetch.
    fn revalidation_headers(&self, snapshot: &PolicySnapshot, request: &CacheRequest) -> Headers;

    fn revalidated_policy(
        &self,
        snapshot: &PolicySnapshot,
        request: &CacheRequest,
        response: &CachedResponse,
    ) -> Revalidated;
}

/// Shared-cache semantics of RFC 9111, reduced to what a coalescing proxy
/// cache needs.
#[derive(Debug, Clone)]
pub struct HttpCachePolicy {
    clock: Arc<dyn Clock>,
}

impl HttpCachePolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn freshness_lifetime_ms(&self, snapshot: &PolicySnapshot) -> u64 {
        let headers = &snapshot.response_headers;
        let cc = directives(headers.get("cache-control"));
        if cc.contains_key("no-cache") {
            return 0;
        }

        let response_time = snapshot.response_time_ms;
        let server_time = headers
            .get("date")
            .and_then(parse_http_date)
            .filter(|date| date.abs_diff(response_time) <= MAX_CLOCK_DRIFT_MS)
            .unwrap_or(response_time);

        // When max-age and Expires disagree, the one that disables caching wins.
        let mut expires_time = None;
        if let Some(raw) = headers.get("expires") {
            match parse_http_date(raw) {
                Some(expires) if expires < server_time => return 0,
                Some(expires) => expires_time = Some(expires),
                None => {}
            }
        }

        if let Some(seconds) = seconds_directive(&cc, "s-maxage") {
            return seconds.saturating_mul(1000);
        }
        if let Some(seconds) = seconds_directive(&cc, "max-age") {
            return seconds.saturating_mul(1000);
        }

        if let Some(expires) = expires_time {
            return expires - server_time;
        }

        if CACHEABLE_BY_DEFAULT.contains(&snapshot.status)
            && let Some(last_modified) = headers.get("last-modified").and_then(parse_http_date)
            && server_time > last_modified
        {
            // 1% of the document's age when nothing better is known.
            return (server_time - last_modified) / 100;
        }

        0
    }

    fn age_ms(&self, snapshot: &PolicySnapshot) -> u64 {
        let reported = snapshot
            .response_headers
            .get("age")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0)
            .saturating_mul(1000);
        reported.saturating_add(self.now().saturating_sub(snapshot.response_time_ms))
    }

    fn vary_matches(&self, snapshot: &PolicySnapshot, request: &CacheRequest) -> bool {
        let Some(vary) = snapshot.response_headers.get("vary") else {
            return true;
        };
        vary_tokens(vary).all(|name| {
            snapshot.request_headers.get(&name) == request.headers.get(&name)
        })
    }
}

impl Default for HttpCachePolicy {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl PolicyEvaluator for HttpCachePolicy {
    fn snapshot(&self, request: &CacheRequest, response: &CachedResponse) -> PolicySnapshot {
        let mut request_headers = Headers::new();
        if let Some(vary) = response.headers.get("vary") {
            for name in vary_tokens(vary) {
                if let Some(value) = request.headers.get(&name) {
                    request_headers.insert(&name, value);
                }
            }
        }
        if let Some(cc) = request.headers.get("cache-control") {
            request_headers.insert("cache-control", cc);
        }
        if request.headers.contains("authorization") {
            request_headers.insert("authorization", "present");
        }

        PolicySnapshot {
            method: request.method.to_ascii_uppercase(),
            status: response.status,
            request_headers,
            response_headers: response.headers.clone(),
            response_time_ms: self.now(),
        }
    }

    fn storable(&self, snapshot: &PolicySnapshot) -> bool {
        if !matches!(snapshot.method.as_str(), "GET" | "HEAD") {
            return false;
        }

        let headers = &snapshot.response_headers;
        let cc = directives(headers.get("cache-control"));
        let request_cc = directives(snapshot.request_headers.get("cache-control"));

        if cc.contains_key("no-store") || request_cc.contains_key("no-store") {
            return false;
        }
        if cc.contains_key("private") {
            return false;
        }

        let public = cc.contains_key("public");
        if !public && headers.contains("set-cookie") {
            return false;
        }
        if snapshot.request_headers.contains("authorization")
            && !(public || cc.contains_key("s-maxage") || cc.contains_key("must-revalidate"))
        {
            return false;
        }

        if let Some(vary) = headers.get("vary") {
            // TODO: split entries per vary dimension instead of refusing them.
            if vary_tokens(vary).any(|token| !VARY_ALLOWED.contains(&token.as_str())) {
                return false;
            }
        }

        let explicit_freshness = headers.contains("expires")
            || cc.contains_key("max-age")
            || cc.contains_key("s-maxage")
            || public;
        CACHEABLE_BY_DEFAULT.contains(&snapshot.status)
            || (explicit_freshness && (200..600).contains(&snapshot.status) && snapshot.status != 304)
    }

    fn time_to_live(&self, snapshot: &PolicySnapshot) -> Duration {
        let lifetime = self.freshness_lifetime_ms(snapshot);
        Duration::from_millis(lifetime.saturating_sub(self.age_ms(snapshot)))
    }

    fn satisfies_without_revalidation(
        &self,
        snapshot: &PolicySnapshot,
        request: &CacheRequest,
    ) -> bool {
        if !snapshot.method.eq_ignore_ascii_case(&request.method) {
            return false;
        }

        let request_cc = directives(request.headers.get("cache-control"));
        if request_cc.contains_key("no-cache")
            || request
                .headers
                .get("pragma")
                .is_some_and(|pragma| pragma.contains("no-cache"))
        {
            return false;
        }

        if !self.vary_matches(snapshot, request) {
            return false;
        }

        let ttl = self.time_to_live(snapshot);
        if ttl.is_zero() {
            return false;
        }
        if let Some(max_age) = seconds_directive(&request_cc, "max-age")
            && self.age_ms(snapshot) > max_age.saturating_mul(1000)
        {
            return false;
        }
        if let Some(min_fresh) = seconds_directive(&request_cc, "min-fresh")
            && ttl < Duration::from_secs(min_fresh)
        {
            return false;
        }
        true
    }

    fn response_headers(&self, snapshot: &PolicySnapshot) -> Headers {
        let mut headers = snapshot.response_headers.clone();

        let listed: Vec<String> = headers
            .get("connection")
            .map(|value| {
                value
                    .split(',')
                    .map(|name| name.trim().to_ascii_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
            headers.remove(name);
        }

        headers.insert("age", (self.age_ms(snapshot) / 1000).to_string());
        headers
    }

    fn revalidation_headers(&self, snapshot: &PolicySnapshot, _request: &CacheRequest) -> Headers {
        let mut headers = Headers::new();
        if let Some(etag) = snapshot.etag() {
            headers.insert("if-none-match", etag);
        }
        if let Some(last_modified) = snapshot.last_modified() {
            headers.insert("if-modified-since", last_modified);
        }
        headers
    }

    fn revalidated_policy(
        &self,
        snapshot: &PolicySnapshot,
        request: &CacheRequest,
        response: &CachedResponse,
    ) -> Revalidated {
        if !response.is_not_modified() {
            return Revalidated {
                snapshot: self.snapshot(request, response),
                modified: true,
            };
        }

        let matches = match (response.headers.get("etag"), snapshot.etag()) {
            (Some(new), Some(old)) => weak_etag(new) == weak_etag(old),
            (Some(_), None) => false,
            (None, _) => match (response.headers.get("last-modified"), snapshot.last_modified()) {
                (Some(new), Some(old)) => new == old,
                _ => true,
            },
        };
        if !matches {
            return Revalidated {
                snapshot: snapshot.clone(),
                modified: true,
            };
        }

        let merged = CachedResponse {
            status: snapshot.status,
            headers: snapshot
                .response_headers
                .merged_with_not_modified(&response.headers),
            body: bytes::Bytes::new(),
        };
        Revalidated {
            snapshot: self.snapshot(request, &merged),
            modified: false,
        }
    }
}

fn directives(value: Option<&str>) -> HashMap<String, Option<String>> {
    let Some(value) = value else {
        return HashMap::new();
    };
    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            Some(match part.split_once('=') {
                Some((name, arg)) => (
                    name.trim().to_ascii_lowercase(),
                    Some(arg.trim().trim_matches('"').to_string()),
                ),
                None => (part.to_ascii_lowercase(), None),
            })
        })
        .collect()
}

fn seconds_directive(directives: &HashMap<String, Option<String>>, name: &str) -> Option<u64> {
    directives
        .get(name)
        .and_then(|arg| arg.as_deref())
        .and_then(|arg| arg.parse::<u64>().ok())
}

fn vary_tokens(vary: &str) -> impl Iterator<Item = String> + '_ {
    vary.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
}

fn weak_etag(etag: &str) -> &str {
    etag.trim().trim_start_matches("W/")
}
