//! Request and response values exchanged with the fetch callback.
//!
//! Responses are immutable once stored: every reader gets its own copy, and
//! per-reader decoration (the `x-cache` marker) is applied to that copy.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Provenance header attached to every response leaving the cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

const NOT_MODIFIED: u16 = 304;

/// Headers never taken from a 304 when it is merged onto a stored response.
const NOT_MODIFIED_EXCLUDED: &[&str] = &["content-length"];

/// Case-insensitive header map. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `newer` on top of `self`: names present in `newer` win,
    /// everything else is kept.
    pub fn overlay(&mut self, newer: &Headers) {
        for (name, value) in newer.iter() {
            self.0.insert(name.to_string(), value.to_string());
        }
    }

    /// Merge the headers of a 304 onto the stored headers.
    pub(crate) fn merged_with_not_modified(&self, not_modified: &Headers) -> Headers {
        let mut merged = self.clone();
        for (name, value) in not_modified.iter() {
            if NOT_MODIFIED_EXCLUDED.contains(&name) {
                continue;
            }
            merged.0.insert(name.to_string(), value.to_string());
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// The incoming request a lookup is answered for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRequest {
    pub method: String,
    pub headers: Headers,
}

impl CacheRequest {
    pub fn get() -> Self {
        Self {
            method: "GET".to_string(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Default for CacheRequest {
    fn default() -> Self {
        Self::get()
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Headers,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_modified() -> Self {
        Self::new(NOT_MODIFIED)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == NOT_MODIFIED
    }

    /// Value of the provenance marker, if the cache attached one.
    pub fn cache_status(&self) -> Option<&str> {
        self.headers.get(CACHE_STATUS_HEADER)
    }

    /// Apply a 304 to this stored response: the 304's headers win, the
    /// stored status and body are kept.
    pub(crate) fn merge_not_modified(&self, not_modified: &CachedResponse) -> CachedResponse {
        CachedResponse {
            status: self.status,
            headers: self.headers.merged_with_not_modified(&not_modified.headers),
            body: self.body.clone(),
        }
    }

    pub(crate) fn marked(mut self, status: CacheStatus) -> CachedResponse {
        self.headers.insert(CACHE_STATUS_HEADER, status.as_str());
        self
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the hot store without revalidation.
    Hit,
    /// Fetched from the origin and stored.
    Miss,
    /// Served through the cold store.
    Cold,
    /// Not stored.
    NoCache,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Cold => "cold",
            CacheStatus::NoCache => "no-cache",
        }
    }
}

mod body_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Cache-Control", "public");

        assert_eq!(headers.get("cache-control"), Some("public"));
        assert_eq!(headers.get("CACHE-CONTROL"), Some("public"));
        assert!(headers.contains("Cache-control"));
        assert_eq!(headers.remove("CACHE-control").as_deref(), Some("public"));
        assert!(headers.is_empty());
    }

    #[test]
    fn not_modified_overlays_headers_and_keeps_body() {
        let stored = CachedResponse::ok()
            .with_header("etag", "\"v1\"")
            .with_header("content-type", "text/plain")
            .with_header("content-length", "5")
            .with_body("hello");
        let not_modified = CachedResponse::not_modified()
            .with_header("etag", "\"v1\"")
            .with_header("cache-control", "max-age=60")
            .with_header("content-length", "0");

        let merged = stored.merge_not_modified(&not_modified);

        assert_eq!(merged.status, 200);
        assert_eq!(merged.body, Bytes::from("hello"));
        assert_eq!(merged.headers.get("content-type"), Some("text/plain"));
        assert_eq!(merged.headers.get("cache-control"), Some("max-age=60"));
        assert_eq!(merged.headers.get("content-length"), Some("5"));
    }

    #[test]
    fn marker_is_applied_to_the_copy_only() {
        let stored = CachedResponse::ok().with_body("x");
        let served = stored.clone().marked(CacheStatus::Hit);

        assert_eq!(served.cache_status(), Some("hit"));
        assert_eq!(stored.cache_status(), None);
    }

    #[test]
    fn body_survives_json_encoding() {
        let response = CachedResponse::ok()
            .with_header("content-type", "application/octet-stream")
            .with_body(vec![0u8, 159, 146, 150]);

        let encoded = serde_json::to_string(&response).expect("serialize response");
        let decoded: CachedResponse = serde_json::from_str(&encoded).expect("deserialize response");

        assert_eq!(decoded, response);
    }
}
