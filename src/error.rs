use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::config::LoadError;

/// Error type returned by fetch callbacks.
pub type FetchError = Box<dyn StdError + Send + Sync>;

/// Failures visible to callers of `ResponseCache::get_cached`.
///
/// Cloneable so that one failure can be handed to every coalesced waiter and
/// kept in the hot store as a negative entry.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("bad cache arguments: {0}")]
    BadRequest(String),
    #[error("fetch failed: {0}")]
    Fetch(#[source] Arc<dyn StdError + Send + Sync>),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("in-flight fetch for `{key}` was abandoned")]
    Abandoned { key: String },
}

impl CacheError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn fetch(error: FetchError) -> Self {
        Self::Fetch(Arc::from(error))
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn abandoned(key: impl Into<String>) -> Self {
        Self::Abandoned { key: key.into() }
    }

    /// Only origin failures are negatively cached.
    pub fn is_negative_cacheable(&self) -> bool {
        matches!(self, CacheError::Fetch(_))
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::BadRequest(_) => "bad_request",
            CacheError::Fetch(_) => "fetch",
            CacheError::ProtocolViolation(_) => "protocol_violation",
            CacheError::MalformedResponse(_) => "malformed_response",
            CacheError::Abandoned { .. } => "abandoned",
        }
    }
}

/// Cold-store failures. Logged and swallowed by the cache, never surfaced to
/// `get_cached` callers.
#[derive(Debug, Error)]
pub enum ColdStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cold store backend error: {message}")]
    Backend { message: String },
}

impl ColdStoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Top-level error for the `herdcache` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    ColdStore(#[from] ColdStoreError),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_keep_their_source() {
        let error = CacheError::fetch("origin unreachable".into());

        assert_eq!(error.to_string(), "fetch failed: origin unreachable");
        let source = error.source().expect("fetch error has a source");
        assert_eq!(source.to_string(), "origin unreachable");
        assert!(error.is_negative_cacheable());
    }

    #[test]
    fn protocol_errors_are_not_negative_cached() {
        assert!(!CacheError::protocol_violation("304 on miss").is_negative_cacheable());
        assert!(!CacheError::malformed("status 0").is_negative_cacheable());
        assert!(!CacheError::bad_request("empty key").is_negative_cacheable());
    }
}
