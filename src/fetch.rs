//! Origin fetcher for the `herdcache` binary.

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, Url};

use crate::cache::{CacheRequest, CachedResponse, Headers};
use crate::config::OriginSettings;
use crate::error::{AppError, FetchError};

type FetchFuture = BoxFuture<'static, Result<CachedResponse, FetchError>>;

#[derive(Clone, Debug)]
pub struct OriginClient {
    client: Client,
}

impl OriginClient {
    pub fn new(settings: &OriginSettings) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Callback for `ResponseCache::get_cached` that GETs `url`, adding the
    /// request's headers and whatever validators the cache supplies.
    pub fn fetcher(
        &self,
        url: Url,
        request: &CacheRequest,
    ) -> impl FnOnce(Headers) -> FetchFuture + Send + 'static {
        let client = self.client.clone();
        let mut headers = request.headers.clone();
        move |conditional| {
            headers.overlay(&conditional);
            fetch(client, url, headers).boxed()
        }
    }
}

async fn fetch(client: Client, url: Url, headers: Headers) -> Result<CachedResponse, FetchError> {
    let mut builder = client.get(url);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();

    let mut collected = Headers::new();
    for (name, value) in response.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let merged = match collected.get(name.as_str()) {
            Some(previous) => format!("{previous}, {value}"),
            None => value.to_string(),
        };
        collected.insert(name.as_str(), merged);
    }

    let body = response.bytes().await?;
    Ok(CachedResponse {
        status,
        headers: collected,
        body,
    })
}

/// Cache key for `url`: the parsed URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}
