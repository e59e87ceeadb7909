//! HTTP/JSON fetch layer (§2 "HTTP/JSON fetch layer", §6 "HTTP endpoints consumed").
//!
//! Issues GET requests to the market-data provider, parses JSON, and caches responses on
//! disk keyed by URL + TTL. Adapted from the teacher's `core::client` module: the Yahoo
//! cookie/crumb dance is replaced by the simpler `api_token` query-parameter auth this
//! provider's endpoints use (§6).

mod cache;
pub mod constants;
pub mod retry;

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::CoreError;
use cache::ResponseCache;
pub use retry::{Backoff, CacheMode, RetryConfig};

/// Issues GET requests against the configured backend, with retries and a response cache.
#[derive(Debug)]
pub struct HttpClient {
    http: Client,
    backend: Url,
    api_token: String,
    cache: ResponseCache,
    retry: RetryConfig,
}

impl HttpClient {
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Builds the full URL for `path` (e.g. `"eod/AAPL.US"`) with the provider's required
    /// `api_token` and `fmt=json` query parameters plus any extra `params`.
    pub fn build_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, CoreError> {
        let mut url = self.backend.join(path)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("api_token", &self.api_token);
            q.append_pair("fmt", "json");
            for (k, v) in params {
                q.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Fetches `path` as JSON, honouring the response cache (`cache_mode`, `ttl`) and the
    /// retry policy. On a non-2xx status or a JSON parse failure, returns
    /// [`CoreError::FetchError`] — callers are expected to treat this as "level still
    /// unresolved" rather than propagate it further (§4.6).
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        cache_mode: CacheMode,
        ttl: Duration,
    ) -> Result<T, CoreError> {
        let url = self.build_url(path, params)?;
        let key = url.as_str();

        if cache_mode == CacheMode::Use
            && let Some(body) = self.cache.get(key, ttl).await
        {
            return serde_json::from_str(&body).map_err(CoreError::from);
        }

        let body = self.fetch_text_with_retry(url.clone()).await?;

        if cache_mode != CacheMode::Bypass {
            self.cache.put(key, &body, ttl).await;
        }

        serde_json::from_str(&body).map_err(CoreError::from)
    }

    async fn fetch_text_with_retry(&self, url: Url) -> Result<String, CoreError> {
        let mut attempt = 0u32;
        loop {
            let result = self.http.get(url.clone()).send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.map_err(CoreError::from);
                    }
                    if attempt < self.retry.max_retries
                        && self.retry.should_retry_status(status.as_u16())
                    {
                        tracing::warn!(%url, %status, attempt, "retrying after bad status");
                        tokio::time::sleep(self.retry.backoff.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(CoreError::FetchError(format!(
                        "unexpected status {status} for {url}"
                    )));
                }
                Err(e) => {
                    if attempt < self.retry.max_retries && self.retry.should_retry_error(&e) {
                        tracing::warn!(%url, error = %e, attempt, "retrying after transport error");
                        tokio::time::sleep(self.retry.backoff.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(CoreError::from(e));
                }
            }
        }
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    backend: Option<Url>,
    api_token: Option<String>,
    user_agent: Option<String>,
    timeout: Option<Duration>,
    cache_dir: Option<PathBuf>,
    retry: RetryConfig,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            api_token: None,
            user_agent: None,
            timeout: None,
            cache_dir: Some(std::env::temp_dir().join("stockdb-cache")),
            retry: RetryConfig::default(),
        }
    }
}

impl HttpClientBuilder {
    #[must_use]
    pub fn backend(mut self, url: Url) -> Self {
        self.backend = Some(url);
        self
    }

    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }

    /// Disables the on-disk response cache (memory-only caching still applies).
    #[must_use]
    pub fn disable_disk_cache(mut self) -> Self {
        self.cache_dir = None;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, cfg: RetryConfig) -> Self {
        self.retry = cfg;
        self
    }

    pub fn build(self) -> Result<HttpClient, CoreError> {
        let backend = self
            .backend
            .unwrap_or(Url::parse(constants::DEFAULT_BACKEND)?);

        let mut builder = Client::builder().user_agent(
            self.user_agent
                .clone()
                .unwrap_or_else(|| constants::USER_AGENT.to_string()),
        );
        if let Some(t) = self.timeout {
            builder = builder.timeout(t);
        }
        let http = builder.build().map_err(CoreError::from)?;

        Ok(HttpClient {
            http,
            backend,
            api_token: self.api_token.unwrap_or_else(|| "demo".to_string()),
            cache: ResponseCache::new(self.cache_dir),
            retry: self.retry,
        })
    }
}

/// Default TTL used for most fetch levels (15 minutes, mirroring `eod_fetch`'s
/// `invalid_cache_query_after_seconds` default in the original).
#[must_use]
pub fn default_ttl() -> Duration {
    Duration::from_secs(constants::DEFAULT_CACHE_TTL_SECS)
}

/// TTL used specifically for `FUNDAMENTALS` (§4.1: "cache 3 days").
#[must_use]
pub fn fundamentals_ttl() -> Duration {
    Duration::from_secs(constants::FUNDAMENTALS_CACHE_TTL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_includes_api_token_and_format() {
        let client = HttpClient::builder()
            .api_token("XYZ")
            .disable_disk_cache()
            .build()
            .unwrap();
        let url = client.build_url("eod/AAPL.US", &[("order", "d")]).unwrap();
        assert!(url.as_str().contains("api_token=XYZ"));
        assert!(url.as_str().contains("fmt=json"));
        assert!(url.as_str().contains("order=d"));
        assert!(url.as_str().contains("eod/AAPL.US"));
    }

    #[tokio::test]
    async fn get_json_parses_mocked_response() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/eod/AAPL.US");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"ok":true}"#);
        });

        let client = HttpClient::builder()
            .backend(Url::parse(&server.base_url()).unwrap())
            .disable_disk_cache()
            .build()
            .unwrap();

        #[derive(serde::Deserialize)]
        struct Resp {
            ok: bool,
        }

        let resp: Resp = client
            .get_json("eod/AAPL.US", &[], CacheMode::Bypass, default_ttl())
            .await
            .unwrap();
        assert!(resp.ok);
        mock.assert();
    }

    #[tokio::test]
    async fn get_json_retries_on_server_error_then_succeeds() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/eod/AAPL.US")
                .query_param_exists("api_token");
            then.status(503);
        });

        let client = HttpClient::builder()
            .backend(Url::parse(&server.base_url()).unwrap())
            .disable_disk_cache()
            .retry_policy(RetryConfig {
                max_retries: 1,
                backoff: Backoff::Fixed(Duration::from_millis(1)),
                ..RetryConfig::default()
            })
            .build()
            .unwrap();

        #[derive(serde::Deserialize)]
        struct Resp {}

        let err = client
            .get_json::<Resp>("eod/AAPL.US", &[], CacheMode::Bypass, default_ttl())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FetchError(_)));
    }
}
