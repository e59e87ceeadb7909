//! News feed fetch (§6 `news?s={ticker}&limit=N`). A thin, throwaway pass-through: the core
//! only contracts with collaborators (summarizers, UI) via stock handles and `S`/`F` (§9
//! "Throwaway OpenAI/news/LCF integrations are collaborators, not part of the core").

use std::time::Duration;

use serde::Deserialize;

use crate::client::{CacheMode, HttpClient};
use crate::error::CoreError;

/// One article returned by the `news` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NewsItem {
    pub date: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: String,
}

/// Fetches up to `limit` recent articles mentioning `ticker`.
pub async fn fetch(http: &HttpClient, ticker: &str, limit: u32) -> Result<Vec<NewsItem>, CoreError> {
    let limit_str = limit.to_string();
    http.get_json(
        "news",
        &[("s", ticker), ("limit", &limit_str)],
        CacheMode::Use,
        Duration::from_secs(15 * 60),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_and_parses_news_items() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/news")
                .query_param("s", "AAPL.US")
                .query_param("limit", "5");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"[{"date":"2024-01-02","title":"Headline"}]"#);
        });

        let http = HttpClient::builder()
            .backend(url::Url::parse(&server.base_url()).unwrap())
            .disable_disk_cache()
            .build()
            .unwrap();

        let items = fetch(&http, "AAPL.US", 5).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Headline");
    }
}
