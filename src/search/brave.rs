use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::provider::{clean_query, has_web_url, ProviderError, SearchProvider, SearchResult};

const API_BASE: &str = "https://api.search.brave.com/res/v1/web/search";

pub const PROVIDER_NAME: &str = "brave";

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: BraveWeb,
}

#[derive(Debug, Deserialize, Default)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
}

/// Brave web search, the last tier. A `BRAVE_API_KEY` is attached when
/// present; without one the request is still attempted and a rejection
/// surfaces as a recoverable status error for the router to log.
pub struct Brave {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

impl Brave {
    pub fn from_env(http: Client) -> Self {
        Self {
            http,
            api_key: env::var("BRAVE_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: None,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for Brave {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let query = clean_query(query);
        let count = max_results.to_string();
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&[("q", query.as_str()), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("User-Agent", crate::USER_AGENT);
        if let Some(key) = &self.api_key {
            request = request.header("X-Subscription-Token", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: BraveResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let mut results = Vec::new();
        for r in body.web.results {
            if results.len() >= max_results {
                break;
            }
            let url = r.url.unwrap_or_default();
            if !has_web_url(&url) {
                continue;
            }
            let title = r.title.unwrap_or_else(|| "Untitled".to_string());
            results.push(SearchResult {
                snippet: r.description.unwrap_or_else(|| title.clone()),
                title,
                url,
                provider: PROVIDER_NAME,
            });
        }
        debug!(count = results.len(), %query, "brave search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_parses_web_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {"results": [
                    {"title": "A", "url": "https://a.com", "description": "first"},
                    {"title": "B", "url": "https://b.com"},
                ]}
            })))
            .mount(&server)
            .await;

        let provider = Brave::with_base_url(Client::new(), &server.uri());
        let results = provider.search("rust", 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "first");
        // Snippet falls back to the title when no description is present.
        assert_eq!(results[1].snippet, "B");
    }

    #[tokio::test]
    async fn search_rejection_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = Brave::with_base_url(Client::new(), &server.uri());
        let result = provider.search("rust", 5).await;
        assert!(matches!(result, Err(ProviderError::Status(401))));
    }

    #[tokio::test]
    async fn search_filters_invalid_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {"results": [
                    {"title": "NoUrl"},
                    {"title": "Good", "url": "https://good.com", "description": "ok"},
                ]}
            })))
            .mount(&server)
            .await;

        let provider = Brave::with_base_url(Client::new(), &server.uri());
        let results = provider.search("rust", 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
