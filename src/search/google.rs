use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::provider::{clean_query, has_web_url, ProviderError, SearchProvider, SearchResult};

const API_BASE: &str = "https://www.googleapis.com/customsearch/v1";
/// CSE caps one page at 10 items; deeper targets paginate via `start`.
const PAGE_SIZE: usize = 10;

pub const PROVIDER_NAME: &str = "google-cse";

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

/// Google Custom Search, the first tier. Requires `GOOGLE_API_KEY` and
/// `GOOGLE_CSE_ID`; without them every search reports an empty result list.
pub struct GoogleCse {
    http: Client,
    credentials: Option<(String, String)>,
    base_url: String,
}

impl GoogleCse {
    pub fn from_env(http: Client) -> Self {
        let key = env::var("GOOGLE_API_KEY").ok().filter(|k| !k.trim().is_empty());
        let cse_id = env::var("GOOGLE_CSE_ID").ok().filter(|c| !c.trim().is_empty());
        Self {
            http,
            credentials: key.zip(cse_id),
            base_url: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            credentials: Some(("test-key".into(), "test-cx".into())),
            base_url: base_url.to_string(),
        }
    }

    async fn fetch_page(
        &self,
        key: &str,
        cse_id: &str,
        query: &str,
        num: usize,
        start: usize,
    ) -> Result<Vec<CseItem>, ProviderError> {
        let num = num.to_string();
        let start = start.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("key", key),
                ("cx", cse_id),
                ("q", query),
                ("num", num.as_str()),
                ("start", start.as_str()),
            ])
            .header("User-Agent", crate::USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: CseResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(body.items)
    }
}

#[async_trait]
impl SearchProvider for GoogleCse {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let (key, cse_id) = match &self.credentials {
            Some(creds) => creds,
            None => {
                warn!("Google CSE credentials not set, skipping tier");
                return Ok(Vec::new());
            }
        };

        let query = clean_query(query);
        let mut results = Vec::new();
        let mut start = 1;

        while results.len() < max_results {
            let num = PAGE_SIZE.min(max_results - results.len());
            let items = self.fetch_page(key, cse_id, &query, num, start).await?;
            let page_len = items.len();

            for item in items {
                let link = item.link.unwrap_or_default();
                if !has_web_url(&link) {
                    continue;
                }
                results.push(SearchResult {
                    title: item.title.unwrap_or_else(|| "Untitled".to_string()),
                    url: link,
                    snippet: item.snippet.unwrap_or_default(),
                    provider: PROVIDER_NAME,
                });
            }

            if page_len == 0 || results.len() >= max_results {
                break;
            }
            start += page_len;
        }

        results.truncate(max_results);
        debug!(count = results.len(), %query, "google cse search complete");
        Ok(results)
    }
}
