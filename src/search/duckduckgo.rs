use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::provider::{clean_query, has_web_url, ProviderError, SearchProvider, SearchResult};

const API_BASE: &str = "https://api.duckduckgo.com/";

pub const PROVIDER_NAME: &str = "duckduckgo";

#[derive(Debug, Deserialize)]
struct DdgResponse {
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<DdgTopic>,
}

/// A related topic is either a direct hit (`Text` + `FirstURL`) or a named
/// group carrying nested `Topics`.
#[derive(Debug, Deserialize)]
struct DdgTopic {
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
    #[serde(rename = "Topics", default)]
    topics: Vec<DdgTopic>,
}

/// DuckDuckGo Instant Answer API, the keyless second tier.
pub struct DuckDuckGo {
    http: Client,
    base_url: String,
}

impl DuckDuckGo {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }
}

fn collect_topics(topics: &[DdgTopic], max_results: usize, results: &mut Vec<SearchResult>) {
    for topic in topics {
        if results.len() >= max_results {
            return;
        }
        if let (Some(text), Some(url)) = (&topic.text, &topic.first_url) {
            if has_web_url(url) && !text.is_empty() {
                results.push(SearchResult {
                    title: text.clone(),
                    url: url.clone(),
                    snippet: text.clone(),
                    provider: PROVIDER_NAME,
                });
            }
        }
        collect_topics(&topic.topics, max_results, results);
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGo {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let query = clean_query(query);
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
            ])
            .header("User-Agent", crate::USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: DdgResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let mut results = Vec::new();
        collect_topics(&body.related_topics, max_results, &mut results);
        debug!(count = results.len(), %query, "duckduckgo search complete");
        Ok(results)
    }
}
