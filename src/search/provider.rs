use async_trait::async_trait;

/// One candidate document returned by a provider. Uniqueness by `url` holds
/// within a single query only; the same URL may recur across queries.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub provider: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// One ranked tier in the search fallback chain.
///
/// Implementations paginate internally where the backend supports it, filter
/// malformed results before returning, and report missing credentials as an
/// empty result list rather than an error.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Strip markdown emphasis and doubled quotes that leak in from LLM-planned
/// queries and confuse search backends.
pub(super) fn clean_query(query: &str) -> String {
    query
        .replace("**", "")
        .replace('*', "")
        .replace("\"\"", "\"")
        .trim()
        .to_string()
}

/// Only http(s) URLs count as usable candidates.
pub(super) fn has_web_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
