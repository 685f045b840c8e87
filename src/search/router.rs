use std::collections::HashSet;

use tracing::{debug, warn};

use super::provider::{has_web_url, SearchProvider, SearchResult};
use crate::config::ConfigError;

/// Outcome of a routed search: the results actually used and the tier that
/// produced them (`None` when every tier came back empty).
#[derive(Debug)]
pub struct RoutedSearch {
    pub results: Vec<SearchResult>,
    pub provider: Option<&'static str>,
}

/// Drives provider-tier fallback. Tiers are consulted in order; the first one
/// meeting the target count wins and lower tiers are never called. Exhausting
/// all tiers yields the best partial set seen — an empty set at worst, never
/// an error.
pub struct SearchRouter {
    tiers: Vec<Box<dyn SearchProvider>>,
}

impl SearchRouter {
    pub fn new(tiers: Vec<Box<dyn SearchProvider>>) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(Self { tiers })
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub async fn search(&self, query: &str, target_count: usize) -> RoutedSearch {
        let mut best: Vec<SearchResult> = Vec::new();
        let mut best_provider = None;

        for tier in &self.tiers {
            match tier.search(query, target_count).await {
                Ok(results) => {
                    let usable = filter_usable(results);
                    if usable.len() >= target_count {
                        debug!(provider = tier.name(), count = usable.len(), %query, "tier met target");
                        return RoutedSearch {
                            results: usable,
                            provider: Some(tier.name()),
                        };
                    }
                    warn!(
                        provider = tier.name(),
                        count = usable.len(),
                        target_count,
                        "tier fell short, trying next"
                    );
                    if usable.len() > best.len() {
                        best_provider = Some(tier.name());
                        best = usable;
                    }
                }
                Err(e) => {
                    warn!(provider = tier.name(), error = %e, "tier failed, trying next");
                }
            }
        }

        if best.is_empty() {
            best_provider = None;
        }
        RoutedSearch {
            results: best,
            provider: best_provider,
        }
    }
}

/// Drop malformed URLs and per-query duplicates, preserving order.
fn filter_usable(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| has_web_url(&r.url) && seen.insert(r.url.clone()))
        .collect()
}
