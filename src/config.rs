use std::time::Duration;

/// Named preset trading thoroughness for latency. Each mode fixes the
/// concurrency bounds, the per-query result target, and the per-operation
/// timeout used by the retrieval pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DepthMode {
    Fast,
    #[default]
    Balanced,
    Deep,
}

impl DepthMode {
    pub fn preset(self) -> RunConfig {
        match self {
            DepthMode::Fast => RunConfig {
                query_concurrency: 4,
                fetch_concurrency: 8,
                per_query_results: 2,
                timeout: Duration::from_secs(20),
                summarize: true,
            },
            DepthMode::Balanced => RunConfig {
                query_concurrency: 3,
                fetch_concurrency: 5,
                per_query_results: 3,
                timeout: Duration::from_secs(45),
                summarize: true,
            },
            DepthMode::Deep => RunConfig {
                query_concurrency: 2,
                fetch_concurrency: 3,
                per_query_results: 5,
                timeout: Duration::from_secs(60),
                summarize: true,
            },
        }
    }
}

/// Resolved pipeline configuration. `timeout` is the budget for one bounded
/// operation: a single provider search call or a single extraction strategy.
/// Composite operations (a full router pass, a full extraction cascade) derive
/// their budgets from it.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub query_concurrency: usize,
    pub fetch_concurrency: usize,
    pub per_query_results: usize,
    pub timeout: Duration,
    /// Ask the generation capability for a per-record summary during the
    /// fetch pass. Summary failures degrade to `None`, never the record.
    pub summarize: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no search providers configured")]
    NoProviders,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_documented_bounds() {
        let fast = DepthMode::Fast.preset();
        assert_eq!(fast.query_concurrency, 4);
        assert_eq!(fast.fetch_concurrency, 8);
        assert_eq!(fast.per_query_results, 2);
        assert_eq!(fast.timeout, Duration::from_secs(20));

        let balanced = DepthMode::Balanced.preset();
        assert_eq!(balanced.query_concurrency, 3);
        assert_eq!(balanced.fetch_concurrency, 5);
        assert_eq!(balanced.per_query_results, 3);
        assert_eq!(balanced.timeout, Duration::from_secs(45));

        let deep = DepthMode::Deep.preset();
        assert_eq!(deep.query_concurrency, 2);
        assert_eq!(deep.fetch_concurrency, 3);
        assert_eq!(deep.per_query_results, 5);
        assert_eq!(deep.timeout, Duration::from_secs(60));
    }

    #[test]
    fn default_mode_is_balanced() {
        assert_eq!(DepthMode::default(), DepthMode::Balanced);
    }
}
