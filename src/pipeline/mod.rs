//! The retrieval pipeline: a bounded query pass over the search router, a
//! relevance filter, then a bounded fetch pass converting every surviving
//! candidate into an immutable evidence record. Partial failure everywhere is
//! the expected case; the pipeline always completes with a result.

pub mod batch;
pub mod progress;
pub mod relevance;

use std::convert::Infallible;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::extract::{ContentExtractor, Strategy};
use crate::llm::{is_error_marker, GenerationClient};
use crate::search::{SearchResult, SearchRouter};
use batch::{run_in_batches, BatchError};
use progress::ProgressSink;
use relevance::RelevancePolicy;

/// An extraction cascade is at most: three strategies plus the link hop.
const CASCADE_STEPS: u32 = 4;
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(90);

/// Shared origin context of a query set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchContext {
    pub goal: String,
    pub audience: String,
    pub tone: String,
}

/// One search query plus the context it was planned under. Immutable.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub context: ResearchContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStatus {
    Ok,
    Degraded,
    Failed,
}

/// One retrieved-and-extracted document. Created once per pipeline run and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub extracted_text: Option<String>,
    pub strategy: Strategy,
    pub summary: Option<String>,
    pub status: EvidenceStatus,
}

impl EvidenceRecord {
    /// The text a downstream consumer (synthesis, attribution) should read
    /// for this record.
    pub fn digest_text(&self) -> &str {
        self.summary
            .as_deref()
            .or(self.extracted_text.as_deref())
            .unwrap_or(&self.snippet)
    }
}

/// Aggregate counters, updated only between batches on the orchestrating
/// task and frozen once the run returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrievalStats {
    pub queries_total: usize,
    pub queries_successful: usize,
    pub results_total: usize,
}

#[derive(Debug)]
pub struct RetrievalOutcome {
    pub evidence: Vec<EvidenceRecord>,
    pub stats: RetrievalStats,
}

pub struct RetrievalPipeline<'a> {
    pub router: &'a SearchRouter,
    pub extractor: &'a ContentExtractor,
    pub relevance: &'a dyn RelevancePolicy,
    /// Generation capability for per-record summaries; `None` (or
    /// `config.summarize = false`) disables them.
    pub summarizer: Option<&'a dyn GenerationClient>,
    pub config: RunConfig,
}

impl RetrievalPipeline<'_> {
    pub async fn run(&self, queries: &[Query], progress: &ProgressSink) -> RetrievalOutcome {
        let context = queries
            .first()
            .map(|q| q.context.clone())
            .unwrap_or_default();

        progress.milestone(
            "Searching the web...",
            "Web Search",
            Some(5),
            Some(format!("Running {} queries", queries.len())),
        );

        // One router pass may consult every tier, each with its own budget.
        let search_budget = self
            .config
            .timeout
            .saturating_mul(self.router.tier_count() as u32);
        let routed = run_in_batches(
            queries.to_vec(),
            self.config.query_concurrency,
            search_budget,
            |query| async move {
                Ok::<_, Infallible>(
                    self.router
                        .search(&query.text, self.config.per_query_results)
                        .await,
                )
            },
            |completed, total| {
                progress.milestone(
                    "Searching the web...",
                    "Web Search",
                    None,
                    Some(format!("Searched {completed}/{total} queries")),
                );
            },
        )
        .await;

        let mut stats = RetrievalStats {
            queries_total: queries.len(),
            ..Default::default()
        };
        let mut candidates: Vec<SearchResult> = Vec::new();
        for (index, outcome) in routed.into_iter().enumerate() {
            match outcome {
                Ok(found) => {
                    if !found.results.is_empty() {
                        stats.queries_successful += 1;
                    }
                    stats.results_total += found.results.len();
                    debug!(
                        query_index = index,
                        provider = ?found.provider,
                        count = found.results.len(),
                        "query resolved"
                    );
                    candidates.extend(found.results);
                }
                Err(e) => {
                    warn!(query_index = index, error = %e, "query pass item failed");
                }
            }
        }

        progress.milestone(
            "Web search complete.",
            "Web Search",
            Some(25),
            Some(format!("Found {} results", stats.results_total)),
        );

        let candidates = self.filter_relevant(candidates, &context.goal).await;

        // The fetch pass converts every candidate into a record; the
        // originals are kept so a timed-out item still yields its minimal
        // title+snippet record.
        let inputs = candidates.clone();
        let fetch_budget = self.fetch_budget();
        let fetched = run_in_batches(
            inputs,
            self.config.fetch_concurrency,
            fetch_budget,
            |result| self.evidence_for(result, &context),
            |completed, total| {
                progress.milestone(
                    "Fetching and extracting sources...",
                    "Fetching",
                    None,
                    Some(format!("Processed {completed}/{total} sources")),
                );
            },
        )
        .await;

        let mut evidence = Vec::with_capacity(fetched.len());
        for (index, outcome) in fetched.into_iter().enumerate() {
            match outcome {
                Ok(record) => evidence.push(record),
                Err(BatchError::Timeout(budget)) => {
                    let source = &candidates[index];
                    warn!(url = %source.url, ?budget, "fetch timed out, keeping minimal record");
                    evidence.push(minimal_record(source));
                }
                Err(BatchError::Failed(never)) => match never {},
            }
        }

        progress.milestone(
            "Source extraction complete.",
            "Fetching",
            Some(60),
            Some(format!("Collected {} evidence records", evidence.len())),
        );

        RetrievalOutcome { evidence, stats }
    }

    fn fetch_budget(&self) -> Duration {
        let cascade = self.config.timeout.saturating_mul(CASCADE_STEPS);
        if self.config.summarize && self.summarizer.is_some() {
            cascade + SUMMARY_TIMEOUT
        } else {
            cascade
        }
    }

    async fn filter_relevant(
        &self,
        candidates: Vec<SearchResult>,
        goal: &str,
    ) -> Vec<SearchResult> {
        if goal.is_empty() {
            return candidates;
        }
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let preview = format!("{} {}", candidate.title, candidate.snippet);
            if self.relevance.is_relevant(&preview, goal).await {
                kept.push(candidate);
            } else {
                debug!(url = %candidate.url, "dropped irrelevant result");
            }
        }
        kept
    }

    async fn evidence_for(
        &self,
        result: SearchResult,
        context: &ResearchContext,
    ) -> Result<EvidenceRecord, Infallible> {
        let extraction = self.extractor.extract(&result.url, &result.snippet).await;

        let (status, extracted_text) = match extraction.strategy {
            Strategy::Exhausted => {
                if result.title.trim().is_empty() && result.snippet.trim().is_empty() {
                    (EvidenceStatus::Failed, None)
                } else {
                    (EvidenceStatus::Degraded, None)
                }
            }
            Strategy::Snippet => (EvidenceStatus::Degraded, None),
            _ if extraction.adequate => (EvidenceStatus::Ok, Some(extraction.text)),
            _ => (EvidenceStatus::Degraded, Some(extraction.text)),
        };

        let summary = if status == EvidenceStatus::Failed {
            None
        } else {
            let basis = extracted_text.as_deref().unwrap_or(&result.snippet);
            self.summarize(basis, context).await
        };

        Ok(EvidenceRecord {
            title: result.title,
            url: result.url,
            snippet: result.snippet,
            extracted_text,
            strategy: extraction.strategy,
            summary,
            status,
        })
    }

    async fn summarize(&self, text: &str, context: &ResearchContext) -> Option<String> {
        if !self.config.summarize {
            return None;
        }
        let llm = self.summarizer?;
        if text.trim().is_empty() {
            return None;
        }

        let mut preamble = String::new();
        if !context.audience.is_empty() {
            preamble.push_str(&format!("Intended audience: {}. ", context.audience));
        }
        if !context.tone.is_empty() {
            preamble.push_str(&format!("Preferred tone/style: {}. ", context.tone));
        }
        let prompt = format!(
            "{preamble}\nWrite a detailed, multi-paragraph summary of the following web page \
             content. Make it suitable for a research report. Include all key findings, \
             context, and implications.\n\nContent:\n{text}"
        );

        match tokio::time::timeout(SUMMARY_TIMEOUT, llm.generate(&prompt)).await {
            Ok(Ok(summary)) => {
                let summary = summary.trim();
                if summary.is_empty() || is_error_marker(summary) {
                    warn!("summary response unusable, keeping record without one");
                    None
                } else {
                    Some(summary.to_string())
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "summary generation failed");
                None
            }
            Err(_) => {
                warn!("summary generation timed out");
                None
            }
        }
    }
}

fn minimal_record(source: &SearchResult) -> EvidenceRecord {
    let failed = source.title.trim().is_empty() && source.snippet.trim().is_empty();
    EvidenceRecord {
        title: source.title.clone(),
        url: source.url.clone(),
        snippet: source.snippet.clone(),
        extracted_text: None,
        strategy: Strategy::Exhausted,
        summary: None,
        status: if failed {
            EvidenceStatus::Failed
        } else {
            EvidenceStatus::Degraded
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepthMode;
    use crate::extract::{ExtractError, ExtractStrategy};
    use crate::llm::LlmError;
    use crate::search::provider::ProviderError;
    use crate::search::SearchProvider;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedProvider {
        name: &'static str,
        responses: Mutex<VecDeque<Result<Vec<SearchResult>, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(
            name: &'static str,
            responses: Vec<Result<Vec<SearchResult>, ProviderError>>,
        ) -> Self {
            Self {
                name,
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<SearchResult>, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Strategy returning adequate text for every URL, with a live-call
    /// counter for concurrency assertions.
    struct CountingStrategy {
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl CountingStrategy {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let peak = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    live: Arc::new(AtomicUsize::new(0)),
                    peak: Arc::clone(&peak),
                },
                peak,
            )
        }
    }

    #[async_trait]
    impl ExtractStrategy for CountingStrategy {
        fn kind(&self) -> Strategy {
            Strategy::Stripped
        }

        async fn extract(&self, _url: &str) -> Result<String, ExtractError> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.live.fetch_sub(1, Ordering::SeqCst);
            Ok("x".repeat(600))
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl ExtractStrategy for FailingStrategy {
        fn kind(&self) -> Strategy {
            Strategy::Stripped
        }

        async fn extract(&self, _url: &str) -> Result<String, ExtractError> {
            Err(ExtractError::Empty)
        }
    }

    struct AllowAll;

    #[async_trait]
    impl RelevancePolicy for AllowAll {
        async fn is_relevant(&self, _text: &str, _goal: &str) -> bool {
            true
        }
    }

    struct FixedSummarizer {
        response: String,
    }

    #[async_trait]
    impl GenerationClient for FixedSummarizer {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.response.clone())
        }
    }

    fn result(url: &str, title: &str, snippet: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
            provider: "tier1",
        }
    }

    fn queries(texts: &[&str]) -> Vec<Query> {
        let context = ResearchContext {
            goal: "the research goal".into(),
            ..Default::default()
        };
        texts
            .iter()
            .map(|t| Query {
                text: t.to_string(),
                context: context.clone(),
            })
            .collect()
    }

    fn config() -> RunConfig {
        let mut config = DepthMode::Fast.preset();
        config.summarize = false;
        config
    }

    #[tokio::test]
    async fn full_run_produces_evidence_and_stats() {
        let provider = ScriptedProvider::new(
            "tier1",
            vec![
                Ok(vec![
                    result("https://a.com", "A", "about a"),
                    result("https://b.com", "B", "about b"),
                ]),
                Ok(Vec::new()),
            ],
        );
        let router = SearchRouter::new(vec![Box::new(provider)]).unwrap();
        let (strategy, peak) = CountingStrategy::new();
        let extractor =
            ContentExtractor::new(vec![Box::new(strategy)], Duration::from_secs(1));

        let pipeline = RetrievalPipeline {
            router: &router,
            extractor: &extractor,
            relevance: &AllowAll,
            summarizer: None,
            config: config(),
        };

        let outcome = pipeline
            .run(&queries(&["first", "second"]), &ProgressSink::disabled())
            .await;

        assert_eq!(outcome.stats.queries_total, 2);
        assert_eq!(outcome.stats.queries_successful, 1);
        assert_eq!(outcome.stats.results_total, 2);
        assert_eq!(outcome.evidence.len(), 2);
        assert!(outcome
            .evidence
            .iter()
            .all(|r| r.status == EvidenceStatus::Ok));
        assert!(peak.load(Ordering::SeqCst) <= pipeline.config.fetch_concurrency);
    }

    #[tokio::test]
    async fn failed_extraction_with_snippet_degrades_instead_of_dropping() {
        let provider = ScriptedProvider::new(
            "tier1",
            vec![Ok(vec![result("https://a.com", "A title", "a snippet")])],
        );
        let router = SearchRouter::new(vec![Box::new(provider)]).unwrap();
        let extractor =
            ContentExtractor::new(vec![Box::new(FailingStrategy)], Duration::from_millis(50));

        let pipeline = RetrievalPipeline {
            router: &router,
            extractor: &extractor,
            relevance: &AllowAll,
            summarizer: None,
            config: config(),
        };

        let outcome = pipeline
            .run(&queries(&["q"]), &ProgressSink::disabled())
            .await;

        assert_eq!(outcome.evidence.len(), 1);
        let record = &outcome.evidence[0];
        assert_eq!(record.status, EvidenceStatus::Degraded);
        assert_eq!(record.strategy, Strategy::Snippet);
        assert_eq!(record.extracted_text, None);
        assert_eq!(record.snippet, "a snippet");
    }

    #[tokio::test]
    async fn empty_title_and_snippet_yields_failed_record_counted_in_stats() {
        let provider = ScriptedProvider::new(
            "tier1",
            vec![Ok(vec![result("https://a.com", "", "")])],
        );
        let router = SearchRouter::new(vec![Box::new(provider)]).unwrap();
        let extractor =
            ContentExtractor::new(vec![Box::new(FailingStrategy)], Duration::from_millis(50));

        let pipeline = RetrievalPipeline {
            router: &router,
            extractor: &extractor,
            relevance: &AllowAll,
            summarizer: None,
            config: config(),
        };

        let outcome = pipeline
            .run(&queries(&["q"]), &ProgressSink::disabled())
            .await;

        assert_eq!(outcome.stats.results_total, 1);
        assert_eq!(outcome.evidence.len(), 1);
        assert_eq!(outcome.evidence[0].status, EvidenceStatus::Failed);
        assert_eq!(outcome.evidence[0].summary, None);
    }

    #[tokio::test]
    async fn summaries_attach_to_usable_records() {
        let provider = ScriptedProvider::new(
            "tier1",
            vec![Ok(vec![result("https://a.com", "A", "about a")])],
        );
        let router = SearchRouter::new(vec![Box::new(provider)]).unwrap();
        let (strategy, _) = CountingStrategy::new();
        let extractor =
            ContentExtractor::new(vec![Box::new(strategy)], Duration::from_secs(1));
        let summarizer = FixedSummarizer {
            response: "A tidy summary.".into(),
        };

        let mut cfg = config();
        cfg.summarize = true;
        let pipeline = RetrievalPipeline {
            router: &router,
            extractor: &extractor,
            relevance: &AllowAll,
            summarizer: Some(&summarizer),
            config: cfg,
        };

        let outcome = pipeline
            .run(&queries(&["q"]), &ProgressSink::disabled())
            .await;

        assert_eq!(
            outcome.evidence[0].summary.as_deref(),
            Some("A tidy summary.")
        );
    }

    #[tokio::test]
    async fn error_marker_summary_is_discarded() {
        let provider = ScriptedProvider::new(
            "tier1",
            vec![Ok(vec![result("https://a.com", "A", "about a")])],
        );
        let router = SearchRouter::new(vec![Box::new(provider)]).unwrap();
        let (strategy, _) = CountingStrategy::new();
        let extractor =
            ContentExtractor::new(vec![Box::new(strategy)], Duration::from_secs(1));
        let summarizer = FixedSummarizer {
            response: "[Ollama error: model not loaded]".into(),
        };

        let mut cfg = config();
        cfg.summarize = true;
        let pipeline = RetrievalPipeline {
            router: &router,
            extractor: &extractor,
            relevance: &AllowAll,
            summarizer: Some(&summarizer),
            config: cfg,
        };

        let outcome = pipeline
            .run(&queries(&["q"]), &ProgressSink::disabled())
            .await;

        assert_eq!(outcome.evidence[0].summary, None);
        assert_eq!(outcome.evidence[0].status, EvidenceStatus::Ok);
    }

    #[tokio::test]
    async fn irrelevant_candidates_are_dropped_before_fetching() {
        struct RejectAll;

        #[async_trait]
        impl RelevancePolicy for RejectAll {
            async fn is_relevant(&self, _text: &str, _goal: &str) -> bool {
                false
            }
        }

        let provider = ScriptedProvider::new(
            "tier1",
            vec![Ok(vec![result("https://a.com", "A", "about a")])],
        );
        let router = SearchRouter::new(vec![Box::new(provider)]).unwrap();
        let (strategy, peak) = CountingStrategy::new();
        let extractor =
            ContentExtractor::new(vec![Box::new(strategy)], Duration::from_secs(1));

        let pipeline = RetrievalPipeline {
            router: &router,
            extractor: &extractor,
            relevance: &RejectAll,
            summarizer: None,
            config: config(),
        };

        let outcome = pipeline
            .run(&queries(&["q"]), &ProgressSink::disabled())
            .await;

        // Still counted in stats, but never fetched.
        assert_eq!(outcome.stats.results_total, 1);
        assert!(outcome.evidence.is_empty());
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn digest_text_prefers_summary_then_text_then_snippet() {
        let mut record = EvidenceRecord {
            title: "T".into(),
            url: "https://a.com".into(),
            snippet: "the snippet".into(),
            extracted_text: Some("the text".into()),
            strategy: Strategy::Stripped,
            summary: Some("the summary".into()),
            status: EvidenceStatus::Ok,
        };
        assert_eq!(record.digest_text(), "the summary");
        record.summary = None;
        assert_eq!(record.digest_text(), "the text");
        record.extracted_text = None;
        assert_eq!(record.digest_text(), "the snippet");
    }
}
