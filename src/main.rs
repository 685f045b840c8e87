mod agent;
mod attribution;
mod config;
mod extract;
mod llm;
mod pipeline;
mod search;

pub const USER_AGENT: &str = concat!("dossier/", env!("CARGO_PKG_VERSION"), " (research agent)");

use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use tracing::info;

use agent::CitationStyle;
use attribution::ClaimAttributor;
use config::DepthMode;
use extract::ContentExtractor;
use llm::{GenerateOptions, GenerationClient, OllamaClient};
use pipeline::progress::{ProgressEvent, ProgressSink};
use pipeline::relevance::{EmbeddingRelevance, KeywordRelevance, RelevancePolicy};
use pipeline::{ResearchContext, RetrievalPipeline};
use search::{Brave, DuckDuckGo, GoogleCse, SearchProvider, SearchRouter};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Global HTTP client timeout covering DNS + connect + response body.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum redirect hops before aborting.
const MAX_REDIRECTS: usize = 5;

/// Gather web evidence for a research goal and attribute the synthesized
/// claims back to it.
///
/// Configuration via environment variables:
/// - `GOOGLE_API_KEY` / `GOOGLE_CSE_ID`: enables the Google CSE tier (optional)
/// - `BRAVE_API_KEY`: authenticates the Brave tier (optional)
/// - `OLLAMA_URL`, `DEFAULT_MODEL`, `EMBEDDING_MODEL`: generation backend
#[derive(Parser)]
#[command(name = "dossier", version)]
struct Cli {
    /// Research goal
    goal: String,

    /// Intended audience for the report
    #[arg(long, default_value = "")]
    audience: String,

    /// Preferred tone/style
    #[arg(long, default_value = "")]
    tone: String,

    /// Depth mode preset: concurrency bounds, result targets, timeouts
    #[arg(long, value_enum, default_value = "balanced")]
    depth: DepthMode,

    /// Generation model (defaults to DEFAULT_MODEL env or the built-in)
    #[arg(long)]
    model: Option<String>,

    /// Ollama server URL
    #[arg(long, default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Skip per-source summaries
    #[arg(long)]
    no_summaries: bool,

    /// Skip claim attribution
    #[arg(long)]
    no_attribution: bool,

    /// Filter results by embedding similarity instead of keyword overlap
    #[arg(long)]
    semantic_filter: bool,

    /// Bibliography citation style
    #[arg(long, value_enum, default_value = "apa")]
    citations: CitationStyle,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dossier=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let http = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()?;

    let mut run_config = cli.depth.preset();
    if cli.no_summaries {
        run_config.summarize = false;
    }

    let model = cli
        .model
        .clone()
        .or_else(|| std::env::var("DEFAULT_MODEL").ok());
    let llm = OllamaClient::new(http.clone(), &cli.ollama_url, model, GenerateOptions::default());

    let providers: Vec<Box<dyn SearchProvider>> = vec![
        Box::new(GoogleCse::from_env(http.clone())),
        Box::new(DuckDuckGo::new(http.clone())),
        Box::new(Brave::from_env(http.clone())),
    ];
    let router = SearchRouter::new(providers)?;
    let extractor = ContentExtractor::with_defaults(http.clone(), run_config.timeout);

    let keyword_policy = KeywordRelevance::default();
    let embedding_policy = EmbeddingRelevance::new(llm.clone());
    let relevance: &dyn RelevancePolicy = if cli.semantic_filter {
        &embedding_policy
    } else {
        &keyword_policy
    };

    let pipeline = RetrievalPipeline {
        router: &router,
        extractor: &extractor,
        relevance,
        summarizer: if run_config.summarize {
            Some(&llm as &dyn GenerationClient)
        } else {
            None
        },
        config: run_config,
    };

    let attributor = ClaimAttributor::default();
    let context = ResearchContext {
        goal: cli.goal,
        audience: cli.audience,
        tone: cli.tone,
    };

    let progress = ProgressSink::new(Box::new(|event: &ProgressEvent| {
        match (&event.log, event.percent) {
            (Some(log), Some(percent)) => info!(percent, "{} {log}", event.description),
            (Some(log), None) => info!("{} {log}", event.description),
            (None, Some(percent)) => info!(percent, "{}", event.description),
            (None, None) => info!("{}", event.description),
        }
    }));

    let report = agent::run_research(
        &llm,
        &pipeline,
        (!cli.no_attribution).then_some(&attributor),
        &context,
        &progress,
    )
    .await;

    println!("{}", agent::format_report(&report, cli.citations));
    Ok(())
}
