//! The outer research agent: plans queries, drives the retrieval pipeline,
//! synthesizes the evidence, attributes claims, and formats the report.
//! Everything here is thin collaborator plumbing around the pipeline core.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::attribution::{parse_bullet_lines, ClaimAttributor, Justification};
use crate::llm::{is_error_marker, GenerationClient};
use crate::pipeline::progress::ProgressSink;
use crate::pipeline::{
    EvidenceRecord, EvidenceStatus, Query, ResearchContext, RetrievalPipeline, RetrievalStats,
};

const MAX_PLANNED_QUERIES: usize = 6;
const PLAN_TIMEOUT: Duration = Duration::from_secs(120);
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CitationStyle {
    #[default]
    Apa,
    Mla,
}

#[derive(Debug)]
pub struct ResearchReport {
    pub context: ResearchContext,
    pub plan: Vec<String>,
    pub evidence: Vec<EvidenceRecord>,
    pub stats: RetrievalStats,
    pub synthesis: String,
    pub justifications: Vec<Justification>,
}

pub async fn run_research(
    llm: &dyn GenerationClient,
    pipeline: &RetrievalPipeline<'_>,
    attributor: Option<&ClaimAttributor>,
    context: &ResearchContext,
    progress: &ProgressSink,
) -> ResearchReport {
    progress.milestone("Planning research steps...", "Planning", Some(0), None);
    let plan = plan_queries(llm, context).await;
    progress.milestone(
        "Planning complete.",
        "Planning",
        Some(3),
        Some(format!("{} queries planned", plan.len())),
    );

    let queries: Vec<Query> = plan
        .iter()
        .map(|text| Query {
            text: text.clone(),
            context: context.clone(),
        })
        .collect();

    let outcome = pipeline.run(&queries, progress).await;

    // Failed records are counted in the stats but never shown to the model.
    let usable: Vec<EvidenceRecord> = outcome
        .evidence
        .iter()
        .filter(|r| r.status != EvidenceStatus::Failed)
        .cloned()
        .collect();

    progress.milestone(
        "Synthesizing research summary...",
        "Synthesizing",
        Some(70),
        None,
    );
    let synthesis = synthesize(llm, context, &usable).await;
    progress.milestone("Synthesis complete.", "Synthesizing", Some(75), None);

    let justifications = match attributor {
        Some(attributor) if !synthesis.is_empty() => {
            attributor
                .attribute(llm, &synthesis, &usable, progress)
                .await
        }
        _ => Vec::new(),
    };

    progress.milestone(
        "Research complete.",
        "Done",
        Some(100),
        Some(format!(
            "{} of {} queries succeeded, {} evidence records",
            outcome.stats.queries_successful,
            outcome.stats.queries_total,
            outcome.evidence.len()
        )),
    );

    ResearchReport {
        context: context.clone(),
        plan,
        evidence: outcome.evidence,
        stats: outcome.stats,
        synthesis,
        justifications,
    }
}

fn context_preamble(context: &ResearchContext) -> String {
    let mut preamble = String::new();
    if !context.audience.is_empty() {
        preamble.push_str(&format!("Intended audience: {}. ", context.audience));
    }
    if !context.tone.is_empty() {
        preamble.push_str(&format!("Preferred tone/style: {}. ", context.tone));
    }
    preamble
}

/// Ask the model to break the goal into search queries. On any failure the
/// goal itself becomes the single query — planning is never load-bearing.
async fn plan_queries(llm: &dyn GenerationClient, context: &ResearchContext) -> Vec<String> {
    let prompt = format!(
        "{}\nBreak down the following research goal into focused web search queries:\n{}\n\
         Respond with a bullet list, one query per line.",
        context_preamble(context),
        context.goal
    );

    let planned = match timeout(PLAN_TIMEOUT, llm.generate(&prompt)).await {
        Ok(Ok(response)) if !is_error_marker(&response) => parse_bullet_lines(&response),
        Ok(Ok(_)) => {
            warn!("planner returned an error marker");
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "query planning failed");
            Vec::new()
        }
        Err(_) => {
            warn!("query planning timed out");
            Vec::new()
        }
    };

    let mut queries: Vec<String> = planned
        .into_iter()
        .take(MAX_PLANNED_QUERIES)
        .collect();
    if queries.is_empty() {
        info!("falling back to the goal as the single query");
        queries.push(context.goal.clone());
    }
    queries
}

/// Merge the usable evidence into one research answer. A failed synthesis
/// falls back to the concatenated digests so the run still produces output.
async fn synthesize(
    llm: &dyn GenerationClient,
    context: &ResearchContext,
    usable: &[EvidenceRecord],
) -> String {
    let digests: Vec<&str> = usable
        .iter()
        .map(|r| r.digest_text())
        .filter(|d| !d.trim().is_empty())
        .collect();
    if digests.is_empty() {
        warn!("no usable evidence to synthesize");
        return String::new();
    }

    let prompt = format!(
        "{}\nYou are an expert research assistant. Extract, merge, and cross-reference the \
         factual information, data, and findings from the following summaries into a single, \
         unified, information-rich research report. Merge overlapping facts, reconcile \
         differing details, and present the findings as if you had direct access to the \
         original sources.\nResearch goal: {}\n\nSummaries:\n{}",
        context_preamble(context),
        context.goal,
        digests.join("\n---\n")
    );

    match timeout(SYNTHESIS_TIMEOUT, llm.generate(&prompt)).await {
        Ok(Ok(synthesis)) if !is_error_marker(&synthesis) && !synthesis.trim().is_empty() => {
            synthesis.trim().to_string()
        }
        Ok(Ok(_)) => {
            warn!("synthesis returned an error marker, falling back to joined digests");
            digests.join("\n\n")
        }
        Ok(Err(e)) => {
            warn!(error = %e, "synthesis failed, falling back to joined digests");
            digests.join("\n\n")
        }
        Err(_) => {
            warn!("synthesis timed out, falling back to joined digests");
            digests.join("\n\n")
        }
    }
}

pub fn format_report(report: &ResearchReport, style: CitationStyle) -> String {
    let mut out = format!("# Research Report: {}\n\n", report.context.goal);

    if !report.context.audience.is_empty() {
        out.push_str(&format!("**Audience:** {}\n\n", report.context.audience));
    }
    if !report.context.tone.is_empty() {
        out.push_str(&format!("**Tone/Style:** {}\n\n", report.context.tone));
    }

    out.push_str("## Research Plan\n\n");
    for query in &report.plan {
        out.push_str(&format!("- {query}\n"));
    }
    out.push('\n');

    out.push_str(&format!(
        "## Retrieval\n\n{} of {} queries returned results; {} results found; \
         {} evidence records collected.\n\n",
        report.stats.queries_successful,
        report.stats.queries_total,
        report.stats.results_total,
        report.evidence.len()
    ));

    let summarized: Vec<&EvidenceRecord> = report
        .evidence
        .iter()
        .filter(|r| r.summary.is_some())
        .collect();
    if !summarized.is_empty() {
        out.push_str("## Summaries\n\n");
        for (index, record) in summarized.iter().enumerate() {
            out.push_str(&format!(
                "### {}. [{}]({})\n\n{}\n\n",
                index + 1,
                escape_md_link(&record.title),
                escape_md_link(&record.url),
                record.summary.as_deref().unwrap_or_default()
            ));
        }
    }

    if !report.synthesis.is_empty() {
        out.push_str("## Synthesized Research Summary\n\n");
        out.push_str(&report.synthesis);
        out.push_str("\n\n");
    }

    if !report.justifications.is_empty() {
        out.push_str("## Claim Attribution\n\n");
        for justification in &report.justifications {
            out.push_str(&format!("- **{}**\n", justification.claim));
            out.push_str(&format!("  {}\n", justification.explanation));
            for supporting in &justification.supporting_evidence {
                out.push_str(&format!(
                    "  - [{}]({})\n",
                    escape_md_link(&supporting.title),
                    escape_md_link(&supporting.url)
                ));
            }
        }
        out.push('\n');
    }

    if !report.evidence.is_empty() {
        out.push_str("## Bibliography\n\n");
        out.push_str(&bibliography(&report.evidence, style));
    }

    out
}

fn bibliography(evidence: &[EvidenceRecord], style: CitationStyle) -> String {
    let mut lines = Vec::with_capacity(evidence.len());
    for (index, record) in evidence.iter().enumerate() {
        let title = escape_md_link(&record.title);
        let url = escape_md_link(&record.url);
        let line = match style {
            CitationStyle::Mla => format!("{}. [{}]({}).", index + 1, title, url),
            CitationStyle::Apa => format!("{}. {}. (n.d.). [Link]({})", index + 1, title, url),
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Escape characters that break Markdown link syntax: `[`, `]`, `(`, `)`.
fn escape_md_link(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '[' | ']' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
