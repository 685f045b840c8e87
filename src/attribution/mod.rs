//! Claim attribution: decompose a synthesized answer into atomic claims,
//! filter the evidence set per claim, and explain each pairing. Every
//! generation call is individually bounded and individually recoverable; a
//! misbehaving model costs one claim its justification, never the run.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::llm::{is_error_marker, GenerationClient};
use crate::pipeline::progress::ProgressSink;
use crate::pipeline::EvidenceRecord;

pub const CLAIM_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(120);
pub const EVIDENCE_FILTER_TIMEOUT: Duration = Duration::from_secs(90);
pub const EXPLANATION_TIMEOUT: Duration = Duration::from_secs(90);

pub const NO_EVIDENCE_EXPLANATION: &str =
    "No direct evidence found in the retrieved sources for this claim.";
pub const TIMED_OUT_EXPLANATION: &str = "Justification timed out.";
pub const FAILED_EXPLANATION: &str = "Justification unavailable: the generation call failed.";
pub const NO_CLAIMS_EXPLANATION: &str =
    "Could not extract claims from the synthesized answer.";
const NO_CLAIMS_PLACEHOLDER: &str = "(no claims extracted)";

/// How many chars of a record's digest text go into the numbered evidence
/// list shown to the model.
const DIGEST_EXCERPT_LEN: usize = 300;

/// One claim linked back to the evidence supporting it. The supporting
/// records are always drawn from the attributor's input — never fabricated.
/// An empty supporting set with the fixed no-evidence explanation is a valid
/// terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Justification {
    pub claim: String,
    pub supporting_evidence: Vec<EvidenceRecord>,
    pub explanation: String,
}

pub struct ClaimAttributor {
    extraction_timeout: Duration,
    filter_timeout: Duration,
    explanation_timeout: Duration,
}

impl Default for ClaimAttributor {
    fn default() -> Self {
        Self {
            extraction_timeout: CLAIM_EXTRACTION_TIMEOUT,
            filter_timeout: EVIDENCE_FILTER_TIMEOUT,
            explanation_timeout: EXPLANATION_TIMEOUT,
        }
    }
}

impl ClaimAttributor {
    #[cfg(test)]
    pub(crate) fn with_timeouts(
        extraction_timeout: Duration,
        filter_timeout: Duration,
        explanation_timeout: Duration,
    ) -> Self {
        Self {
            extraction_timeout,
            filter_timeout,
            explanation_timeout,
        }
    }

    /// Claims are processed sequentially, bounding total load on the
    /// generation capability to one call at a time.
    pub async fn attribute(
        &self,
        llm: &dyn GenerationClient,
        synthesis: &str,
        evidence: &[EvidenceRecord],
        progress: &ProgressSink,
    ) -> Vec<Justification> {
        progress.milestone("Extracting claims...", "Attribution", Some(80), None);

        let claims = self.extract_claims(llm, synthesis).await;
        if claims.is_empty() {
            return vec![Justification {
                claim: NO_CLAIMS_PLACEHOLDER.to_string(),
                supporting_evidence: Vec::new(),
                explanation: NO_CLAIMS_EXPLANATION.to_string(),
            }];
        }

        let digest = evidence_digest(evidence);
        let mut justifications = Vec::with_capacity(claims.len());

        for (index, claim) in claims.iter().enumerate() {
            progress.milestone(
                "Attributing claims...",
                "Attribution",
                None,
                Some(format!("Claim {}/{}", index + 1, claims.len())),
            );

            let indices = self
                .filter_evidence(llm, claim, &digest, evidence.len())
                .await;
            let supporting: Vec<EvidenceRecord> = indices
                .iter()
                .map(|&i| evidence[i - 1].clone())
                .collect();
            let explanation = self.explain(llm, claim, &supporting).await;

            justifications.push(Justification {
                claim: claim.clone(),
                supporting_evidence: supporting,
                explanation,
            });
        }

        progress.milestone(
            "Claim attribution complete.",
            "Attribution",
            Some(95),
            Some(format!("{} claims attributed", justifications.len())),
        );
        justifications
    }

    async fn extract_claims(&self, llm: &dyn GenerationClient, synthesis: &str) -> Vec<String> {
        if synthesis.trim().is_empty() {
            return Vec::new();
        }
        let prompt = format!(
            "Break the following research answer into its individual factual claims.\n\
             Respond with a bullet list, one atomic claim per line.\n\nAnswer:\n{synthesis}"
        );

        match timeout(self.extraction_timeout, llm.generate(&prompt)).await {
            Ok(Ok(response)) if !is_error_marker(&response) => {
                let claims = parse_bullet_lines(&response);
                debug!(count = claims.len(), "claims extracted");
                claims
            }
            Ok(Ok(_)) => {
                warn!("claim extraction returned an error marker");
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "claim extraction failed");
                Vec::new()
            }
            Err(_) => {
                warn!("claim extraction timed out");
                Vec::new()
            }
        }
    }

    /// Returns 1-based indices into the evidence list. Anything the model
    /// says that is not a usable index is discarded; a whole-response "none"
    /// (or a response with no usable numbers) means no match.
    async fn filter_evidence(
        &self,
        llm: &dyn GenerationClient,
        claim: &str,
        digest: &str,
        evidence_count: usize,
    ) -> Vec<usize> {
        if evidence_count == 0 {
            return Vec::new();
        }
        let prompt = format!(
            "Claim:\n{claim}\n\nNumbered evidence summaries:\n{digest}\n\
             Which numbered entries directly support the claim? \
             Respond with comma-separated numbers (for example: 1, 3) or \"none\"."
        );

        match timeout(self.filter_timeout, llm.generate(&prompt)).await {
            Ok(Ok(response)) if !is_error_marker(&response) => {
                parse_index_response(&response, evidence_count)
            }
            Ok(Ok(_)) => {
                warn!("evidence filtering returned an error marker");
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "evidence filtering failed");
                Vec::new()
            }
            Err(_) => {
                warn!("evidence filtering timed out");
                Vec::new()
            }
        }
    }

    /// Empty evidence short-circuits to the fixed no-evidence string with no
    /// generation call.
    async fn explain(
        &self,
        llm: &dyn GenerationClient,
        claim: &str,
        supporting: &[EvidenceRecord],
    ) -> String {
        if supporting.is_empty() {
            return NO_EVIDENCE_EXPLANATION.to_string();
        }
        let digest = evidence_digest(supporting);
        let prompt = format!(
            "Explain in a short paragraph how the following evidence supports the claim.\n\n\
             Claim:\n{claim}\n\nEvidence:\n{digest}"
        );

        match timeout(self.explanation_timeout, llm.generate(&prompt)).await {
            Ok(Ok(response)) => {
                let response = response.trim();
                if response.is_empty() || is_error_marker(response) {
                    warn!("explanation response unusable");
                    FAILED_EXPLANATION.to_string()
                } else {
                    response.to_string()
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "explanation generation failed");
                FAILED_EXPLANATION.to_string()
            }
            Err(_) => {
                warn!("explanation generation timed out");
                TIMED_OUT_EXPLANATION.to_string()
            }
        }
    }
}

fn evidence_digest(evidence: &[EvidenceRecord]) -> String {
    let mut out = String::new();
    for (index, record) in evidence.iter().enumerate() {
        let text = record.digest_text();
        let excerpt = if text.len() > DIGEST_EXCERPT_LEN {
            let mut end = DIGEST_EXCERPT_LEN;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };
        out.push_str(&format!("{}. {} — {}\n", index + 1, record.title, excerpt));
    }
    out
}

/// Keep only non-empty lines once bullet markers and list numbering are
/// stripped.
pub(crate) fn parse_bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim().trim_start_matches(['-', '*', '•']).trim_start();
    // Also strip "1." / "2)" style numbering.
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim();
        }
    }
    line.trim()
}

/// Parse a comma-separated index response into valid, deduplicated 1-based
/// indices. A whole-response "none" (case-insensitive, trailing period
/// tolerated) is the explicit no-match signal; out-of-range and non-numeric
/// tokens are discarded.
fn parse_index_response(response: &str, evidence_count: usize) -> Vec<usize> {
    let trimmed = response.trim().trim_end_matches('.');
    if trimmed.eq_ignore_ascii_case("none") {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut indices = Vec::new();
    for token in response.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim().trim_end_matches('.');
        if let Ok(index) = token.parse::<usize>() {
            if index >= 1 && index <= evidence_count && seen.insert(index) {
                indices.push(index);
            }
        }
    }
    indices
}
