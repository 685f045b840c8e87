use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::types::{
    EmbeddingsRequest, EmbeddingsResponse, GenerateChunk, GenerateRequest, GenerateRequestOptions,
};

const DEFAULT_MODEL: &str = "qwen3:8b";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model '{0}' not found on the generation server")]
    ModelNotFound(String),

    #[error("generation server overloaded. Please retry later.")]
    Overloaded,

    #[error("generation error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Abstraction for the text-generation capability.
/// Implemented by [`OllamaClient`] for production; mock implementations used
/// in tests. Failures surface either as `Err` or as an embedded error-marker
/// string (see [`is_error_marker`]) — callers treat both as failure.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Abstraction for the embedding capability. Returns an empty vector on any
/// failure rather than erroring — embedding consumers degrade gracefully.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
}

/// Some generation backends report failures inside the response body instead
/// of through the transport. Those marker strings must never be mistaken for
/// model output.
pub fn is_error_marker(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('[') && trimmed.to_ascii_lowercase().contains("error")
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub context_window: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: String::new(),
            context_window: 2048,
        }
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    embedding_model: String,
    options: GenerateOptions,
}

impl OllamaClient {
    pub fn new(http: Client, base_url: &str, model: Option<String>, options: GenerateOptions) -> Self {
        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        // Strip a scheme-style provider prefix like "ollama/qwen3:8b".
        let model = model
            .strip_prefix("ollama/")
            .map(str::to_string)
            .unwrap_or(model);
        let embedding_model = env::var("EMBEDDING_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            embedding_model,
            options,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self::new(http, base_url, None, GenerateOptions::default())
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: true,
            system: if self.options.system_prompt.is_empty() {
                None
            } else {
                Some(self.options.system_prompt.clone())
            },
            options: GenerateRequestOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
                num_ctx: self.options.context_window,
            },
        };

        let response = self
            .http
            .post(&url)
            .header("User-Agent", crate::USER_AGENT)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                warn!(model = %self.model, "model not found on generation server");
                return Err(LlmError::ModelNotFound(self.model.clone()));
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            {
                warn!(status = %status, "generation server overloaded");
                return Err(LlmError::Overloaded);
            }
            let snippet = if body.len() > 200 { &body[..200] } else { &body };
            return Err(LlmError::Api {
                code: status.as_u16(),
                message: snippet.to_string(),
            });
        }

        let body = response.text().await?;
        let output = concat_stream(&body)?;
        debug!(model = %self.model, chars = output.len(), "generation complete");
        Ok(output)
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: self.embedding_model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .http
            .post(&url)
            .header("User-Agent", crate::USER_AGENT)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                code: status.as_u16(),
                message: format!("embeddings request failed with HTTP {status}"),
            });
        }

        let body: EmbeddingsResponse = response.json().await?;
        Ok(body.embedding)
    }
}

/// Concatenate the `response` fields of a newline-delimited JSON stream.
/// Also accepts a single non-streamed object. An `error` field on any line
/// fails the whole call.
fn concat_stream(body: &str) -> Result<String, LlmError> {
    let mut output = String::new();
    let mut parsed_any = false;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| LlmError::Malformed(format!("bad stream line: {e}")))?;
        if let Some(err) = chunk.error {
            return Err(LlmError::Api {
                code: 0,
                message: err,
            });
        }
        output.push_str(&chunk.response);
        parsed_any = true;
    }

    if !parsed_any {
        return Err(LlmError::Malformed("empty response body".into()));
    }
    Ok(output)
}

fn is_retriable(e: &LlmError) -> bool {
    matches!(
        e,
        LlmError::Overloaded
            | LlmError::Api {
                code: 500..=599,
                ..
            }
    )
}

/// Equal jitter backoff: base/2 + rand(0, base/2).
fn jittered_backoff(attempt: u32) -> u64 {
    let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let half = base / 2;
    half + fastrand::u64(..half.max(1))
}

#[async_trait]
impl GenerationClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.generate_once(prompt).await {
                Ok(output) => return Ok(output),
                Err(e) if is_retriable(&e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        let delay_ms = jittered_backoff(attempt);
                        debug!(
                            attempt = attempt + 1,
                            delay_ms, "retrying after transient generation error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(LlmError::Overloaded))
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.embed_once(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "embedding call failed, returning empty vector");
                Vec::new()
            }
        }
    }
}
