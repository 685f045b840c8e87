use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub options: GenerateRequestOptions,
}

#[derive(Debug, Serialize)]
pub struct GenerateRequestOptions {
    pub temperature: f32,
    pub num_predict: u32,
    pub num_ctx: u32,
}

/// One line of the `/api/generate` response stream. With `stream: true`
/// Ollama emits newline-delimited JSON; with `stream: false` a single
/// object of the same shape. Unknown keys (`done`, timings) are ignored.
#[derive(Debug, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsResponse {
    #[serde(default)]
    pub embedding: Vec<f32>,
}
