//! Text-generation and embedding capabilities backed by a local Ollama server.

pub mod client;
mod types;

pub use client::{
    is_error_marker, EmbeddingClient, GenerateOptions, GenerationClient, LlmError, OllamaClient,
};
