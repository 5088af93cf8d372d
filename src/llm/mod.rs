//! Generative model invocation.
//!
//! [`LanguageModel`] is the seam the orchestrator talks to; [`GeminiClient`]
//! is the production implementation. Every invocation is one logical call
//! that may be retried internally, and failures are classified into the
//! [`ModelError`] taxonomy.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

mod gemini;

pub use gemini::{GeminiClient, HttpReply, ModelTransport, ReqwestTransport};

// ---

/// Sampling parameters sent with every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    /// Structured JSON generation: low temperature, large token budget.
    pub const STRUCTURED: Self = Self {
        temperature: 0.2,
        top_k: 40,
        top_p: 0.95,
        max_output_tokens: 8192,
    };

    /// Free-text chat: warmer, shorter.
    pub const CHAT: Self = Self {
        temperature: 0.7,
        top_k: 40,
        top_p: 0.95,
        max_output_tokens: 1024,
    };
}

/// Failures worth asking the model again for.
#[derive(Debug, thiserror::Error)]
pub enum TransientError {
    #[error("rate limited by model endpoint (HTTP 429)")]
    RateLimited,

    #[error("model endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// API key or model identifier missing. Never retried.
    #[error("model configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transient(#[from] TransientError),

    /// Response lacked the expected candidate structure.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model call failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<ModelError>,
    },
}

impl ModelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::Transient(TransientError::RateLimited))
    }
}

/// One-shot access to a generative model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Invoke the model and parse its answer as JSON (markdown fences allowed).
    async fn generate_json(&self, prompt: &str, params: GenerationParams) -> Result<Value, ModelError>;

    /// Invoke the model and return its answer text verbatim.
    async fn generate_text(&self, prompt: &str, params: GenerationParams) -> Result<String, ModelError>;
}
