use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{GenerationParams, LanguageModel, ModelError, TransientError};
use crate::config::ModelSettings;

// ---

/// Rate-limit backoff unit: attempt `n` waits `n * 5s`.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Raw HTTP outcome of one `generateContent` call.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Sends one request to the model endpoint. Only transport-level problems
/// are errors here; HTTP statuses are classified by the client.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn post(&self, url: &str, api_key: &str, payload: &Value) -> Result<HttpReply, TransientError>;
}

/// `reqwest` transport with a bounded per-request timeout.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ModelTransport for ReqwestTransport {
    async fn post(&self, url: &str, api_key: &str, payload: &Value) -> Result<HttpReply, TransientError> {
        // ---
        let response = self
            .http
            .post(url)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .await
            .map_err(|e| TransientError::Network(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransientError::Network(e.without_url().to_string()))?;

        Ok(HttpReply { status, body })
    }
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    settings: ModelSettings,
    transport: Arc<dyn ModelTransport>,
}

impl GeminiClient {
    /// Build a client using the default HTTP transport.
    pub fn new(settings: ModelSettings) -> Result<Self, ModelError> {
        let transport = ReqwestTransport::new(settings.timeout)
            .map_err(|e| ModelError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: ModelSettings, transport: Arc<dyn ModelTransport>) -> Self {
        Self { settings, transport }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.api_base, self.settings.model
        )
    }

    fn api_key(&self) -> Result<&str, ModelError> {
        // ---
        if self.settings.model.trim().is_empty() {
            return Err(ModelError::Configuration("GEMINI_MODEL is empty".into()));
        }
        self.settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::Configuration("GEMINI_API_KEY environment variable not set".into()))
    }

    /// Delay before retrying after `attempt` (1-based) failed with `err`.
    fn backoff(&self, err: &ModelError, attempt: u32) -> Duration {
        if err.is_rate_limited() {
            RATE_LIMIT_BACKOFF * attempt
        } else {
            self.settings.retry_delay * attempt
        }
    }

    /// One HTTP round trip, returning the first candidate's text.
    async fn attempt(&self, url: &str, api_key: &str, payload: &Value) -> Result<String, ModelError> {
        // ---
        let reply = self.transport.post(url, api_key, payload).await?;
        match reply.status {
            429 => Err(TransientError::RateLimited.into()),
            200..=299 => extract_text(&reply.body),
            status => Err(TransientError::Http {
                status,
                body: truncate(&reply.body, MAX_ERROR_BODY),
            }
            .into()),
        }
    }

    /// Run attempts until `decode` accepts the text or attempts run out.
    async fn invoke<T>(
        &self,
        prompt: &str,
        params: GenerationParams,
        decode: impl Fn(String) -> Result<T, ModelError> + Send + Sync,
    ) -> Result<T, ModelError> {
        // ---
        let api_key = self.api_key()?;
        let url = self.endpoint();
        let payload = request_payload(prompt, params);
        let max_attempts = self.settings.max_retries.max(1);

        debug!(model = %self.settings.model, prompt_chars = prompt.len(), "invoking model");

        let mut attempt = 1;
        loop {
            let err = match self.attempt(&url, api_key, &payload).await.and_then(&decode) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "model call exhausted retries");
                return Err(ModelError::ExhaustedRetries {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let wait = self.backoff(&err, attempt);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {}s",
                attempt,
                max_attempts,
                err,
                wait.as_secs_f32()
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_json(&self, prompt: &str, params: GenerationParams) -> Result<Value, ModelError> {
        self.invoke(prompt, params, |text| parse_model_json(&text)).await
    }

    async fn generate_text(&self, prompt: &str, params: GenerationParams) -> Result<String, ModelError> {
        self.invoke(prompt, params, Ok).await
    }
}

/// Request body: the prompt as the only content part plus sampling params.
fn request_payload(prompt: &str, params: GenerationParams) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": params,
    })
}

/// First candidate's first text part.
fn extract_text(body: &str) -> Result<String, ModelError> {
    // ---
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| ModelError::MalformedResponse(format!("response body is not JSON: {e}")))?;

    let candidate = parsed
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| ModelError::MalformedResponse("no candidates in response".into()))?;

    candidate
        .pointer("/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ModelError::MalformedResponse("first candidate has no text part".into()))
}

/// Remove a surrounding markdown code fence, with or without a language tag.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    // ---
    let mut inner = text.trim();
    if let Some(rest) = inner.strip_prefix("```") {
        // language tag runs to the end of the fence line
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
            .unwrap_or(rest.len());
        inner = &rest[tag_len..];
    }
    if let Some(rest) = inner.trim_end().strip_suffix("```") {
        inner = rest;
    }
    inner.trim()
}

fn parse_model_json(text: &str) -> Result<Value, ModelError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| TransientError::InvalidJson(e.to_string()).into())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
