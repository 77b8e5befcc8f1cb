//! OpenAI-compatible remote provider for embeddings and vision analysis.
//!
//! Errors are classified at this boundary: timeouts, rate limits, and 5xx
//! responses surface as [`ProviderError::Retryable`]; anything the server
//! rejects outright (4xx, malformed content) is
//! [`ProviderError::Permanent`]. No reqwest error ever escapes raw.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ProviderError;
use crate::model::VisionMetadata;
use crate::provider::{EmbeddingProvider, VisionProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const VISION_MODEL: &str = "gpt-4o";
const EMBEDDING_DIMENSIONS: usize = 1536;

/// Maximum characters of search text sent per embedding input.
const MAX_INPUT_CHARS: usize = 8000;

/// Remote provider speaking the OpenAI REST surface.
pub struct RemoteProvider {
    client: Client,
    base_url: String,
    api_key: String,
    dimension: usize,
}

impl RemoteProvider {
    /// Build from the environment (`DAMS_API_KEY`, optional
    /// `DAMS_API_BASE_URL`). The ingestion path uses a generous timeout
    /// because eventual completion matters more than latency there.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_env_with_timeout(Duration::from_secs(60))
    }

    /// Build from the environment with an explicit per-request timeout.
    /// The search path passes a short one so a slow provider degrades to
    /// lexical-only instead of stalling the query.
    pub fn from_env_with_timeout(timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = dotenvy::var("DAMS_API_KEY")
            .map_err(|_| ProviderError::Permanent("DAMS_API_KEY not set".into()))?;
        let base_url =
            dotenvy::var("DAMS_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, api_key, timeout)
    }

    /// Build with explicit connection parameters.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(format!("http client init: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            dimension: EMBEDDING_DIMENSIONS,
        })
    }

    fn classify(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() || e.is_connect() {
            return ProviderError::Retryable(format!("transport: {e}"));
        }
        ProviderError::Retryable(format!("request failed: {e}"))
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
        if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::Retryable(format!("provider returned {status}"))
        } else {
            ProviderError::Permanent(format!("provider returned {status}: {body}"))
        }
    }

    fn post_json(&self, path: &str, body: serde_json::Value) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(Self::classify)?;
        let status = resp.status();
        let text = resp.text().map_err(Self::classify)?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl EmbeddingProvider for RemoteProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let out = self.embed_batch(&[text.to_string()])?;
        out.into_iter()
            .next()
            .ok_or_else(|| ProviderError::Permanent("empty embedding response".into()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| truncate_chars(t, MAX_INPUT_CHARS))
            .collect();
        let body = json!({
            "model": EMBEDDING_MODEL,
            "input": inputs,
            "dimensions": self.dimension,
        });
        let text = self.post_json("/embeddings", body)?;
        let parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Permanent(format!("malformed embedding response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::Permanent(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        debug!(count = texts.len(), "embedded batch");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        EMBEDDING_MODEL
    }
}

impl VisionProvider for RemoteProvider {
    fn analyze(&self, content_ref: &str, is_video: bool) -> Result<VisionMetadata, ProviderError> {
        let media = if is_video { "video thumbnail" } else { "image" };
        let body = json!({
            "model": VISION_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": extraction_prompt(media)},
                    {"type": "image_url", "image_url": {"url": content_ref}},
                ],
            }],
            "response_format": {"type": "json_object"},
            "max_tokens": 2048,
        });
        let text = self.post_json("/chat/completions", body)?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Permanent(format!("malformed vision response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Permanent("empty vision response".into()))?;
        serde_json::from_str(&content)
            .map_err(|e| ProviderError::Permanent(format!("vision output not parseable: {e}")))
    }
}

/// Truncate on a char boundary so multi-byte input cannot split.
fn truncate_chars(t: &str, max: usize) -> &str {
    match t.char_indices().nth(max) {
        Some((idx, _)) => &t[..idx],
        None => t,
    }
}

fn extraction_prompt(media_type: &str) -> String {
    format!(
        "Analyze this {media_type} from a marketing media library and return JSON with \
         exactly these fields: \
         tags (string array of searchable tags), \
         subjects (string array: people, equipment, props), \
         dominant_colors (hex string array), \
         extracted_text (visible text or null), \
         description (detailed natural-language description for search), \
         suggested_queries (string array of queries a marketer might use), \
         reusability (integer 1-5, 5 = blank template with no baked-in specifics), \
         has_hardcoded_date (bool), \
         has_hardcoded_location (bool). \
         Be thorough; the description and tags feed a search index."
    )
}
