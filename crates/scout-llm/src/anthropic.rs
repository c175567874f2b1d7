//! Anthropic Messages API adapter for [`VisionProvider`].
//!
//! One non-streaming request per call: a single user message carrying the
//! base64 crop as an image block plus the label-keyed prompt. The response
//! text is validated into [`EnrichmentPayload`] before being trusted; any
//! shape mismatch is reported as [`ProviderError::ContentFormat`] so the
//! caller's retry policy can engage.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use scout_core::EnrichmentPayload;

use crate::prompt::prompt_for_label;
use crate::provider::{ProviderError, ProviderResult, VisionProvider};

/// Default base URL for the Anthropic API.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Default per-call timeout. Bounded so a wedged provider call cannot pin
/// an in-flight unit past the connection's drain window indefinitely.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default response token budget.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic adapter configuration.
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    /// API key credential.
    pub api_key: String,
    /// Model ID (e.g. `"claude-sonnet-4-5"`).
    pub model: String,
    /// Override base URL (tests point this at a mock server).
    pub base_url: Option<String>,
    /// Response token budget.
    pub max_tokens: u32,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Config with defaults for everything but the credential and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Vision provider backed by the Anthropic Messages API.
pub struct AnthropicVisionProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

/// Subset of the Messages API response we consume.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

impl AnthropicVisionProvider {
    /// Create a provider with a per-call timeout baked into the client.
    pub fn new(config: AnthropicConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Http)?;
        Ok(Self { config, client })
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let _ = headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| ProviderError::Auth {
                message: format!("invalid API key header: {e}"),
            })?,
        );
        Ok(headers)
    }

    fn build_request(&self, crop_base64: &str, label: &str) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": sniff_media_type(crop_base64),
                            "data": crop_base64,
                        },
                    },
                    {
                        "type": "text",
                        "text": prompt_for_label(label),
                    },
                ],
            }],
        })
    }
}

#[async_trait]
impl VisionProvider for AnthropicVisionProvider {
    async fn enrich(&self, crop_base64: &str, label: &str) -> ProviderResult<EnrichmentPayload> {
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/v1/messages");
        let headers = self.build_headers()?;
        let body = self.build_request(crop_base64, label);

        debug!(model = %self.config.model, label, "sending enrichment request");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = parse_api_error(&body_text, status.as_u16());
            warn!(status = status.as_u16(), message = %message, "Anthropic API error");
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ProviderError::Auth { message });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Http(e)
            }
        })?;

        let text = parsed
            .content
            .iter()
            .find(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .ok_or_else(|| ProviderError::ContentFormat {
                message: "response had no text content block".into(),
            })?;

        extract_payload(text)
    }
}

/// Parse the model's text into the expected structured shape.
///
/// Tolerates Markdown code fences around the JSON; everything else must
/// match [`EnrichmentPayload`] exactly, with a missing key treated the same
/// as unparseable text.
fn extract_payload(text: &str) -> ProviderResult<EnrichmentPayload> {
    let stripped = strip_code_fences(text);
    serde_json::from_str(stripped).map_err(|e| ProviderError::ContentFormat {
        message: format!("model text did not match expected shape: {e}"),
    })
}

/// Remove a surrounding ```/```json fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Guess the crop's media type from its leading bytes.
///
/// The detection pipeline usually ships JPEG, so that is the default when
/// the prefix decodes to nothing recognizable.
fn sniff_media_type(crop_base64: &str) -> &'static str {
    let prefix: String = crop_base64.chars().take(24).collect();
    let Ok(bytes) = BASE64.decode(pad_base64(&prefix)) else {
        return "image/jpeg";
    };
    match bytes.as_slice() {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// Pad a base64 prefix to a decodable length.
fn pad_base64(prefix: &str) -> String {
    let mut s = prefix.to_string();
    while s.len() % 4 != 0 {
        s.push('=');
    }
    s
}

/// Extract a human-readable message from an API error body.
fn parse_api_error(body: &str, status: u16) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(message) = json["error"]["message"].as_str() {
            return message.to_string();
        }
    }
    format!("HTTP {status}: {body}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
