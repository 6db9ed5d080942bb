//! DashScope adapters for Qwen/DeepSeek text generation and Qwen-VL vision.
//!
//! DashScope wraps messages in an `input` envelope and sampling parameters in
//! a `parameters` envelope; vision calls additionally carry the image as a
//! base64 data URL inside a content list.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{ErrorContext, GatewayError};
use super::types::{ChatOptions, ChatOutcome, Message, Role};
use super::{ChatBackend, VisionBackend};

fn build_client(api_key: &str, timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| GatewayError::config("Invalid API key format"))?;
    headers.insert(AUTHORIZATION, auth_value);

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| GatewayError::config(format!("Failed to create HTTP client: {e}")))
}

fn classify_status(
    backend: &str,
    status: u16,
    message: String,
    ctx: ErrorContext,
) -> GatewayError {
    match status {
        401 | 403 => GatewayError::auth_with_context(backend, message, ctx),
        429 => GatewayError::backend_with_context(backend, message, true, ctx),
        s => GatewayError::backend_with_context(backend, message, s >= 500, ctx),
    }
}

// =============================================================================
// TEXT GENERATION
// =============================================================================

/// Adapter for the DashScope text-generation endpoint (Qwen, DeepSeek).
#[derive(Debug, Clone)]
pub struct DashScopeAdapter {
    client: reqwest::Client,
    backend: String,
    base_url: String,
    model: String,
}

impl DashScopeAdapter {
    pub fn new(
        backend: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_client(&api_key.into(), timeout)?,
            backend: backend.into(),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn generation_url(&self) -> String {
        format!(
            "{}/services/aigc/text-generation/generation",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Serialize)]
struct DsMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for DsMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct DsTextResponse {
    output: Option<DsOutput>,
    message: Option<String>,
    code: Option<String>,
}

#[derive(Deserialize)]
struct DsOutput {
    text: Option<String>,
}

#[async_trait]
impl ChatBackend for DashScopeAdapter {
    fn name(&self) -> &str {
        &self.backend
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<ChatOutcome, GatewayError> {
        let start = Instant::now();

        let ds_messages: Vec<DsMessage> = messages.iter().map(DsMessage::from).collect();
        let body = json!({
            "model": self.model,
            "input": { "messages": ds_messages },
            "parameters": {
                "temperature": options.temperature,
                "max_tokens": options.max_tokens,
            }
        });

        let response = self
            .client
            .post(self.generation_url())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = super::read_capped_body(&self.backend, response).await?;
        let ctx = ErrorContext::new().with_status(status.as_u16());

        if !status.is_success() {
            let (message, ctx) = match serde_json::from_str::<DsTextResponse>(&raw) {
                Ok(parsed) => {
                    let ctx = if let Some(code) = parsed.code {
                        ctx.with_code(code)
                    } else {
                        ctx
                    };
                    (parsed.message.unwrap_or_default(), ctx)
                }
                Err(_) => (format!("HTTP {}", status.as_u16()), ctx),
            };
            return Err(classify_status(&self.backend, status.as_u16(), message, ctx));
        }

        let parsed: DsTextResponse = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::backend(&self.backend, format!("Invalid JSON: {e}"), false))?;

        let text = parsed
            .output
            .and_then(|o| o.text)
            .ok_or_else(|| GatewayError::backend(&self.backend, "No output text", false))?;

        Ok(ChatOutcome {
            text,
            latency: start.elapsed(),
        })
    }
}

// =============================================================================
// VISION
// =============================================================================

/// System prompt for question extraction from images.
const VISION_SYSTEM: &str =
    "You are a professional chemistry assistant, skilled at recognizing and analyzing \
     chemistry problems.";

/// Default extraction instruction when the caller provides no hint.
const VISION_INSTRUCTION: &str =
    "Carefully analyze the chemistry problem in this image and extract the complete \
     problem statement. If the image contains chemical equations, molecular formulas, \
     or other chemical notation, transcribe them accurately.";

/// Adapter for the DashScope multimodal endpoint (Qwen-VL).
#[derive(Debug, Clone)]
pub struct DashScopeVisionAdapter {
    client: reqwest::Client,
    backend: String,
    base_url: String,
    model: String,
}

impl DashScopeVisionAdapter {
    pub fn new(
        backend: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_client(&api_key.into(), timeout)?,
            backend: backend.into(),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn generation_url(&self) -> String {
        format!(
            "{}/services/aigc/multimodal-generation/generation",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Deserialize)]
struct DsVisionResponse {
    output: Option<DsVisionOutput>,
    message: Option<String>,
    code: Option<String>,
}

#[derive(Deserialize)]
struct DsVisionOutput {
    choices: Option<Vec<DsVisionChoice>>,
}

#[derive(Deserialize)]
struct DsVisionChoice {
    message: Option<DsVisionMessage>,
}

#[derive(Deserialize)]
struct DsVisionMessage {
    content: Option<serde_json::Value>,
}

/// The multimodal endpoint returns content as either a plain string or a
/// list of `{"text": ...}` fragments depending on model version.
fn extract_vision_text(content: serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Array(items) => items.into_iter().find_map(|item| match item {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(mut map) => match map.remove("text") {
                Some(serde_json::Value::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }),
        _ => None,
    }
}

#[async_trait]
impl VisionBackend for DashScopeVisionAdapter {
    fn name(&self) -> &str {
        &self.backend
    }

    async fn extract(
        &self,
        image_bytes: &[u8],
        hint: Option<&str>,
        options: ChatOptions,
    ) -> Result<ChatOutcome, GatewayError> {
        if image_bytes.is_empty() {
            return Err(GatewayError::invalid_request("empty image payload"));
        }

        let start = Instant::now();
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let instruction = hint.unwrap_or(VISION_INSTRUCTION);
        let body = json!({
            "model": self.model,
            "input": {
                "messages": [
                    {
                        "role": "system",
                        "content": [{ "text": VISION_SYSTEM }]
                    },
                    {
                        "role": "user",
                        "content": [
                            { "image": format!("data:image/jpeg;base64,{image_b64}") },
                            { "text": instruction }
                        ]
                    }
                ]
            },
            "parameters": {
                "temperature": options.temperature,
            }
        });

        let response = self
            .client
            .post(self.generation_url())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = super::read_capped_body(&self.backend, response).await?;
        let ctx = ErrorContext::new().with_status(status.as_u16());

        if !status.is_success() {
            let (message, ctx) = match serde_json::from_str::<DsVisionResponse>(&raw) {
                Ok(parsed) => {
                    let ctx = if let Some(code) = parsed.code {
                        ctx.with_code(code)
                    } else {
                        ctx
                    };
                    (parsed.message.unwrap_or_default(), ctx)
                }
                Err(_) => (format!("HTTP {}", status.as_u16()), ctx),
            };
            return Err(classify_status(&self.backend, status.as_u16(), message, ctx));
        }

        let parsed: DsVisionResponse = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::backend(&self.backend, format!("Invalid JSON: {e}"), false))?;

        let text = parsed
            .output
            .and_then(|o| o.choices)
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .and_then(extract_vision_text)
            .ok_or_else(|| GatewayError::backend(&self.backend, "No extracted text", false))?;

        Ok(ChatOutcome {
            text,
            latency: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_text_from_plain_string() {
        let v = serde_json::json!("the problem text");
        assert_eq!(extract_vision_text(v).as_deref(), Some("the problem text"));
    }

    #[test]
    fn vision_text_from_fragment_list() {
        let v = serde_json::json!([{"text": "extracted"}, {"text": "ignored"}]);
        assert_eq!(extract_vision_text(v).as_deref(), Some("extracted"));
    }

    #[test]
    fn vision_text_missing() {
        let v = serde_json::json!([{"image": "data:..."}]);
        assert_eq!(extract_vision_text(v), None);
    }
}
