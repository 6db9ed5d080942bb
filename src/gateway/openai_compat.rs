//! OpenAI-compatible chat adapter.
//!
//! Covers every provider that speaks the `/chat/completions` wire shape:
//! Zhipu GLM, OpenAI, and SiliconFlow-hosted models.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, GatewayError};
use super::types::{ChatOptions, ChatOutcome, Message, Role};
use super::ChatBackend;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

/// Adapter for OpenAI-compatible chat completion endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    backend: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatAdapter {
    /// Create with explicit configuration. `timeout` is a transport-level
    /// ceiling; the per-call deadline is enforced by the gateway.
    pub fn new(
        backend: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| GatewayError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            backend: backend.into(),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for ApiMessage {
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
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

// =============================================================================
// CHAT BACKEND IMPL
// =============================================================================

#[async_trait]
impl ChatBackend for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.backend
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<ChatOutcome, GatewayError> {
        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        if total_chars > MAX_INPUT_CHARS {
            return Err(GatewayError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let api_messages: Vec<ApiMessage> = messages.iter().map(ApiMessage::from).collect();
        let api_req = ChatApiRequest {
            model: &self.model,
            messages: &api_messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = super::read_capped_body(&self.backend, response).await?;

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let (message, ctx) = match serde_json::from_str::<ChatApiResponse>(&body) {
                Ok(ChatApiResponse {
                    error: Some(error), ..
                }) => {
                    let ctx = if let Some(code) = error.code {
                        ctx.with_code(code)
                    } else {
                        ctx
                    };
                    (error.message.unwrap_or_default(), ctx)
                }
                _ => (format!("HTTP {}", status.as_u16()), ctx),
            };

            return Err(match status.as_u16() {
                401 | 403 => GatewayError::auth_with_context(&self.backend, message, ctx),
                429 => GatewayError::backend_with_context(&self.backend, message, true, ctx),
                s => GatewayError::backend_with_context(&self.backend, message, s >= 500, ctx),
            });
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::backend(&self.backend, format!("Invalid JSON: {e}"), false))?;

        if let Some(error) = parsed.error {
            return Err(GatewayError::backend(
                &self.backend,
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let text = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| {
                GatewayError::backend(&self.backend, "No choices in response", false)
            })?;

        Ok(ChatOutcome {
            text,
            latency: start.elapsed(),
        })
    }
}
