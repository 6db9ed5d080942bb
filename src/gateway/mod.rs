//! Model gateway: uniform interface over heterogeneous chat and vision backends.
//!
//! Each backend is an adapter owning its own `reqwest::Client` (one connection
//! pool per backend, shared across concurrent invocations). The gateway makes
//! exactly one outbound call per invoke and enforces a hard deadline; retry
//! policy belongs to the dispatcher.

pub mod dashscope;
pub mod error;
pub mod openai_compat;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

pub use dashscope::{DashScopeAdapter, DashScopeVisionAdapter};
pub use error::{ErrorContext, GatewayError};
pub use openai_compat::OpenAiCompatAdapter;
pub use types::{BackendId, ChatOptions, ChatOutcome, Message, Role};

/// Maximum allowed response body size (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Stream a response body, enforcing [`MAX_RESPONSE_LEN`] as it arrives.
/// Oversized bodies fail with a non-retryable backend error before they are
/// buffered in full.
pub(crate) async fn read_capped_body(
    backend: &str,
    mut response: reqwest::Response,
) -> Result<String, GatewayError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(GatewayError::backend(
                backend,
                format!("Response too large: {new_len} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Trait for chat completion backends.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<ChatOutcome, GatewayError>;
}

/// Trait for vision backends that extract problem text from images.
#[async_trait::async_trait]
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        image_bytes: &[u8],
        hint: Option<&str>,
        options: ChatOptions,
    ) -> Result<ChatOutcome, GatewayError>;
}

/// Registry of configured backends.
#[derive(Default)]
pub struct ModelGateway {
    chat: HashMap<BackendId, Arc<dyn ChatBackend>>,
    vision: HashMap<BackendId, Arc<dyn VisionBackend>>,
}

impl ModelGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_chat(&mut self, id: BackendId, backend: Arc<dyn ChatBackend>) {
        self.chat.insert(id, backend);
    }

    pub fn register_vision(&mut self, id: BackendId, backend: Arc<dyn VisionBackend>) {
        self.vision.insert(id, backend);
    }

    pub fn has_chat(&self, id: &BackendId) -> bool {
        self.chat.contains_key(id)
    }

    pub fn has_vision(&self, id: &BackendId) -> bool {
        self.vision.contains_key(id)
    }

    /// Invoke a chat backend. One outbound call; if the backend has not
    /// responded when `deadline` elapses, the call is abandoned and
    /// [`GatewayError::Timeout`] returned.
    pub async fn invoke(
        &self,
        backend_id: &BackendId,
        messages: &[Message],
        options: ChatOptions,
        deadline: Duration,
    ) -> Result<ChatOutcome, GatewayError> {
        let backend = self
            .chat
            .get(backend_id)
            .ok_or_else(|| GatewayError::UnknownBackend(backend_id.to_string()))?;

        match timeout(deadline, backend.chat(messages, options)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(deadline)),
        }
    }

    /// Invoke a vision backend to extract problem text from an image.
    /// Same deadline semantics and failure taxonomy as [`Self::invoke`].
    pub async fn invoke_vision(
        &self,
        backend_id: &BackendId,
        image_bytes: &[u8],
        hint: Option<&str>,
        deadline: Duration,
    ) -> Result<ChatOutcome, GatewayError> {
        let backend = self
            .vision
            .get(backend_id)
            .ok_or_else(|| GatewayError::UnknownBackend(backend_id.to_string()))?;

        let options = ChatOptions::default().temperature(0.1);
        match timeout(deadline, backend.extract(image_bytes, hint, options)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowBackend;

    #[async_trait::async_trait]
    impl ChatBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _options: ChatOptions,
        ) -> Result<ChatOutcome, GatewayError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("deadline fires first")
        }
    }

    #[tokio::test]
    async fn unknown_backend_is_reported() {
        let gateway = ModelGateway::new();
        let err = gateway
            .invoke(
                &BackendId::new("ghost"),
                &[Message::user("hi")],
                ChatOptions::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownBackend(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_converts_to_timeout() {
        let mut gateway = ModelGateway::new();
        gateway.register_chat(BackendId::new("slow"), Arc::new(SlowBackend));

        let err = gateway
            .invoke(
                &BackendId::new("slow"),
                &[Message::user("hi")],
                ChatOptions::default(),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
    }
}
