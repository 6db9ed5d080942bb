//! Bridge to the external passage retrieval service.
//!
//! Retrieval is best-effort context enrichment. A failed or slow retrieval
//! call degrades to an empty passage list with a warning; it never fails the
//! request. `top_k` is clamped to the service's supported range.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Supported `top_k` range for the retrieval service.
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 20;

/// A retrieved knowledge-base passage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    /// Source document or collection name.
    pub source: String,
    pub text: String,
    /// Relevance score as reported by the service.
    pub score: f32,
}

/// Result of a retrieval attempt. `degraded` is set when the service failed
/// and the passages were substituted with an empty list.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub passages: Vec<Passage>,
    pub degraded: bool,
}

/// Errors a retrieval transport can report. All of them degrade to an empty
/// outcome at the bridge.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retrieval service error: {0}")]
    Service(String),
}

/// Trait over passage retrieval transports.
#[async_trait]
pub trait PassageSource: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError>;
}

/// Wraps a [`PassageSource`] with clamping and degrade-to-empty semantics.
pub struct RetrieverBridge {
    source: Box<dyn PassageSource>,
    top_k: usize,
}

impl RetrieverBridge {
    pub fn new(source: Box<dyn PassageSource>, top_k: usize) -> Self {
        Self {
            source,
            top_k: top_k.clamp(MIN_TOP_K, MAX_TOP_K),
        }
    }

    /// Fetch passages for `query`. Never fails: service errors produce an
    /// empty, degraded outcome.
    pub async fn retrieve(&self, query: &str) -> RetrievalOutcome {
        match self.source.search(query, self.top_k).await {
            Ok(passages) => RetrievalOutcome {
                passages,
                degraded: false,
            },
            Err(e) => {
                warn!(error = %e, "retrieval degraded, continuing without passages");
                RetrievalOutcome {
                    passages: Vec::new(),
                    degraded: true,
                }
            }
        }
    }
}

/// Render passages as a context block for prompt injection.
pub fn render_context(passages: &[Passage]) -> String {
    let mut block = String::new();
    for (i, p) in passages.iter().enumerate() {
        block.push_str(&format!("[{}] ({})\n{}\n\n", i + 1, p.source, p.text));
    }
    block.trim_end().to_string()
}

// =============================================================================
// TRANSPORTS
// =============================================================================

/// HTTP transport posting `{query, top_k}` to a retrieval endpoint.
pub struct HttpPassageSource {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    passages: Vec<Passage>,
}

impl HttpPassageSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PassageSource for HttpPassageSource {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let response = self
            .client
            .post(&self.url)
            .json(&SearchRequest { query, top_k })
            .send()
            .await?
            .error_for_status()?;

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.passages)
    }
}

/// No-op transport for deployments without a retrieval service.
pub struct NoopPassageSource;

#[async_trait]
impl PassageSource for NoopPassageSource {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        Ok(Vec::new())
    }
}
