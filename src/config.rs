//! Orchestrator configuration.
//!
//! Deserialized from JSON (or built in code for tests), then validated before
//! the pipeline is constructed. Validation failures are reported up front so a
//! misconfigured roster never reaches dispatch.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::gateway::BackendId;

/// Default retry budget per invocation (attempts = 1 + retries).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay for exponential backoff between retries.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Default hard deadline for a single backend call.
pub const DEFAULT_PER_CALL_DEADLINE_MS: u64 = 30_000;

/// Default overall deadline for a dispatch round.
pub const DEFAULT_OVERALL_DEADLINE_MS: u64 = 90_000;

/// Default number of passages requested from the retrieval service.
pub const DEFAULT_TOP_K: usize = 3;

/// Wire protocol spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// OpenAI-style `/chat/completions` (Zhipu, OpenAI, SiliconFlow).
    #[serde(rename = "openai_compat")]
    OpenAiCompat,
    /// DashScope text-generation envelope (Qwen, DeepSeek).
    #[serde(rename = "dashscope")]
    DashScope,
    /// DashScope multimodal endpoint (Qwen-VL).
    #[serde(rename = "dashscope_vision")]
    DashScopeVision,
}

/// Connection settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> Option<u32> {
    Some(2000)
}

/// Which backend each agent role runs on.
///
/// `external` and `multimodal_text` are rosters; the rest are single
/// assignments. The same backend id may serve several roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRoster {
    /// Calculation agent (stoichiometry, balancing, numeric work).
    pub tools: BackendId,
    /// Knowledge agent answering with retrieved passages in context.
    pub retriever: BackendId,
    /// Independent expert backends consulted in parallel. At least one.
    pub external: Vec<BackendId>,
    /// Text backends that answer an extracted image question. At least two.
    pub multimodal_text: Vec<BackendId>,
    /// Vision backend for question extraction from images.
    pub vision: BackendId,
    /// Backend used by the fusion judge.
    pub judge: BackendId,
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub backends: HashMap<BackendId, BackendConfig>,
    pub roster: AgentRoster,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_per_call_deadline_ms")]
    pub per_call_deadline_ms: u64,
    #[serde(default = "default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,

    /// Retrieval endpoint, if a passage service is deployed.
    #[serde(default)]
    pub retrieval_url: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_per_call_deadline_ms() -> u64 {
    DEFAULT_PER_CALL_DEADLINE_MS
}

fn default_overall_deadline_ms() -> u64 {
    DEFAULT_OVERALL_DEADLINE_MS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl OrchestratorConfig {
    pub fn from_json(raw: &str) -> Result<Self, OrchestratorError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| OrchestratorError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every roster assignment points at a configured backend of
    /// the right kind and that roster minimums hold.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.backends.is_empty() {
            return Err(OrchestratorError::Config(
                "no backends configured".to_string(),
            ));
        }
        if self.roster.external.is_empty() {
            return Err(OrchestratorError::Config(
                "roster.external must name at least one backend".to_string(),
            ));
        }
        if self.roster.multimodal_text.len() < 2 {
            return Err(OrchestratorError::Config(
                "roster.multimodal_text must name at least two backends".to_string(),
            ));
        }
        if self.max_retries > 10 {
            return Err(OrchestratorError::Config(format!(
                "max_retries {} exceeds limit of 10",
                self.max_retries
            )));
        }
        if self.per_call_deadline_ms == 0 || self.overall_deadline_ms == 0 {
            return Err(OrchestratorError::Config(
                "deadlines must be nonzero".to_string(),
            ));
        }

        let chat_roles = [
            ("tools", &self.roster.tools),
            ("retriever", &self.roster.retriever),
            ("judge", &self.roster.judge),
        ];
        for (role, id) in chat_roles {
            self.check_chat_backend(role, id)?;
        }
        for id in &self.roster.external {
            self.check_chat_backend("external", id)?;
        }
        for id in &self.roster.multimodal_text {
            self.check_chat_backend("multimodal_text", id)?;
        }

        match self.backends.get(&self.roster.vision) {
            None => {
                return Err(OrchestratorError::Config(format!(
                    "roster.vision names unconfigured backend '{}'",
                    self.roster.vision
                )))
            }
            Some(cfg) if cfg.kind != BackendKind::DashScopeVision => {
                return Err(OrchestratorError::Config(format!(
                    "roster.vision backend '{}' is not a vision backend",
                    self.roster.vision
                )))
            }
            Some(_) => {}
        }

        Ok(())
    }

    fn check_chat_backend(&self, role: &str, id: &BackendId) -> Result<(), OrchestratorError> {
        match self.backends.get(id) {
            None => Err(OrchestratorError::Config(format!(
                "roster.{role} names unconfigured backend '{id}'"
            ))),
            Some(cfg) if cfg.kind == BackendKind::DashScopeVision => {
                Err(OrchestratorError::Config(format!(
                    "roster.{role} backend '{id}' is vision-only"
                )))
            }
            Some(_) => Ok(()),
        }
    }

    pub fn per_call_deadline(&self) -> Duration {
        Duration::from_millis(self.per_call_deadline_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(kind: BackendKind) -> BackendConfig {
        BackendConfig {
            kind,
            api_key: "test-key".to_string(),
            base_url: "http://localhost:9000".to_string(),
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: Some(2000),
        }
    }

    fn valid_config() -> OrchestratorConfig {
        let mut backends = HashMap::new();
        backends.insert(BackendId::new("tongyi"), backend(BackendKind::DashScope));
        backends.insert(BackendId::new("zhipu"), backend(BackendKind::OpenAiCompat));
        backends.insert(
            BackendId::new("deepseek"),
            backend(BackendKind::OpenAiCompat),
        );
        backends.insert(
            BackendId::new("qwen-vl"),
            backend(BackendKind::DashScopeVision),
        );
        OrchestratorConfig {
            backends,
            roster: AgentRoster {
                tools: BackendId::new("tongyi"),
                retriever: BackendId::new("tongyi"),
                external: vec![BackendId::new("zhipu"), BackendId::new("deepseek")],
                multimodal_text: vec![BackendId::new("zhipu"), BackendId::new("deepseek")],
                vision: BackendId::new("qwen-vl"),
                judge: BackendId::new("deepseek"),
            },
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            per_call_deadline_ms: DEFAULT_PER_CALL_DEADLINE_MS,
            overall_deadline_ms: DEFAULT_OVERALL_DEADLINE_MS,
            retrieval_url: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn unknown_roster_backend_rejected() {
        let mut config = valid_config();
        config.roster.judge = BackendId::new("ghost");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn single_multimodal_text_backend_rejected() {
        let mut config = valid_config();
        config.roster.multimodal_text = vec![BackendId::new("zhipu")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn vision_backend_cannot_serve_chat_role() {
        let mut config = valid_config();
        config.roster.tools = BackendId::new("qwen-vl");
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_external_roster_rejected() {
        let mut config = valid_config();
        config.roster.external.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_apply_when_fields_omitted() {
        let raw = serde_json::json!({
            "backends": {
                "tongyi": {
                    "kind": "dashscope",
                    "api_key": "k",
                    "base_url": "http://localhost:9000",
                    "model": "qwen-plus"
                },
                "zhipu": {
                    "kind": "openai_compat",
                    "api_key": "k",
                    "base_url": "http://localhost:9001",
                    "model": "glm-4"
                },
                "qwen-vl": {
                    "kind": "dashscope_vision",
                    "api_key": "k",
                    "base_url": "http://localhost:9000",
                    "model": "qwen-vl-plus"
                }
            },
            "roster": {
                "tools": "tongyi",
                "retriever": "tongyi",
                "external": ["zhipu"],
                "multimodal_text": ["tongyi", "zhipu"],
                "vision": "qwen-vl",
                "judge": "zhipu"
            }
        })
        .to_string();

        let config = OrchestratorConfig::from_json(&raw).unwrap();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.per_call_deadline(), Duration::from_secs(30));
    }
}
