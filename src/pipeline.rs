//! Request pipeline: classify, enrich, dispatch, fuse.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::agents::AgentRegistry;
use crate::classify::{classify, TaskCategory};
use crate::config::{BackendKind, OrchestratorConfig};
use crate::dispatch::Dispatcher;
use crate::error::OrchestratorError;
use crate::fusion::{FusionEngine, FusionResult};
use crate::gateway::{
    DashScopeAdapter, DashScopeVisionAdapter, ModelGateway, OpenAiCompatAdapter,
};
use crate::request::{Modality, Request};
use crate::retriever::{HttpPassageSource, NoopPassageSource, PassageSource, RetrieverBridge};

/// The orchestrator's answer to one request.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: uuid::Uuid,
    pub category: TaskCategory,
    /// Set when the retrieval service failed and the answer was produced
    /// without knowledge-base context.
    pub retrieval_degraded: bool,
    pub result: FusionResult,
}

/// Top-level entry point. Owns the gateway, agent registry, retriever
/// bridge, dispatcher, and fusion engine for the lifetime of the process.
pub struct Orchestrator {
    gateway: Arc<ModelGateway>,
    registry: AgentRegistry,
    retriever: RetrieverBridge,
    dispatcher: Dispatcher,
    fusion: FusionEngine,
    per_call_deadline: Duration,
}

impl Orchestrator {
    /// Build every backend adapter and wire the pipeline from a validated
    /// configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let mut gateway = ModelGateway::new();
        for (id, backend) in &config.backends {
            match backend.kind {
                BackendKind::OpenAiCompat => {
                    let adapter = OpenAiCompatAdapter::new(
                        id.as_str(),
                        &backend.api_key,
                        &backend.base_url,
                        &backend.model,
                        config.per_call_deadline(),
                    )
                    .map_err(|e| OrchestratorError::Config(e.to_string()))?;
                    gateway.register_chat(id.clone(), Arc::new(adapter));
                }
                BackendKind::DashScope => {
                    let adapter = DashScopeAdapter::new(
                        id.as_str(),
                        &backend.api_key,
                        &backend.base_url,
                        &backend.model,
                        config.per_call_deadline(),
                    )
                    .map_err(|e| OrchestratorError::Config(e.to_string()))?;
                    gateway.register_chat(id.clone(), Arc::new(adapter));
                }
                BackendKind::DashScopeVision => {
                    let adapter = DashScopeVisionAdapter::new(
                        id.as_str(),
                        &backend.api_key,
                        &backend.base_url,
                        &backend.model,
                        config.per_call_deadline(),
                    )
                    .map_err(|e| OrchestratorError::Config(e.to_string()))?;
                    gateway.register_vision(id.clone(), Arc::new(adapter));
                }
            }
        }

        let source: Box<dyn PassageSource> = match &config.retrieval_url {
            Some(url) => Box::new(
                HttpPassageSource::new(url, config.per_call_deadline())
                    .map_err(|e| OrchestratorError::Config(e.to_string()))?,
            ),
            None => Box::new(NoopPassageSource),
        };

        Self::assemble(Arc::new(gateway), config, source)
    }

    /// Wire the pipeline around an existing gateway and passage source.
    /// Fails if the roster names a backend the gateway does not have.
    pub fn assemble(
        gateway: Arc<ModelGateway>,
        config: &OrchestratorConfig,
        source: Box<dyn PassageSource>,
    ) -> Result<Self, OrchestratorError> {
        let chat_roster = [
            &config.roster.tools,
            &config.roster.retriever,
            &config.roster.judge,
        ]
        .into_iter()
        .chain(&config.roster.external)
        .chain(&config.roster.multimodal_text);
        for id in chat_roster {
            if !gateway.has_chat(id) {
                return Err(OrchestratorError::Config(format!(
                    "roster names chat backend '{id}' that is not registered with the gateway"
                )));
            }
        }
        if !gateway.has_vision(&config.roster.vision) {
            return Err(OrchestratorError::Config(format!(
                "roster names vision backend '{}' that is not registered with the gateway",
                config.roster.vision
            )));
        }

        let registry = AgentRegistry::from_config(config);
        let dispatcher = Dispatcher::new(
            Arc::clone(&gateway),
            config.max_retries,
            config.retry_base_delay(),
            config.per_call_deadline(),
            config.overall_deadline(),
        );
        let fusion = FusionEngine::new(
            Arc::clone(&gateway),
            registry.judge_backend().clone(),
            registry.judge_options(),
            config.per_call_deadline(),
        );
        Ok(Self {
            gateway,
            registry,
            retriever: RetrieverBridge::new(source, config.top_k),
            dispatcher,
            fusion,
            per_call_deadline: config.per_call_deadline(),
        })
    }

    /// Answer one request end to end.
    pub async fn handle(&self, request: Request) -> Result<Response, OrchestratorError> {
        let category = classify(&request)?;
        info!(request_id = %request.id, ?category, "request classified");

        let question = match category {
            TaskCategory::Multimodal => self.extract_question(&request).await?,
            _ => request.raw_content.trim().to_string(),
        };

        let agents = self.registry.agents_for(category);

        let wants_context = agents.iter().any(|a| a.role.injects_context());
        let (passages, retrieval_degraded) = if wants_context {
            let outcome = self.retriever.retrieve(&question).await;
            (outcome.passages, outcome.degraded)
        } else {
            (Vec::new(), false)
        };

        let invocations = agents
            .iter()
            .map(|a| a.build_invocation(&question, &passages))
            .collect();

        let dispatched = self.dispatcher.dispatch(invocations).await;
        let result = self.fusion.fuse(&question, &dispatched).await?;

        info!(
            request_id = %request.id,
            candidates = result.per_model_answers.len(),
            ?result.confidence,
            "request fused"
        );

        Ok(Response {
            request_id: request.id,
            category,
            retrieval_degraded,
            result,
        })
    }

    /// Vision pre-pass: turn an image request into question text. Falls
    /// back to the caption if extraction fails and a caption exists.
    async fn extract_question(&self, request: &Request) -> Result<String, OrchestratorError> {
        debug_assert_eq!(request.modality, Modality::Image);
        let bytes = request
            .image_bytes
            .as_deref()
            .ok_or_else(|| OrchestratorError::invalid_request("image request without bytes"))?;

        let caption = request.raw_content.trim();
        let hint = (!caption.is_empty()).then_some(caption);

        match self
            .gateway
            .invoke_vision(
                self.registry.vision_backend(),
                bytes,
                hint,
                self.per_call_deadline,
            )
            .await
        {
            Ok(outcome) => Ok(outcome.text),
            Err(e) if !caption.is_empty() => {
                warn!(error = %e, "vision extraction failed, answering from caption");
                Ok(caption.to_string())
            }
            Err(e) => {
                warn!(error = %e, "vision extraction failed with no caption to fall back on");
                Err(OrchestratorError::NoAvailableModel)
            }
        }
    }
}
