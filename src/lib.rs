//! Multi-model orchestration core for a chemistry question-answering
//! assistant.
//!
//! A request flows through four stages:
//!
//! 1. **Classify** ([`classify`]): pure rule-based routing into a task
//!    category (knowledge, calculation, lookup, or multimodal).
//! 2. **Enrich** ([`retriever`]): best-effort passage retrieval for agents
//!    that ground their answers in the knowledge base.
//! 3. **Dispatch** ([`dispatch`]): the category's agents run concurrently
//!    against their backends through the [`gateway`], with per-invocation
//!    retries and an overall deadline. One failure never cancels the rest.
//! 4. **Fuse** ([`fusion`]): surviving candidates are merged by a judge
//!    backend into a single final answer with a comparison rationale.
//!
//! ```no_run
//! use retort::{Orchestrator, OrchestratorConfig, Request};
//!
//! # async fn run(raw_config: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::from_json(raw_config)?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//!
//! let response = orchestrator
//!     .handle(Request::text("Balance: H2 + O2 -> H2O"))
//!     .await?;
//! println!("{}", response.result.final_answer);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod agents;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fusion;
pub mod gateway;
pub mod pipeline;
pub mod request;
pub mod retriever;

pub use classify::TaskCategory;
pub use config::{AgentRoster, BackendConfig, BackendKind, OrchestratorConfig};
pub use dispatch::{AgentInvocation, Dispatcher, InvocationStatus};
pub use error::OrchestratorError;
pub use fusion::{Confidence, FusionEngine, FusionResult, Rationale};
pub use gateway::{BackendId, ChatOptions, GatewayError, Message, ModelGateway};
pub use pipeline::{Orchestrator, Response};
pub use request::{Modality, Request};
pub use retriever::{Passage, RetrieverBridge};
