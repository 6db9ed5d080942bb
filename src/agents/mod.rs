//! Agent pool: stateless descriptors binding a role, a prompt, and a backend.
//!
//! Agents carry no conversation state. Building an invocation and executing
//! it are separate steps; the registry only produces descriptors, the
//! dispatcher runs them.

pub mod prompts;

use std::fmt;

use crate::classify::TaskCategory;
use crate::config::OrchestratorConfig;
use crate::dispatch::AgentInvocation;
use crate::gateway::{BackendId, ChatOptions, Message};
use crate::retriever::{render_context, Passage};

/// Identifier of an agent within one request, e.g. "expert:zhipu".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an agent does with the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    /// Step-by-step calculation work.
    Tools,
    /// Teacher persona answering with retrieved passages in context.
    Knowledge,
    /// Independent expert consulted in parallel.
    Expert,
    /// Text model answering a question extracted from an image.
    MultimodalText,
}

impl AgentRole {
    /// Whether this role wants retrieved passages injected into its prompt.
    pub fn injects_context(&self) -> bool {
        matches!(self, Self::Knowledge)
    }

    fn system_prompt(&self) -> String {
        let template = match self {
            Self::Tools => &prompts::TOOLS_SYSTEM,
            Self::Knowledge => &prompts::TEACHER_SYSTEM,
            Self::Expert => &prompts::EXPERT_SYSTEM,
            Self::MultimodalText => &prompts::EXPERT_SYSTEM,
        };
        prompts::render_system(template)
    }

    fn user_prompt(&self, question: &str, passages: &[Passage]) -> String {
        match self {
            Self::Knowledge if !passages.is_empty() => prompts::GROUNDED_QUESTION.render(&[
                ("context", &render_context(passages)),
                ("question", question),
            ]),
            Self::MultimodalText => prompts::EXTRACTED_QUESTION.render(&[("question", question)]),
            _ => prompts::PLAIN_QUESTION.render(&[("question", question)]),
        }
    }
}

/// A bound agent: role plus the backend it runs on.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub id: AgentId,
    pub role: AgentRole,
    pub backend: BackendId,
    pub options: ChatOptions,
}

impl AgentSpec {
    /// Build a pending invocation for this agent.
    pub fn build_invocation(&self, question: &str, passages: &[Passage]) -> AgentInvocation {
        let messages = vec![
            Message::system(self.role.system_prompt()),
            Message::user(self.role.user_prompt(question, passages)),
        ];
        let invocation = AgentInvocation::new(
            self.id.clone(),
            self.backend.clone(),
            messages,
            self.options,
        );
        if self.role.injects_context() {
            invocation.with_context(passages.to_vec())
        } else {
            invocation
        }
    }
}

/// The configured agent pool, indexed by task category.
pub struct AgentRegistry {
    tools: AgentSpec,
    knowledge: AgentSpec,
    experts: Vec<AgentSpec>,
    multimodal_text: Vec<AgentSpec>,
    vision_backend: BackendId,
    judge_backend: BackendId,
    judge_options: ChatOptions,
}

impl AgentRegistry {
    /// Assumes the config has already passed validation.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let options_for = |id: &BackendId| -> ChatOptions {
            config
                .backends
                .get(id)
                .map(|b| ChatOptions {
                    temperature: b.temperature,
                    max_tokens: b.max_tokens,
                })
                .unwrap_or_default()
        };

        let spec = |id: String, role: AgentRole, backend: &BackendId| AgentSpec {
            id: AgentId::new(id),
            role,
            backend: backend.clone(),
            options: options_for(backend),
        };

        Self {
            tools: spec("tools_agent".to_string(), AgentRole::Tools, &config.roster.tools),
            knowledge: spec(
                "retriever_agent".to_string(),
                AgentRole::Knowledge,
                &config.roster.retriever,
            ),
            experts: config
                .roster
                .external
                .iter()
                .map(|b| spec(format!("expert:{b}"), AgentRole::Expert, b))
                .collect(),
            multimodal_text: config
                .roster
                .multimodal_text
                .iter()
                .map(|b| spec(format!("mm:{b}"), AgentRole::MultimodalText, b))
                .collect(),
            vision_backend: config.roster.vision.clone(),
            judge_backend: config.roster.judge.clone(),
            judge_options: options_for(&config.roster.judge),
        }
    }

    /// The agents consulted for a category, in roster order.
    pub fn agents_for(&self, category: TaskCategory) -> Vec<AgentSpec> {
        match category {
            TaskCategory::Calculation => vec![self.tools.clone()],
            TaskCategory::RetrievalLookup => vec![self.knowledge.clone()],
            TaskCategory::KnowledgeQa => {
                let mut agents = vec![self.knowledge.clone()];
                agents.extend(self.experts.iter().cloned());
                agents
            }
            TaskCategory::Multimodal => self.multimodal_text.clone(),
        }
    }

    pub fn vision_backend(&self) -> &BackendId {
        &self.vision_backend
    }

    pub fn judge_backend(&self) -> &BackendId {
        &self.judge_backend
    }

    pub fn judge_options(&self) -> ChatOptions {
        self.judge_options
    }
}
