//! Parallel dispatch of agent invocations.
//!
//! Every invocation runs concurrently and in isolation: one agent's failure
//! never cancels another. Retries happen here, not in the gateway, with
//! exponential backoff and a per-invocation budget. Auth errors are fatal for
//! their backend and never retried. An overall deadline bounds the whole
//! round; anything still pending when it fires is marked timed out. The
//! output is always all-terminal, ordered by arrival.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::agents::AgentId;
use crate::gateway::{BackendId, ChatOptions, GatewayError, Message, ModelGateway};
use crate::retriever::Passage;

/// Lifecycle state of one invocation. Transitions only from `Pending` to a
/// terminal state, exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStatus {
    Pending,
    Success,
    Failed { code: &'static str, message: String },
    TimedOut,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One agent's unit of work: which backend to call, with what messages, and
/// what came of it.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub agent: AgentId,
    pub backend: BackendId,
    pub messages: Vec<Message>,
    /// Passages injected into this agent's prompt, for traceability.
    pub context_passages: Vec<Passage>,
    pub options: ChatOptions,
    pub status: InvocationStatus,
    pub answer: Option<String>,
    pub latency: Option<Duration>,
    /// Outbound calls actually made (1 + retries used). Zero if the overall
    /// deadline fired before completion was observed.
    pub attempts: u32,
}

impl AgentInvocation {
    pub fn new(
        agent: AgentId,
        backend: BackendId,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Self {
        Self {
            agent,
            backend,
            messages,
            context_passages: Vec::new(),
            options,
            status: InvocationStatus::Pending,
            answer: None,
            latency: None,
            attempts: 0,
        }
    }

    pub fn with_context(mut self, passages: Vec<Passage>) -> Self {
        self.context_passages = passages;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    fn complete(&mut self, outcome: TaskOutcome) {
        debug_assert!(!self.status.is_terminal(), "status written twice");
        self.status = outcome.status;
        self.answer = outcome.answer;
        self.latency = outcome.latency;
        self.attempts = outcome.attempts;
    }

    fn mark_timed_out(&mut self) {
        debug_assert!(!self.status.is_terminal(), "status written twice");
        self.status = InvocationStatus::TimedOut;
    }
}

struct TaskOutcome {
    status: InvocationStatus,
    answer: Option<String>,
    latency: Option<Duration>,
    attempts: u32,
}

/// Exponential backoff delay for the nth retry (0-based), capped at 2^5.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.min(5))
}

/// Runs invocation rounds against the gateway.
pub struct Dispatcher {
    gateway: Arc<ModelGateway>,
    max_retries: u32,
    retry_base_delay: Duration,
    per_call_deadline: Duration,
    overall_deadline: Duration,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<ModelGateway>,
        max_retries: u32,
        retry_base_delay: Duration,
        per_call_deadline: Duration,
        overall_deadline: Duration,
    ) -> Self {
        Self {
            gateway,
            max_retries,
            retry_base_delay,
            per_call_deadline,
            overall_deadline,
        }
    }

    /// Run all invocations concurrently. Returns them in arrival order
    /// (completion order, then deadline-expired ones in input order), every
    /// one in a terminal state.
    pub async fn dispatch(&self, invocations: Vec<AgentInvocation>) -> Vec<AgentInvocation> {
        if invocations.is_empty() {
            return Vec::new();
        }

        let concurrency = invocations.len();
        let mut slots: Vec<Option<AgentInvocation>> = Vec::with_capacity(concurrency);

        let tasks = invocations
            .into_iter()
            .enumerate()
            .map(|(idx, invocation)| {
                let gateway = Arc::clone(&self.gateway);
                let backend = invocation.backend.clone();
                let messages = invocation.messages.clone();
                let options = invocation.options;
                let agent = invocation.agent.clone();
                slots.push(Some(invocation));

                let max_retries = self.max_retries;
                let base_delay = self.retry_base_delay;
                let per_call = self.per_call_deadline;

                async move {
                    let outcome = run_with_retries(
                        &gateway, &agent, &backend, &messages, options, max_retries, base_delay,
                        per_call,
                    )
                    .await;
                    (idx, outcome)
                }
            })
            .collect::<Vec<_>>();

        let stream = stream::iter(tasks).buffer_unordered(concurrency);
        tokio::pin!(stream);

        let deadline = tokio::time::sleep(self.overall_deadline);
        tokio::pin!(deadline);

        let mut arrived: Vec<AgentInvocation> = Vec::with_capacity(concurrency);
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some((idx, outcome)) => {
                        if let Some(mut invocation) = slots[idx].take() {
                            invocation.complete(outcome);
                            arrived.push(invocation);
                        }
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("overall deadline elapsed, abandoning in-flight invocations");
                    break;
                }
            }
        }

        for slot in slots {
            if let Some(mut invocation) = slot {
                invocation.mark_timed_out();
                arrived.push(invocation);
            }
        }
        arrived
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_with_retries(
    gateway: &ModelGateway,
    agent: &AgentId,
    backend: &BackendId,
    messages: &[Message],
    options: ChatOptions,
    max_retries: u32,
    base_delay: Duration,
    per_call_deadline: Duration,
) -> TaskOutcome {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match gateway
            .invoke(backend, messages, options, per_call_deadline)
            .await
        {
            Ok(outcome) => {
                debug!(agent = %agent, backend = %backend, attempts, "invocation succeeded");
                return TaskOutcome {
                    status: InvocationStatus::Success,
                    answer: Some(outcome.text),
                    latency: Some(outcome.latency),
                    attempts,
                };
            }
            Err(e) if e.is_retryable() && attempts <= max_retries => {
                let delay = backoff_delay(base_delay, attempts - 1);
                warn!(
                    agent = %agent,
                    backend = %backend,
                    error = %e,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "invocation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(agent = %agent, backend = %backend, error = %e, attempts, "invocation failed");
                let status = match e {
                    GatewayError::Timeout(_) => InvocationStatus::TimedOut,
                    other => InvocationStatus::Failed {
                        code: other.code(),
                        message: other.to_string(),
                    },
                };
                return TaskOutcome {
                    status,
                    answer: None,
                    latency: None,
                    attempts,
                };
            }
        }
    }
}
