//! Answer fusion.
//!
//! With one surviving candidate the answer passes through unchanged, marked
//! as low-diversity. With two or more, a judge backend compares them and
//! writes the final answer. If the judge itself fails, the first-arriving
//! candidate is returned and the rationale marked unavailable; fusion never
//! turns a partial success into a request failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::agents::prompts::{self, render_candidates, JUDGE_SYSTEM, JUDGE_TASK};
use crate::agents::AgentId;
use crate::dispatch::{AgentInvocation, InvocationStatus};
use crate::error::OrchestratorError;
use crate::gateway::{BackendId, ChatOptions, Message, ModelGateway};

/// How the final answer was justified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rationale {
    /// Nothing to compare (single candidate, or judge output without a
    /// comparison section).
    Empty,
    /// The judge's comparison of the candidates.
    Compared(String),
    /// The judge failed; the final answer is an unreviewed candidate.
    Unavailable,
}

/// Confidence marker carried alongside the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Only one model answered; no cross-checking happened.
    SingleCandidate,
    /// The judge compared multiple candidates.
    Fused,
    /// Judge unavailable; first-arriving candidate returned as-is.
    FirstCandidateFallback,
}

/// Per-model record included with every fusion result.
#[derive(Debug, Clone)]
pub struct ModelAnswer {
    pub agent: AgentId,
    pub backend: BackendId,
    pub status: InvocationStatus,
    pub answer: Option<String>,
    pub latency: Option<Duration>,
}

impl From<&AgentInvocation> for ModelAnswer {
    fn from(inv: &AgentInvocation) -> Self {
        Self {
            agent: inv.agent.clone(),
            backend: inv.backend.clone(),
            status: inv.status.clone(),
            answer: inv.answer.clone(),
            latency: inv.latency,
        }
    }
}

/// The orchestrator's final output for one request.
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub final_answer: String,
    pub per_model_answers: Vec<ModelAnswer>,
    pub rationale: Rationale,
    pub confidence: Confidence,
}

/// Fuses dispatched invocations into one answer via a judge backend.
pub struct FusionEngine {
    gateway: Arc<ModelGateway>,
    judge_backend: BackendId,
    judge_options: ChatOptions,
    judge_deadline: Duration,
}

impl FusionEngine {
    pub fn new(
        gateway: Arc<ModelGateway>,
        judge_backend: BackendId,
        judge_options: ChatOptions,
        judge_deadline: Duration,
    ) -> Self {
        Self {
            gateway,
            judge_backend,
            judge_options,
            judge_deadline,
        }
    }

    /// Fuse the results of a dispatch round. `invocations` must be terminal
    /// and in arrival order; the fallback path relies on that ordering.
    pub async fn fuse(
        &self,
        question: &str,
        invocations: &[AgentInvocation],
    ) -> Result<FusionResult, OrchestratorError> {
        let per_model_answers: Vec<ModelAnswer> =
            invocations.iter().map(ModelAnswer::from).collect();

        let candidates: Vec<(&AgentInvocation, &str)> = invocations
            .iter()
            .filter(|i| i.succeeded())
            .filter_map(|i| i.answer.as_deref().map(|a| (i, a)))
            .collect();

        match candidates.len() {
            0 => Err(OrchestratorError::NoAvailableModel),
            1 => Ok(FusionResult {
                final_answer: candidates[0].1.to_string(),
                per_model_answers,
                rationale: Rationale::Empty,
                confidence: Confidence::SingleCandidate,
            }),
            _ => Ok(self.judge(question, &candidates, per_model_answers).await),
        }
    }

    async fn judge(
        &self,
        question: &str,
        candidates: &[(&AgentInvocation, &str)],
        per_model_answers: Vec<ModelAnswer>,
    ) -> FusionResult {
        let labeled: Vec<(String, String)> = candidates
            .iter()
            .map(|(inv, answer)| (inv.backend.to_string(), (*answer).to_string()))
            .collect();

        let messages = vec![
            Message::system(prompts::render_system(&JUDGE_SYSTEM)),
            Message::user(JUDGE_TASK.render(&[
                ("question", question),
                ("candidates", &render_candidates(&labeled)),
            ])),
        ];

        match self
            .gateway
            .invoke(
                &self.judge_backend,
                &messages,
                self.judge_options,
                self.judge_deadline,
            )
            .await
        {
            Ok(outcome) => {
                let (final_answer, comparison) = parse_judge_output(&outcome.text);
                FusionResult {
                    final_answer,
                    per_model_answers,
                    rationale: comparison.map_or(Rationale::Empty, Rationale::Compared),
                    confidence: Confidence::Fused,
                }
            }
            Err(e) => {
                warn!(
                    backend = %self.judge_backend,
                    error = %e,
                    "judge unavailable, falling back to first-arriving candidate"
                );
                FusionResult {
                    final_answer: candidates[0].1.to_string(),
                    per_model_answers,
                    rationale: Rationale::Unavailable,
                    confidence: Confidence::FirstCandidateFallback,
                }
            }
        }
    }
}

/// Split judge output into (final answer, comparison). A judge that ignores
/// the section contract yields its whole output as the final answer.
fn parse_judge_output(text: &str) -> (String, Option<String>) {
    if let Some(idx) = text.find("FINAL ANSWER:") {
        let final_answer = text[idx + "FINAL ANSWER:".len()..].trim().to_string();
        let before = &text[..idx];
        let comparison = before
            .find("COMPARISON:")
            .map(|c| before[c + "COMPARISON:".len()..].trim().to_string())
            .filter(|s| !s.is_empty());
        if !final_answer.is_empty() {
            return (final_answer, comparison);
        }
    }
    (text.trim().to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatBackend, ChatOutcome, GatewayError};
    use async_trait::async_trait;

    struct FixedJudge(&'static str);

    #[async_trait]
    impl ChatBackend for FixedJudge {
        fn name(&self) -> &str {
            "judge"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _options: ChatOptions,
        ) -> Result<ChatOutcome, GatewayError> {
            Ok(ChatOutcome {
                text: self.0.to_string(),
                latency: Duration::from_millis(3),
            })
        }
    }

    struct BrokenJudge;

    #[async_trait]
    impl ChatBackend for BrokenJudge {
        fn name(&self) -> &str {
            "judge"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _options: ChatOptions,
        ) -> Result<ChatOutcome, GatewayError> {
            Err(GatewayError::auth("judge", "revoked key"))
        }
    }

    fn engine(judge: Arc<dyn ChatBackend>) -> FusionEngine {
        let mut gateway = ModelGateway::new();
        gateway.register_chat(BackendId::new("judge"), judge);
        FusionEngine::new(
            Arc::new(gateway),
            BackendId::new("judge"),
            ChatOptions::default(),
            Duration::from_secs(5),
        )
    }

    fn success(agent: &str, backend: &str, answer: &str) -> AgentInvocation {
        let mut inv = AgentInvocation::new(
            AgentId::new(agent),
            BackendId::new(backend),
            vec![Message::user("q")],
            ChatOptions::default(),
        );
        inv.status = InvocationStatus::Success;
        inv.answer = Some(answer.to_string());
        inv.attempts = 1;
        inv
    }

    fn timed_out(agent: &str, backend: &str) -> AgentInvocation {
        let mut inv = AgentInvocation::new(
            AgentId::new(agent),
            BackendId::new(backend),
            vec![Message::user("q")],
            ChatOptions::default(),
        );
        inv.status = InvocationStatus::TimedOut;
        inv
    }

    #[tokio::test]
    async fn no_candidates_is_no_available_model() {
        let engine = engine(Arc::new(FixedJudge("unused")));
        let err = engine
            .fuse("q", &[timed_out("a", "x"), timed_out("b", "y")])
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoAvailableModel));
    }

    #[tokio::test]
    async fn single_candidate_passes_through() {
        let engine = engine(Arc::new(FixedJudge("unused")));
        let result = engine
            .fuse("q", &[success("a", "zhipu", "the answer"), timed_out("b", "y")])
            .await
            .unwrap();
        assert_eq!(result.final_answer, "the answer");
        assert_eq!(result.confidence, Confidence::SingleCandidate);
        assert_eq!(result.rationale, Rationale::Empty);
        assert_eq!(result.per_model_answers.len(), 2);
    }

    #[tokio::test]
    async fn judge_fuses_multiple_candidates() {
        let engine = engine(Arc::new(FixedJudge(
            "COMPARISON:\nA is rigorous, B skips a step.\n\nFINAL ANSWER:\nfused answer",
        )));
        let result = engine
            .fuse("q", &[success("a", "zhipu", "one"), success("b", "deepseek", "two")])
            .await
            .unwrap();
        assert_eq!(result.final_answer, "fused answer");
        assert_eq!(result.confidence, Confidence::Fused);
        assert_eq!(
            result.rationale,
            Rationale::Compared("A is rigorous, B skips a step.".to_string())
        );
    }

    #[tokio::test]
    async fn judge_failure_falls_back_to_first_arrival() {
        let engine = engine(Arc::new(BrokenJudge));
        let result = engine
            .fuse(
                "q",
                &[
                    success("a", "zhipu", "first arrived"),
                    success("b", "deepseek", "second"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.final_answer, "first arrived");
        assert_eq!(result.confidence, Confidence::FirstCandidateFallback);
        assert_eq!(result.rationale, Rationale::Unavailable);
    }

    #[test]
    fn unstructured_judge_output_is_taken_whole() {
        let (final_answer, comparison) = parse_judge_output("just an answer, no sections");
        assert_eq!(final_answer, "just an answer, no sections");
        assert!(comparison.is_none());
    }
}
