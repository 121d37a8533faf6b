//! Analysis Agents
//!
//! Each agent builds its prompt, routes one request through the [`Router`],
//! and turns the answer into a typed result. Agents never talk to a backend
//! directly and never parse JSON on their own; both go through `ai`.
//!
//! | Agent | Task | On failure |
//! |-------|------|------------|
//! | [`TechnicalAnalyst`] | `tech` | neutral view flagged `LLM_ERROR`; caller fails the run |
//! | [`NewsAnalyst`] | `news` | neutral "Failed to parse LLM output" view |
//! | [`Synthesizer`] | `synthesis` | strict-JSON re-ask, then the deterministic [`Decision`]; routing error otherwise |
//! | [`Verifier`] | `verifier` | failed report (`invalid_json`, `verifier_error`) |

mod decision;
mod news;
pub mod prompt;
mod safety;
mod synthesis;
mod technical;
mod verifier;

pub use decision::{Decision, DecisionPolicy, DecisionScores, ReasonCode};
pub use news::NewsAnalyst;
pub use prompt::{PromptBuilder, PromptTemplates};
pub use safety::{SafetyPolicy, SafetyVerdict};
pub use synthesis::{RepairContext, SynthesisInput, Synthesizer, SynthesizerConfig};
pub use technical::TechnicalAnalyst;
pub use verifier::Verifier;

use std::sync::Arc;

use crate::ai::{Branch, LlmExchange, Router};

/// Router handle plus the branch every agent call is routed on
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub router: Arc<Router>,
    pub branch: Branch,
}

impl AgentContext {
    pub fn new(router: Arc<Router>, branch: Branch) -> Self {
        Self { router, branch }
    }
}

/// Typed agent output plus the exchange that produced it
///
/// `exchange` is `None` when the agent answered without calling a model.
#[derive(Debug, Clone)]
pub struct AgentRun<T> {
    pub output: T,
    pub exchange: Option<LlmExchange>,
    /// Follow-up calls asking the model to fix its own malformed output
    pub corrections: Vec<LlmExchange>,
}

impl<T> AgentRun<T> {
    pub fn offline(output: T) -> Self {
        Self {
            output,
            exchange: None,
            corrections: Vec::new(),
        }
    }

    pub fn routed(output: T, exchange: LlmExchange) -> Self {
        Self {
            output,
            exchange: Some(exchange),
            corrections: Vec::new(),
        }
    }

    pub fn with_corrections(mut self, corrections: Vec<LlmExchange>) -> Self {
        self.corrections = corrections;
        self
    }

    /// Exchange whose text the output was read from
    pub fn last_exchange(&self) -> Option<&LlmExchange> {
        self.corrections.last().or(self.exchange.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ai::router::tests::{MockBackend, Script};
    use crate::ai::{BackendRegistry, HealthCache, RouteCandidate, RouterConfig, Task, TaskRouting};
    use crate::types::FailureKind;

    fn router_for(backend: Arc<MockBackend>) -> Arc<Router> {
        let mut routing = TaskRouting::new(RouteCandidate::new("mock", "last"));
        for task in Task::ALL {
            routing = routing
                .with_route(task, Branch::Local, vec![RouteCandidate::new("mock", "m")])
                .unwrap();
        }
        Arc::new(
            Router::new(
                routing,
                BackendRegistry::new().with(backend),
                Arc::new(HealthCache::default()),
                RouterConfig::default(),
            )
            .unwrap(),
        )
    }

    /// Context whose only backend answers with `replies` in order
    pub(crate) fn context(replies: &[&str]) -> (AgentContext, Arc<MockBackend>) {
        let backend = MockBackend::new(
            "mock",
            replies.iter().map(|r| Script::Reply(r.to_string())).collect(),
        );
        let ctx = AgentContext::new(router_for(backend.clone()), Branch::Local);
        (ctx, backend)
    }

    /// Context where every call is rejected
    pub(crate) fn failing_context() -> AgentContext {
        AgentContext::new(
            router_for(MockBackend::failing("mock", FailureKind::Rejected)),
            Branch::Local,
        )
    }
}
