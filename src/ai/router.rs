//! Task Router
//!
//! Drives the ordered try/fallback loop for one LLM call.
//!
//! ## Strategy (sequential mode)
//!
//! 1. Resolve explicit candidates for `(task, branch)` in configured order
//! 2. Skip a candidate the health cache marks unavailable (counted as skipped)
//! 3. Call the backend under its resolved deadline (counted as an attempt)
//! 4. Validate the answer against the request's expected format; an invalid
//!    answer may be retried on the same candidate a bounded number of times
//! 5. On success, record the backend as available and return immediately
//! 6. On transport failure (timeout, connection), record it as unavailable
//! 7. After the explicit list, try the last resort exactly once, bypassing
//!    the health cache
//!
//! `route` never returns `Err`: backend failures end up in
//! [`LlmResponse::error`]. A malformed routing table is rejected when the
//! router is built.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::backend::{BackendRegistry, BackendRequest};
use super::health::HealthCache;
use super::routing::{Branch, RouteCandidate, Task, TaskRouting, TemperaturePolicy, TimeoutPolicy};
use super::timeout::with_deadline;
use super::validation::ExpectedFormat;
use crate::constants::router as router_constants;
use crate::types::{BackendFailure, FailureKind, FxError, Result, RouteError};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// Explicit candidates in order, then the last resort
    #[default]
    Sequential,
    /// Primary candidate only; no fallback, no last resort
    Strict,
}

impl std::fmt::Display for RouterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// Router behavior, passed in explicitly at construction
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mode: RouterMode,
    /// Extra attempts on the same candidate after an invalid answer
    pub invalid_response_retries: u8,
    pub timeouts: TimeoutPolicy,
    pub temperatures: TemperaturePolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::Sequential,
            invalid_response_retries: router_constants::DEFAULT_INVALID_RESPONSE_RETRIES,
            timeouts: TimeoutPolicy::default(),
            temperatures: TemperaturePolicy::default(),
        }
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// One LLM call as built by an agent; immutable once handed to the router
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmRequest {
    pub task: Task,
    pub system_prompt: String,
    pub user_content: String,
    pub temperature: f32,
    /// Task-level deadline; backend-specific overrides take precedence
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    pub timeout: Duration,
    pub format: ExpectedFormat,
}

/// What happened to one candidate during a `route` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Skipped,
    Failed(FailureKind),
}

/// One line of the routing trail, kept for logs and artifacts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub backend: String,
    pub model: String,
    pub outcome: AttemptOutcome,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub last_resort: bool,
}

/// Audit record of one routing decision
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub task: Task,
    pub text: String,
    /// Parsed JSON object when the request asked for one
    pub json: Option<Value>,
    /// Backend that produced the returned text (last tried on failure)
    pub backend: String,
    pub model: String,
    pub latency: Duration,
    /// Backend invocations, including same-candidate retries
    pub attempts: u32,
    /// Candidates skipped because the health cache marked them unavailable
    pub skipped: u32,
    pub error: Option<RouteError>,
    pub trail: Vec<AttemptRecord>,
}

impl LlmResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn served_by(&self) -> RouteCandidate {
        RouteCandidate::new(&self.backend, &self.model)
    }

    /// Parsed JSON, or the routing error that prevented it
    pub fn json_or_error(&self) -> std::result::Result<&Value, String> {
        if let Some(err) = &self.error {
            return Err(err.to_string());
        }
        self.json
            .as_ref()
            .ok_or_else(|| "Response carries no JSON payload".to_string())
    }
}

/// A request together with the response the router returned for it
#[derive(Debug, Clone, PartialEq)]
pub struct LlmExchange {
    pub request: LlmRequest,
    pub response: LlmResponse,
}

impl LlmExchange {
    pub fn raw_text(&self) -> &str {
        &self.response.text
    }

    pub fn error(&self) -> Option<&RouteError> {
        self.response.error.as_ref()
    }
}

fn serialize_millis<S: serde::Serializer>(
    d: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

// =============================================================================
// Router
// =============================================================================

/// Resolves candidates and drives the fallback loop
pub struct Router {
    routing: TaskRouting,
    registry: BackendRegistry,
    health: Arc<HealthCache>,
    config: RouterConfig,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("mode", &self.config.mode)
            .field("backends", &self.registry.names())
            .field("last_resort", self.routing.last_resort())
            .finish()
    }
}

/// Mutable bookkeeping for one `route` call
struct RouteState {
    started: Instant,
    attempts: u32,
    skipped: u32,
    trail: Vec<AttemptRecord>,
    last_failure: Option<BackendFailure>,
    /// Raw text of the last answer rejected by format validation
    last_text: String,
}

impl RouteState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            attempts: 0,
            skipped: 0,
            trail: Vec::new(),
            last_failure: None,
            last_text: String::new(),
        }
    }

    fn push(&mut self, candidate: &RouteCandidate, outcome: AttemptOutcome, elapsed: Duration, last_resort: bool) {
        self.trail.push(AttemptRecord {
            backend: candidate.backend.clone(),
            model: candidate.model.clone(),
            outcome,
            elapsed,
            last_resort,
        });
    }
}

impl Router {
    /// Build a router, rejecting tables that name unregistered backends
    pub fn new(
        routing: TaskRouting,
        registry: BackendRegistry,
        health: Arc<HealthCache>,
        config: RouterConfig,
    ) -> Result<Self> {
        let unknown: Vec<&str> = routing
            .referenced_backends()
            .into_iter()
            .filter(|name| !registry.contains(name))
            .collect();

        if !unknown.is_empty() {
            return Err(FxError::Config(format!(
                "Routing references unknown or disabled backend(s): {} (registered: {})",
                unknown.join(", "),
                registry.names().join(", ")
            )));
        }

        Ok(Self {
            routing,
            registry,
            health,
            config,
        })
    }

    pub fn routing(&self) -> &TaskRouting {
        &self.routing
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Build a request with this router's task temperature and timeout
    pub fn prepare(
        &self,
        task: Task,
        system_prompt: impl Into<String>,
        user_content: impl Into<String>,
        format: ExpectedFormat,
    ) -> LlmRequest {
        LlmRequest {
            task,
            system_prompt: system_prompt.into(),
            user_content: user_content.into(),
            temperature: self.config.temperatures.resolve(task),
            timeout: self.config.timeouts.task_default(task),
            format,
        }
    }

    /// Route a request and keep it alongside its response
    pub async fn exchange(&self, branch: Branch, request: LlmRequest) -> LlmExchange {
        let response = self.route(request.task, branch, &request).await;
        LlmExchange { request, response }
    }

    /// Route one request; failures are carried in the response
    #[instrument(skip(self, request), fields(task = %task, branch = %branch, mode = %self.config.mode))]
    pub async fn route(&self, task: Task, branch: Branch, request: &LlmRequest) -> LlmResponse {
        let mut state = RouteState::new();
        let explicit = self.routing.explicit(task, branch);

        match self.config.mode {
            RouterMode::Sequential => {
                for candidate in explicit {
                    if !self.health.is_available(&candidate.backend) {
                        state.skipped += 1;
                        state.push(candidate, AttemptOutcome::Skipped, Duration::ZERO, false);
                        state.last_failure = Some(
                            BackendFailure::unavailable("marked unavailable in health cache")
                                .at(&candidate.backend, &candidate.model),
                        );
                        continue;
                    }

                    let retries = self.config.invalid_response_retries;
                    if let Some(response) = self
                        .try_candidate(task, candidate, request, retries, false, &mut state)
                        .await
                    {
                        return response;
                    }
                }

                let last_resort = self.routing.last_resort();
                debug!(candidate = %last_resort, "Trying last resort");
                if let Some(response) = self
                    .try_candidate(task, last_resort, request, 0, true, &mut state)
                    .await
                {
                    return response;
                }
            }
            RouterMode::Strict => match explicit.first() {
                Some(primary) if !self.health.is_available(&primary.backend) => {
                    state.skipped += 1;
                    state.push(primary, AttemptOutcome::Skipped, Duration::ZERO, false);
                    state.last_failure = Some(
                        BackendFailure::unavailable("marked unavailable in health cache")
                            .at(&primary.backend, &primary.model),
                    );
                }
                Some(primary) => {
                    let retries = self.config.invalid_response_retries;
                    if let Some(response) = self
                        .try_candidate(task, primary, request, retries, false, &mut state)
                        .await
                    {
                        return response;
                    }
                }
                None => {
                    state.last_failure = Some(BackendFailure::unavailable(format!(
                        "No primary candidate configured for task={} branch={}",
                        task, branch
                    )));
                }
            },
        }

        self.exhausted(task, state)
    }

    /// Try one candidate, retrying invalid answers up to `retries` times
    async fn try_candidate(
        &self,
        task: Task,
        candidate: &RouteCandidate,
        request: &LlmRequest,
        retries: u8,
        last_resort: bool,
        state: &mut RouteState,
    ) -> Option<LlmResponse> {
        let Some(backend) = self.registry.get(&candidate.backend) else {
            state.attempts += 1;
            let failure = BackendFailure::unavailable("backend is not registered")
                .at(&candidate.backend, &candidate.model);
            state.push(candidate, AttemptOutcome::Failed(failure.kind), Duration::ZERO, last_resort);
            state.last_failure = Some(failure);
            return None;
        };

        // Backend-specific overrides win; otherwise the request's own deadline
        let timeout = self
            .config
            .timeouts
            .backend_override(&candidate.backend, task)
            .unwrap_or(request.timeout);
        let backend_request = BackendRequest {
            model: candidate.model.clone(),
            system_prompt: request.system_prompt.clone(),
            user_content: request.user_content.clone(),
            temperature: request.temperature,
            timeout,
            json_mode: request.format.is_json(),
        };

        for try_index in 0..=retries {
            state.attempts += 1;
            let call_start = Instant::now();

            debug!(
                candidate = %candidate,
                attempt = state.attempts,
                timeout_ms = timeout.as_millis() as u64,
                last_resort,
                "Router attempt"
            );

            let outcome = match with_deadline(timeout, backend.send(&backend_request)).await {
                Ok(reply) => match request.format.check(&reply.text) {
                    Ok(json) => Ok((reply, json)),
                    Err(failure) => {
                        state.last_text = reply.text;
                        Err(failure)
                    }
                },
                Err(failure) => Err(failure),
            };
            let elapsed = call_start.elapsed();

            match outcome {
                Ok((reply, json)) => {
                    self.health.record(&candidate.backend, true);
                    state.push(candidate, AttemptOutcome::Success, elapsed, last_resort);

                    info!(
                        candidate = %candidate,
                        attempts = state.attempts,
                        skipped = state.skipped,
                        latency_ms = elapsed.as_millis() as u64,
                        "Route succeeded"
                    );

                    return Some(LlmResponse {
                        task,
                        text: reply.text,
                        json,
                        backend: candidate.backend.clone(),
                        model: candidate.model.clone(),
                        latency: state.started.elapsed(),
                        attempts: state.attempts,
                        skipped: state.skipped,
                        error: None,
                        trail: std::mem::take(&mut state.trail),
                    });
                }
                Err(failure) => {
                    let failure = failure.at(&candidate.backend, &candidate.model).elapsed(elapsed);
                    state.push(candidate, AttemptOutcome::Failed(failure.kind), elapsed, last_resort);

                    warn!(
                        candidate = %candidate,
                        attempt = state.attempts,
                        kind = %failure.kind,
                        error = %failure.message,
                        "Candidate failed"
                    );

                    if failure.kind.marks_unavailable() {
                        self.health.record(&candidate.backend, false);
                    }

                    let retry = failure.kind.is_retryable() && try_index < retries;
                    state.last_failure = Some(failure);
                    if !retry {
                        break;
                    }
                    debug!(candidate = %candidate, "Invalid response, retrying same candidate");
                }
            }
        }

        None
    }

    fn exhausted(&self, task: Task, mut state: RouteState) -> LlmResponse {
        let last = state.last_failure.take().unwrap_or_else(|| {
            BackendFailure::unavailable("no candidate was attempted")
        });

        warn!(
            task = %task,
            attempts = state.attempts,
            skipped = state.skipped,
            last = %last,
            "All candidates exhausted"
        );

        LlmResponse {
            task,
            text: std::mem::take(&mut state.last_text),
            json: None,
            backend: last.backend.clone(),
            model: last.model.clone(),
            latency: state.started.elapsed(),
            attempts: state.attempts,
            skipped: state.skipped,
            error: Some(RouteError::AllCandidatesExhausted {
                task,
                attempts: state.attempts,
                last,
            }),
            trail: state.trail,
        }
    }
}
