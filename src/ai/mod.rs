//! AI Integration Layer
//!
//! Task-routed access to LLM backends:
//! - [`routing`]: tasks, branches, candidate tables, timeout precedence
//! - [`router`]: the ordered try/fallback loop
//! - [`health`]: TTL availability cache shared by every route call
//! - [`backend`]: adapter trait plus Ollama / OpenAI-compatible adapters
//! - [`validation`]: shared JSON extraction and format checks

pub mod backend;
pub mod health;
pub mod router;
pub mod routing;
pub mod timeout;
pub mod validation;

pub use backend::{
    Backend, BackendConfig, BackendKind, BackendRegistry, BackendReply, BackendRequest,
    SharedBackend, TokenUsage, create_backend,
};
pub use health::{Clock, HealthCache, HealthCacheStats, HealthState, ManualClock, SystemClock};
pub use router::{
    AttemptOutcome, AttemptRecord, LlmExchange, LlmRequest, LlmResponse, Router, RouterConfig, RouterMode,
};
pub use routing::{Branch, RouteCandidate, Task, TaskRouting, TemperaturePolicy, TimeoutPolicy};
pub use timeout::with_deadline;
pub use validation::{ExpectedFormat, FieldRule, ParsedJson, parse_json_object, parse_json_response};
