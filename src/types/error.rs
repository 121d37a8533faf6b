//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//!
//! ## Layers
//!
//! - **Backend**: [`BackendFailure`] is what one adapter call produces. It is
//!   cheap to clone because the router keeps it in every attempt record.
//! - **Router**: [`RouteError`] is carried inside an `LlmResponse`; it never
//!   propagates as an `Err` out of `route()`.
//! - **Application**: [`FxError`] covers configuration, storage and pipeline
//!   stage failures.
//!
//! ## Failure Kinds
//!
//! - **BackendUnavailable**: connection refused, 5xx, skipped by the health cache
//! - **BackendTimeout**: the per-call deadline elapsed
//! - **ModelNotFound**: the backend is up but does not serve the model
//! - **InvalidResponse**: output failed structural parsing
//! - **Rejected**: the backend refused the request (auth, bad request)

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::ai::routing::Task;

// =============================================================================
// Failure Kinds
// =============================================================================

/// Classification of a single backend call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Backend could not be reached or answered with a server error
    BackendUnavailable,
    /// Call exceeded its resolved deadline
    BackendTimeout,
    /// Backend does not serve the requested model
    ModelNotFound,
    /// Output failed structural parsing
    InvalidResponse,
    /// Request refused (authentication, malformed request)
    Rejected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackendUnavailable => write!(f, "BACKEND_UNAVAILABLE"),
            Self::BackendTimeout => write!(f, "BACKEND_TIMEOUT"),
            Self::ModelNotFound => write!(f, "MODEL_NOT_FOUND"),
            Self::InvalidResponse => write!(f, "INVALID_RESPONSE"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl FailureKind {
    /// Whether the failure is evidence that the backend itself is down.
    ///
    /// Only transport-class failures feed the health cache; a malformed
    /// answer proves the backend is up.
    pub fn marks_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable | Self::BackendTimeout)
    }

    /// Whether the same candidate may be asked again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidResponse)
    }
}

// =============================================================================
// Backend Failure
// =============================================================================

/// One failed backend call, with enough context to diagnose it from logs
#[derive(Debug, Clone, PartialEq)]
pub struct BackendFailure {
    pub kind: FailureKind,
    pub backend: String,
    pub model: String,
    pub message: String,
    /// Time spent before the failure surfaced
    pub elapsed: Duration,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}:{}] {}",
            self.backend, self.model, self.kind, self.message
        )
    }
}

impl std::error::Error for BackendFailure {}

impl BackendFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            backend: String::new(),
            model: String::new(),
            message: message.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::BackendUnavailable, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::BackendTimeout,
            format!("no response within {:?}", after),
        )
        .elapsed(after)
    }

    pub fn model_not_found(model: &str) -> Self {
        Self::new(
            FailureKind::ModelNotFound,
            format!("model '{}' is not served by this backend", model),
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidResponse, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    /// Attach the candidate that produced the failure
    pub fn at(mut self, backend: impl Into<String>, model: impl Into<String>) -> Self {
        self.backend = backend.into();
        self.model = model.into();
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Classify an HTTP error status returned by a backend
    pub fn from_http_status(status: u16, body: &str, model: &str) -> Self {
        let lower = body.to_lowercase();
        match status {
            404 => Self::model_not_found(model),
            _ if lower.contains("model") && lower.contains("not found") => {
                Self::model_not_found(model)
            }
            500..=599 => Self::unavailable(format!("HTTP {}: {}", status, truncate(body))),
            _ => Self::rejected(format!("HTTP {}: {}", status, truncate(body))),
        }
    }

    /// Classify a transport error from reqwest
    pub fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(timeout)
        } else if err.is_connect() {
            Self::unavailable(format!("connection failed: {}", err))
        } else if err.is_decode() {
            Self::invalid_response(format!("undecodable body: {}", err))
        } else {
            Self::unavailable(format!("request failed: {}", err))
        }
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

// =============================================================================
// Route Error
// =============================================================================

/// Router-level failure carried inside an `LlmResponse`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// Every explicit candidate and the last resort failed
    #[error(
        "All candidates failed for task={task} after {attempts} attempts, including last resort: {last}"
    )]
    AllCandidatesExhausted {
        task: Task,
        attempts: u32,
        /// Terminal cause (the last resort's failure in sequential mode)
        last: BackendFailure,
    },
}

impl RouteError {
    /// The underlying backend failure that ended routing
    pub fn last_failure(&self) -> &BackendFailure {
        match self {
            Self::AllCandidatesExhausted { last, .. } => last,
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum FxError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // -------------------------------------------------------------------------
    // LLM Errors
    // -------------------------------------------------------------------------
    #[error("Backend error: {0}")]
    Backend(#[from] BackendFailure),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// A hard stage failure; the message is kept verbatim for diagnostics
    #[error("Stage {stage} failed: {message}")]
    StageFailure { stage: String, message: String },

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Failed to persist recommendation: {0}")]
    PersistenceFailure(String),

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<r2d2::Error> for FxError {
    fn from(err: r2d2::Error) -> Self {
        FxError::Storage(format!("Connection pool error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, FxError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl FxError {
    /// Create a stage failure
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| FxError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| FxError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(
            FailureKind::BackendUnavailable.to_string(),
            "BACKEND_UNAVAILABLE"
        );
        assert_eq!(FailureKind::BackendTimeout.to_string(), "BACKEND_TIMEOUT");
        assert_eq!(FailureKind::InvalidResponse.to_string(), "INVALID_RESPONSE");
    }

    #[test]
    fn test_only_transport_failures_mark_unavailable() {
        assert!(FailureKind::BackendUnavailable.marks_unavailable());
        assert!(FailureKind::BackendTimeout.marks_unavailable());
        assert!(!FailureKind::InvalidResponse.marks_unavailable());
        assert!(!FailureKind::ModelNotFound.marks_unavailable());
        assert!(!FailureKind::Rejected.marks_unavailable());
    }

    #[test]
    fn test_only_invalid_response_is_retryable() {
        assert!(FailureKind::InvalidResponse.is_retryable());
        assert!(!FailureKind::BackendTimeout.is_retryable());
        assert!(!FailureKind::ModelNotFound.is_retryable());
    }

    #[test]
    fn test_classify_http_status() {
        assert_eq!(
            BackendFailure::from_http_status(404, "", "llama3").kind,
            FailureKind::ModelNotFound
        );
        assert_eq!(
            BackendFailure::from_http_status(400, "model 'x' not found, try pulling it", "x")
                .kind,
            FailureKind::ModelNotFound
        );
        assert_eq!(
            BackendFailure::from_http_status(503, "overloaded", "m").kind,
            FailureKind::BackendUnavailable
        );
        assert_eq!(
            BackendFailure::from_http_status(401, "bad key", "m").kind,
            FailureKind::Rejected
        );
    }

    #[test]
    fn test_backend_failure_display() {
        let err = BackendFailure::unavailable("connection refused").at("ollama_local", "llama3");
        assert_eq!(
            err.to_string(),
            "[ollama_local/llama3:BACKEND_UNAVAILABLE] connection refused"
        );
    }

    #[test]
    fn test_route_error_keeps_terminal_cause() {
        let last = BackendFailure::timeout(Duration::from_secs(5)).at("c", "m");
        let err = RouteError::AllCandidatesExhausted {
            task: Task::Synthesis,
            attempts: 3,
            last: last.clone(),
        };
        assert_eq!(err.last_failure(), &last);
        assert!(err.to_string().contains("task=synthesis"));
    }

    #[test]
    fn test_persistence_failure_message() {
        let err = FxError::PersistenceFailure("disk full".into());
        assert_eq!(err.to_string(), "Failed to persist recommendation: disk full");
    }
}
