//! LLM Backend Abstraction
//!
//! Defines the [`Backend`] trait: send one completion request, get text or a
//! typed [`BackendFailure`]. The router depends only on this trait.
//!
//! ## Modules
//!
//! - `ollama`: Ollama chat API (local and server branches)
//! - `openai`: OpenAI-compatible chat completions (DeepSeek)

mod ollama;
mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAiCompatibleBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::types::{BackendFailure, FxError, Result};

// =============================================================================
// Request / Reply
// =============================================================================

/// One completion request as seen by an adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_content: String,
    pub temperature: f32,
    /// Deadline for this call; adapters pass it to the HTTP client as well
    pub timeout: Duration,
    /// Ask the backend for JSON output when it supports a JSON mode
    pub json_mode: bool,
}

/// Token usage reported by the backend, when available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Successful adapter answer
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub text: String,
    pub usage: TokenUsage,
    pub latency: Duration,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Uniform capability implemented once per backend technology
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry name (`ollama_local`, `deepseek_api`, ...)
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Send one completion request
    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, BackendFailure>;

    /// Cheap reachability check
    async fn health_check(&self) -> bool;
}

/// Shared backend handle
pub type SharedBackend = Arc<dyn Backend>;

// =============================================================================
// Backend Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Ollama,
    OpenaiCompatible,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenaiCompatible => write!(f, "openai_compatible"),
        }
    }
}

/// Configuration for one named backend
///
/// API keys are never serialized to output and are redacted in debug output.
/// Adapters convert them to `SecretString` at construction.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL; required for every backend that is enabled
    pub url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset
    pub api_key_env: Option<String>,
    pub enabled: bool,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Ollama,
            url: None,
            api_key: None,
            api_key_env: None,
            enabled: true,
        }
    }
}

impl BackendConfig {
    /// Explicit key, falling back to the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_ref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty())
            })
    }
}

/// Create a shared backend from configuration
pub fn create_backend(name: &str, config: &BackendConfig) -> Result<SharedBackend> {
    match config.kind {
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(name, config)?)),
        BackendKind::OpenaiCompatible => Ok(Arc::new(OpenAiCompatibleBackend::new(name, config)?)),
    }
}

/// Validate endpoint URL for security (SSRF prevention)
///
/// Only allows http/https schemes and warns for non-localhost endpoints.
pub(crate) fn validate_endpoint(endpoint: &str, label: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        FxError::Config(format!("Invalid {} endpoint URL '{}': {}", label, endpoint, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(FxError::Config(format!(
            "{} endpoint must use http or https scheme, got: {}",
            label,
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str()
        && !matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
        && url.scheme() == "http"
    {
        warn!(
            "{} endpoint is a plain-http non-localhost host: {}. Ensure this is intentional.",
            label, host
        );
    }

    let mut result = url.to_string();
    while result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}

// =============================================================================
// Registry
// =============================================================================

/// Named backends available to the router
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, SharedBackend>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every enabled backend
    pub fn from_configs(configs: &BTreeMap<String, BackendConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in configs.iter().filter(|(_, c)| c.enabled) {
            registry.register(create_backend(name, config)?);
        }
        Ok(registry)
    }

    /// Add or replace a backend under its own name
    pub fn register(&mut self, backend: SharedBackend) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with(mut self, backend: SharedBackend) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SharedBackend> {
        self.backends.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedBackend> {
        self.backends.values()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
