//! Task Routing Tables
//!
//! Static, read-only description of which (backend, model) pairs may serve
//! each LLM task, plus the per-call timeout and temperature policies.
//!
//! ## Resolution
//!
//! - Candidates for `(task, branch)` come in configured priority order and
//!   always end with the global last resort.
//! - Timeouts resolve through four levels, first defined wins:
//!   backend+task, backend, task, global.
//!
//! [`Task::config_key`] is the only place a task is turned into a
//! configuration key; routing tables, timeout tables, temperature overrides
//! and artifact names all go through it.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::router as router_constants;
use crate::types::{FxError, Result};

// =============================================================================
// Task & Branch
// =============================================================================

/// The four LLM-driven pipeline steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {
    TechAnalysis,
    NewsAnalysis,
    Synthesis,
    Verification,
}

impl Task {
    pub const ALL: [Task; 4] = [
        Self::TechAnalysis,
        Self::NewsAnalysis,
        Self::Synthesis,
        Self::Verification,
    ];

    /// Canonical configuration key for this task
    pub const fn config_key(&self) -> &'static str {
        match self {
            Self::TechAnalysis => "tech",
            Self::NewsAnalysis => "news",
            Self::Synthesis => "synthesis",
            Self::Verification => "verifier",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.config_key() == key)
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.config_key())
    }
}

impl Serialize for Task {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.config_key())
    }
}

/// Deployment context selecting the routing table slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    #[default]
    Local,
    Server,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Server => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "server" => Ok(Self::Server),
            _ => Err(format!(
                "Unknown branch: {}. Valid values: local, server",
                s
            )),
        }
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// One concrete (backend, model) pair eligible to serve a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub backend: String,
    pub model: String,
}

impl RouteCandidate {
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for RouteCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.backend, self.model)
    }
}

impl Default for RouteCandidate {
    fn default() -> Self {
        Self::new(
            router_constants::LAST_RESORT_BACKEND,
            router_constants::LAST_RESORT_MODEL,
        )
    }
}

/// Ordered candidates per (task, branch) plus one shared last resort
#[derive(Debug, Clone)]
pub struct TaskRouting {
    routes: HashMap<(Task, Branch), Vec<RouteCandidate>>,
    last_resort: RouteCandidate,
}

impl Default for TaskRouting {
    fn default() -> Self {
        Self::new(RouteCandidate::default())
    }
}

impl TaskRouting {
    pub fn new(last_resort: RouteCandidate) -> Self {
        Self {
            routes: HashMap::new(),
            last_resort,
        }
    }

    /// Set the explicit candidates for one (task, branch) pair
    pub fn with_route(
        mut self,
        task: Task,
        branch: Branch,
        candidates: Vec<RouteCandidate>,
    ) -> Result<Self> {
        if candidates.len() > router_constants::MAX_CANDIDATES {
            return Err(FxError::Config(format!(
                "Routing for task={} branch={} lists {} candidates (max {})",
                task,
                branch,
                candidates.len(),
                router_constants::MAX_CANDIDATES
            )));
        }
        if let Some(bad) = candidates
            .iter()
            .find(|c| c.backend.trim().is_empty() || c.model.trim().is_empty())
        {
            return Err(FxError::Config(format!(
                "Routing for task={} branch={} has an incomplete candidate: '{}'",
                task, branch, bad
            )));
        }
        self.routes.insert((task, branch), candidates);
        Ok(self)
    }

    /// Explicit candidates only, in priority order
    pub fn explicit(&self, task: Task, branch: Branch) -> &[RouteCandidate] {
        self.routes
            .get(&(task, branch))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Full trial order: explicit candidates followed by the last resort
    pub fn candidates(&self, task: Task, branch: Branch) -> Vec<RouteCandidate> {
        let mut list = self.explicit(task, branch).to_vec();
        list.push(self.last_resort.clone());
        list
    }

    pub fn last_resort(&self) -> &RouteCandidate {
        &self.last_resort
    }

    /// Every backend name referenced by the table
    pub fn referenced_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .routes
            .values()
            .flatten()
            .chain(std::iter::once(&self.last_resort))
            .map(|c| c.backend.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

// =============================================================================
// Timeout Policy
// =============================================================================

/// Normalize a backend name for override lookups (`ollama-server` → `ollama_server`)
pub fn normalize_backend_name(name: &str) -> String {
    name.trim().to_lowercase().replace(['-', '.'], "_")
}

/// Four-level timeout precedence; undefined levels are skipped
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    global: Duration,
    per_task: HashMap<Task, Duration>,
    per_backend: HashMap<String, Duration>,
    per_backend_task: HashMap<(String, Task), Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(router_constants::DEFAULT_TIMEOUT_SECS))
    }
}

impl TimeoutPolicy {
    pub fn new(global: Duration) -> Self {
        Self {
            global,
            per_task: HashMap::new(),
            per_backend: HashMap::new(),
            per_backend_task: HashMap::new(),
        }
    }

    pub fn with_task(mut self, task: Task, timeout: Duration) -> Self {
        self.per_task.insert(task, timeout);
        self
    }

    pub fn with_backend(mut self, backend: &str, timeout: Duration) -> Self {
        self.per_backend
            .insert(normalize_backend_name(backend), timeout);
        self
    }

    pub fn with_backend_task(mut self, backend: &str, task: Task, timeout: Duration) -> Self {
        self.per_backend_task
            .insert((normalize_backend_name(backend), task), timeout);
        self
    }

    /// Effective timeout for one call
    pub fn resolve(&self, backend: &str, task: Task) -> Duration {
        self.backend_override(backend, task)
            .unwrap_or_else(|| self.task_default(task))
    }

    /// Backend-specific levels only (backend+task, then backend)
    pub fn backend_override(&self, backend: &str, task: Task) -> Option<Duration> {
        let key = normalize_backend_name(backend);
        self.per_backend_task
            .get(&(key.clone(), task))
            .or_else(|| self.per_backend.get(&key))
            .copied()
    }

    /// Timeout before a backend is known (task level, then global)
    pub fn task_default(&self, task: Task) -> Duration {
        self.per_task.get(&task).copied().unwrap_or(self.global)
    }

    pub fn global(&self) -> Duration {
        self.global
    }
}

/// Per-task temperature overrides over a global default
#[derive(Debug, Clone)]
pub struct TemperaturePolicy {
    default: f32,
    per_task: HashMap<Task, f32>,
}

impl Default for TemperaturePolicy {
    fn default() -> Self {
        Self::new(router_constants::DEFAULT_TEMPERATURE)
    }
}

impl TemperaturePolicy {
    pub fn new(default: f32) -> Self {
        Self {
            default,
            per_task: HashMap::new(),
        }
    }

    pub fn with_task(mut self, task: Task, temperature: f32) -> Self {
        self.per_task.insert(task, temperature);
        self
    }

    pub fn resolve(&self, task: Task) -> f32 {
        self.per_task.get(&task).copied().unwrap_or(self.default)
    }
}
