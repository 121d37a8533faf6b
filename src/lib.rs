//! fxdesk - Task-Routed LLM Forex Research Pipeline
//!
//! Turns recent candles and headlines for a currency pair into a structured
//! research recommendation (`CALL`, `PUT` or `WAIT`) through a chain of LLM
//! agents, with every model call routed per task across local and server
//! backends.
//!
//! ## Core Features
//!
//! - **Task Routing**: ordered candidates per (task, branch), shared last resort
//! - **Health Cache**: TTL availability cache skips known-dead backends
//! - **Timeout Precedence**: backend+task, backend, task, global
//! - **Verification**: optional verifier with a bounded repair loop
//! - **Audit Trail**: run store in SQLite plus per-stage JSON artifacts
//!
//! ## Quick Start
//!
//! ```ignore
//! use fxdesk::{AgentContext, ConfigLoader, Orchestrator, OrchestratorConfig, PipelineDeps};
//!
//! let config = ConfigLoader::load(None)?;
//! let router = Arc::new(config.build_router()?);
//! let orchestrator = Orchestrator::new(
//!     AgentContext::new(router, config.branch),
//!     deps,
//!     OrchestratorConfig::from(&config),
//! );
//! let outcome = orchestrator.run_analysis("EURUSD", Timeframe::H1).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: routing tables, router, health cache, backend adapters
//! - [`agents`]: technical, news, synthesis and verifier agents
//! - [`features`]: indicator computation and the feature snapshot
//! - [`pipeline`]: stage orchestration and the repair loop
//! - [`sources`]: market data and news providers
//! - [`storage`]: SQLite run store and artifact sinks
//! - [`config`]: layered configuration

pub mod agents;
pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod features;
pub mod pipeline;
pub mod sources;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigFormat, ConfigLoader};
pub use types::error::{FxError, Result, ResultExt};

pub use storage::{Database, PoolConfig, SharedDatabase};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use agents::AgentContext;
pub use pipeline::{Orchestrator, OrchestratorConfig, PipelineDeps, RunOutcome, Stage};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    Backend, BackendRegistry, Branch, HealthCache, LlmExchange, LlmRequest, LlmResponse,
    RouteCandidate, Router, RouterConfig, Task, TaskRouting, TimeoutPolicy,
};
