//! Artifact Sinks
//!
//! One JSON file per LLM stage under `{root}/run_{id}/`:
//!
//! ```text
//! run_7/
//! ├── tech_analysis.json
//! ├── news_analysis.json
//! ├── synthesis.json
//! ├── verification.json
//! ├── synthesis_repair_1.json
//! ├── verification_repair_1.json
//! ├── recommendation.json
//! └── rationales.md
//! ```
//!
//! Each stage file holds `{stage, request, response, raw_text}` for the
//! response the router returned; intermediate fallback attempts only appear
//! in `response.trail`.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::records::RationaleRecord;
use crate::ai::{AttemptRecord, LlmExchange, LlmRequest, Task};
use crate::types::{Recommendation, Result, ResultExt, RunId};

pub trait ArtifactSink: Send + Sync {
    /// Persist the terminal exchange of one LLM stage
    fn write(&self, run_id: RunId, stage: &str, exchange: &LlmExchange) -> Result<()>;

    fn write_recommendation(&self, run_id: RunId, recommendation: &Recommendation) -> Result<()>;

    fn write_rationales(&self, run_id: RunId, rationales: &[RationaleRecord]) -> Result<()>;
}

// =============================================================================
// Serialized shape
// =============================================================================

#[derive(Serialize)]
struct StageArtifact<'a> {
    stage: &'a str,
    request: &'a LlmRequest,
    response: ResponseArtifact<'a>,
    raw_text: &'a str,
}

#[derive(Serialize)]
struct ResponseArtifact<'a> {
    task: Task,
    ok: bool,
    backend: &'a str,
    model: &'a str,
    latency_ms: u64,
    attempts: u32,
    skipped: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<&'a Value>,
    trail: &'a [AttemptRecord],
}

fn stage_artifact<'a>(stage: &'a str, exchange: &'a LlmExchange) -> StageArtifact<'a> {
    let response = &exchange.response;
    StageArtifact {
        stage,
        request: &exchange.request,
        response: ResponseArtifact {
            task: response.task,
            ok: response.is_ok(),
            backend: &response.backend,
            model: &response.model,
            latency_ms: response.latency.as_millis() as u64,
            attempts: response.attempts,
            skipped: response.skipped,
            error: response.error.as_ref().map(|e| e.to_string()),
            json: response.json.as_ref(),
            trail: &response.trail,
        },
        raw_text: exchange.raw_text(),
    }
}

/// Markdown digest of a run's rationales
pub fn render_rationales(run_id: RunId, rationales: &[RationaleRecord]) -> String {
    let mut out = format!("# Rationales for run {}\n", run_id);
    for r in rationales {
        let _ = write!(out, "\n## {}\n\n", r.kind);
        if let (Some(backend), Some(model)) = (&r.backend, &r.model) {
            let _ = writeln!(
                out,
                "_Served by {}/{} in {} ms after {} attempt(s)_\n",
                backend,
                model,
                r.latency_ms.unwrap_or(0),
                r.attempts
            );
        }
        if let Some(error) = &r.error {
            let _ = writeln!(out, "> Error: {}\n", error);
        }
        let _ = writeln!(out, "{}", r.content.trim());
    }
    out
}

// =============================================================================
// Files
// =============================================================================

#[derive(Debug, Clone)]
pub struct FileArtifactSink {
    root: PathBuf,
}

impl FileArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.artifact_dir_name())
    }

    fn write_file(&self, run_id: RunId, name: &str, content: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir)
            .with_context_fn(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(name);
        std::fs::write(&path, content)
            .with_context_fn(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Artifact written");
        Ok(path)
    }
}

impl ArtifactSink for FileArtifactSink {
    fn write(&self, run_id: RunId, stage: &str, exchange: &LlmExchange) -> Result<()> {
        let json = serde_json::to_string_pretty(&stage_artifact(stage, exchange))?;
        self.write_file(run_id, &format!("{}.json", stage), &json)?;
        Ok(())
    }

    fn write_recommendation(&self, run_id: RunId, recommendation: &Recommendation) -> Result<()> {
        let json = serde_json::to_string_pretty(recommendation)?;
        self.write_file(run_id, "recommendation.json", &json)?;
        Ok(())
    }

    fn write_rationales(&self, run_id: RunId, rationales: &[RationaleRecord]) -> Result<()> {
        self.write_file(run_id, "rationales.md", &render_rationales(run_id, rationales))?;
        Ok(())
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Keeps artifacts as JSON values; used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    entries: Mutex<Vec<(RunId, String, Value)>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifact names written for a run, in write order
    pub fn names(&self, run_id: RunId) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(id, _, _)| *id == run_id)
            .map(|(_, name, _)| name.clone())
            .collect()
    }

    pub fn get(&self, run_id: RunId, name: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|(id, n, _)| *id == run_id && n == name)
            .map(|(_, _, v)| v.clone())
    }

    fn push(&self, run_id: RunId, name: &str, value: Value) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((run_id, name.to_string(), value));
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn write(&self, run_id: RunId, stage: &str, exchange: &LlmExchange) -> Result<()> {
        self.push(run_id, stage, serde_json::to_value(stage_artifact(stage, exchange))?);
        Ok(())
    }

    fn write_recommendation(&self, run_id: RunId, recommendation: &Recommendation) -> Result<()> {
        self.push(run_id, "recommendation", serde_json::to_value(recommendation)?);
        Ok(())
    }

    fn write_rationales(&self, run_id: RunId, rationales: &[RationaleRecord]) -> Result<()> {
        self.push(run_id, "rationales", Value::String(render_rationales(run_id, rationales)));
        Ok(())
    }
}
