//! Analysis Pipeline
//!
//! One run walks the stages in [`Stage::ALL`] order. Hard stages end the run
//! as FAILED; news stages degrade instead. In hard verifier mode a failed
//! verification triggers the [`RepairLoop`].

mod job;
mod orchestrator;
mod repair;
mod stage;

pub use job::{JobResult, run_job, timed};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PipelineDeps, RunOutcome};
pub use repair::{RepairLoop, RepairOutcome, RepairRound};
pub use stage::{Stage, StageLatency, repair_artifact_name};
