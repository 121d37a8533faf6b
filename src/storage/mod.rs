//! Persistence
//!
//! - [`Database`]: pooled SQLite holding runs, recommendations, rationales
//!   and verification reports
//! - [`RunStore`] / [`RecordStore`]: the narrow traits the pipeline writes through
//! - [`ArtifactSink`]: per-stage request/response payloads for auditing

mod artifacts;
pub mod database;
mod records;

pub use artifacts::{ArtifactSink, FileArtifactSink, MemoryArtifactSink, render_rationales};
pub use database::{Database, PoolConfig, SharedDatabase};
pub use records::{RationaleRecord, RecordStore, RunStore, StoredVerification};
