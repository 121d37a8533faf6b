//! Configuration Management
//!
//! Unified configuration system with hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (`~/.config/fxdesk/config.toml`)
//! 3. Project config (`./fxdesk.toml`) or an explicit `--config` file
//! 4. Environment variables (`FXDESK_*`, nested keys joined by `__`)
//! 5. CLI arguments (highest priority)
//!
//! [`Config`] also knows how to turn itself into the runtime pieces the
//! router needs (routing table, timeout and temperature policies, backend
//! registry).

mod loader;
mod runtime;
mod types;

pub use loader::{ConfigFormat, ConfigLoader};
pub use types::*;
