//! CLI Common Utilities
//!
//! Shared initialization for command handlers.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ConfigLoader};
use crate::storage::{Database, SharedDatabase};
use crate::types::{FxError, Result};

/// Command execution context
///
/// Created via [`CommandContext::load`] for commands that touch the run
/// store, or via [`CommandContext::config_only`] for commands that only read
/// configuration.
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    db: Option<SharedDatabase>,
}

impl CommandContext {
    /// Load configuration and open the run database
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = ConfigLoader::load(config_path)?;
        let db = Database::open(&config.storage.db_path)?;
        Ok(Self {
            config,
            db: Some(Arc::new(db)),
        })
    }

    pub fn config_only(config_path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            config: ConfigLoader::load(config_path)?,
            db: None,
        })
    }

    pub fn db(&self) -> Result<SharedDatabase> {
        self.db
            .clone()
            .ok_or_else(|| FxError::Storage("Database not opened for this command".into()))
    }
}

/// Output format shared by commands that print records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid format '{}'. Valid values: text, json", s)),
        }
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
