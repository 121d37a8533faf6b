//! Config Command
//!
//! Usage:
//!   fxdesk config show [-f toml|json|yaml]
//!   fxdesk config path

use std::path::Path;

use crate::cli::ui::Output;
use crate::config::{ConfigFormat, ConfigLoader};
use crate::types::Result;

/// Print the merged effective configuration
pub fn show(config_path: Option<&Path>, format: ConfigFormat) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    println!("{}", ConfigLoader::render(&config, format)?);
    Ok(())
}

/// Print every configuration file location in resolution order
pub fn path(config_path: Option<&Path>) {
    let out = Output::new();
    out.header("Configuration files (later overrides earlier)");

    match ConfigLoader::global_config_path() {
        Some(global) => out.check(global.exists(), &format!("Global:  {}", global.display())),
        None => out.warning("Global:  cannot determine config directory"),
    }

    let project = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(ConfigLoader::project_config_path);
    out.check(project.exists(), &format!("Project: {}", project.display()));
    out.info("Environment: FXDESK_* (use __ between nested keys)");
}
