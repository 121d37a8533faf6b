//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (`{config_dir}/fxdesk/config.toml`)
//! 3. Project config (`./fxdesk.toml`, or the file passed with `--config`)
//! 4. Environment variables (`FXDESK_` prefix, `__` between path segments)

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::types::{FxError, Result};

const ENV_PREFIX: &str = "FXDESK_";
const PROJECT_CONFIG_FILE: &str = "fxdesk.toml";

/// Output formats accepted by `config show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
    Yaml,
}

impl std::str::FromStr for ConfigFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(format!("Unknown format: {}. Valid values: toml, json, yaml", s)),
        }
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project (or explicit file) → env vars
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let config: Config = Self::figment(explicit)?
            .extract()
            .map_err(|e| FxError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(FxError::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                debug!("Loading config from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let project_path = Self::project_config_path();
                if project_path.exists() {
                    debug!("Loading project config from: {}", project_path.display());
                    figment = figment.merge(Toml::file(&project_path));
                }
            }
        }

        // FXDESK_LLM__TIMEOUT_SECS -> llm.timeout_secs
        // FXDESK_BACKENDS__DEEPSEEK_API__ENABLED -> backends.deepseek_api.enabled
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true)))
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| FxError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory (e.g. `~/.config/fxdesk/`)
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "fxdesk").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_CONFIG_FILE)
    }

    /// Render the effective configuration; API keys are never included
    pub fn render(config: &Config, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| FxError::Config(e.to_string()))
            }
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(config)?),
            ConfigFormat::Yaml => {
                serde_yaml::to_string(config).map_err(|e| FxError::Config(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Branch, RouterMode};
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fxdesk.toml");
        std::fs::write(
            &path,
            r#"
branch = "server"

[llm]
router_mode = "strict"
timeout_secs = 45

[backends.ollama_server]
kind = "ollama"
url = "http://10.0.0.5:11434"
enabled = true

[routing.server]
synthesis = [{ backend = "ollama_server", model = "qwen2.5:14b" }]

[verifier]
enabled = true
mode = "hard"
max_repairs = 2
on_exhausted = "fail_run"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.branch, Branch::Server);
        assert_eq!(config.llm.router_mode, RouterMode::Strict);
        assert_eq!(config.llm.timeout_secs, 45);
        assert!(config.backends["ollama_server"].enabled);
        // Untouched defaults survive the merge
        assert!(config.backends.contains_key("deepseek_api"));
        assert_eq!(config.routing.server["synthesis"][0].model, "qwen2.5:14b");
        assert_eq!(config.verifier.max_repairs, 2);
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[llm]\ntemperature = 3.0\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = ConfigLoader::load(Some(Path::new("/nonexistent/fxdesk.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_env_override_with_double_underscore() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("FXDESK_LLM__HEALTH_TTL_SECS", "90");
            jail.set_env("FXDESK_VERIFIER__ENABLED", "true");
            let config = ConfigLoader::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.llm.health_ttl_secs, 90);
            assert!(config.verifier.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_render_formats() {
        let config = Config::default();
        for format in [ConfigFormat::Toml, ConfigFormat::Json, ConfigFormat::Yaml] {
            let out = ConfigLoader::render(&config, format).unwrap();
            assert!(out.contains("ollama_local"));
        }
        assert_eq!("yml".parse::<ConfigFormat>().unwrap(), ConfigFormat::Yaml);
    }
}
