//! Configuration Types
//!
//! All configuration structures with sensible defaults. Every section is
//! `#[serde(default)]`, so a config file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ai::{BackendConfig, BackendKind, Branch, RouteCandidate, RouterMode, Task};
use crate::constants::{
    backend as backend_constants, decision as decision_constants, health as health_constants,
    pipeline as pipeline_constants, router as router_constants, sources as source_constants,
    verification as verify_constants,
};
use crate::types::{FxError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment context selecting the routing table
    pub branch: Branch,

    /// Router behavior and per-task sampling
    pub llm: LlmConfig,

    /// Timeout overrides below the global `llm.timeout_secs`
    pub timeouts: TimeoutsConfig,

    /// Named backend adapters
    pub backends: BTreeMap<String, BackendConfig>,

    /// Candidate lists per branch and task
    pub routing: RoutingConfig,

    pub verifier: VerifierConfig,

    pub decision: DecisionConfig,

    pub market: MarketConfig,

    pub news: NewsConfig,

    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            branch: Branch::Local,
            llm: LlmConfig::default(),
            timeouts: TimeoutsConfig::default(),
            backends: default_backends(),
            routing: RoutingConfig::default(),
            verifier: VerifierConfig::default(),
            decision: DecisionConfig::default(),
            market: MarketConfig::default(),
            news: NewsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_backends() -> BTreeMap<String, BackendConfig> {
    BTreeMap::from([
        (
            "ollama_local".to_string(),
            BackendConfig {
                kind: BackendKind::Ollama,
                url: Some(backend_constants::OLLAMA_LOCAL_URL.to_string()),
                ..Default::default()
            },
        ),
        (
            "ollama_server".to_string(),
            BackendConfig {
                kind: BackendKind::Ollama,
                enabled: false,
                ..Default::default()
            },
        ),
        (
            "deepseek_api".to_string(),
            BackendConfig {
                kind: BackendKind::OpenaiCompatible,
                url: Some(backend_constants::DEEPSEEK_API_BASE.to_string()),
                api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
                enabled: false,
                ..Default::default()
            },
        ),
    ])
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `FxError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        let temperatures = std::iter::once(("llm.temperature".to_string(), self.llm.temperature)).chain(
            self.llm
                .task_temperature
                .iter()
                .map(|(k, v)| (format!("llm.task_temperature.{}", k), *v)),
        );
        for (key, value) in temperatures {
            if !(0.0..=2.0).contains(&value) {
                return Err(FxError::Config(format!(
                    "{} must be between 0.0 and 2.0, got {}",
                    key, value
                )));
            }
        }
        for key in self.llm.task_temperature.keys() {
            parse_task_key(key, "llm.task_temperature")?;
        }

        if self.llm.timeout_secs == 0 {
            return Err(FxError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.timeouts.validate()?;

        for (label, branch) in [("local", &self.routing.local), ("server", &self.routing.server)] {
            for (key, candidates) in branch {
                parse_task_key(key, &format!("routing.{}", label))?;
                if candidates.len() > router_constants::MAX_CANDIDATES {
                    return Err(FxError::Config(format!(
                        "routing.{}.{} lists {} candidates (max {})",
                        label,
                        key,
                        candidates.len(),
                        router_constants::MAX_CANDIDATES
                    )));
                }
                for candidate in candidates {
                    self.check_backend_known(&candidate.backend, &format!("routing.{}.{}", label, key))?;
                }
            }
        }
        self.check_backend_known(&self.routing.last_resort.backend, "routing.last_resort")?;

        if self.market.min_candles > self.market.window_candles {
            return Err(FxError::Config(format!(
                "market.min_candles ({}) cannot exceed market.window_candles ({})",
                self.market.min_candles, self.market.window_candles
            )));
        }

        if !(0.0..=1.0).contains(&self.decision.max_confidence_when_news_low) {
            return Err(FxError::Config(format!(
                "decision.max_confidence_when_news_low must be between 0.0 and 1.0, got {}",
                self.decision.max_confidence_when_news_low
            )));
        }
        for (name, score) in [
            ("min_trade_edge", self.decision.min_trade_edge),
            ("max_no_trade_score", self.decision.max_no_trade_score),
        ] {
            if !(0.0..=100.0).contains(&score) {
                return Err(FxError::Config(format!(
                    "decision.{} must be between 0 and 100, got {}",
                    name, score
                )));
            }
        }
        if self.decision.atr_pct_low_threshold < 0.0 {
            return Err(FxError::Config(format!(
                "decision.atr_pct_low_threshold must be non-negative, got {}",
                self.decision.atr_pct_low_threshold
            )));
        }

        Ok(())
    }

    fn check_backend_known(&self, backend: &str, location: &str) -> Result<()> {
        if self.backends.contains_key(backend) {
            Ok(())
        } else {
            Err(FxError::Config(format!(
                "{} references unknown backend '{}' (known: {})",
                location,
                backend,
                self.backends.keys().cloned().collect::<Vec<_>>().join(", ")
            )))
        }
    }
}

/// Map a configuration key back to its task
pub(crate) fn parse_task_key(key: &str, section: &str) -> Result<Task> {
    Task::from_config_key(key).ok_or_else(|| {
        FxError::Config(format!(
            "Unknown task '{}' in {}. Valid values: {}",
            key,
            section,
            Task::ALL.map(|t| t.config_key()).join(", ")
        ))
    })
}

// =============================================================================
// LLM
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub router_mode: RouterMode,

    /// Default sampling temperature (0.0-2.0)
    pub temperature: f32,

    /// Global timeout for one backend call
    pub timeout_secs: u64,

    /// Same-candidate retries after an unparseable answer
    pub invalid_response_retries: u8,

    /// How long a backend marked unavailable is skipped
    pub health_ttl_secs: u64,

    /// Temperature overrides keyed by task (`tech`, `news`, `synthesis`, `verifier`)
    pub task_temperature: BTreeMap<String, f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            router_mode: RouterMode::Sequential,
            temperature: router_constants::DEFAULT_TEMPERATURE,
            timeout_secs: router_constants::DEFAULT_TIMEOUT_SECS,
            invalid_response_retries: router_constants::DEFAULT_INVALID_RESPONSE_RETRIES,
            health_ttl_secs: health_constants::DEFAULT_TTL_SECS,
            task_temperature: BTreeMap::new(),
        }
    }
}

/// Timeout overrides in seconds
///
/// ```toml
/// [timeouts.task]
/// synthesis = 90
///
/// [timeouts.backend]
/// ollama_server = 120
///
/// [timeouts.backend_task.ollama_server]
/// synthesis = 300
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub task: BTreeMap<String, u64>,
    pub backend: BTreeMap<String, u64>,
    pub backend_task: BTreeMap<String, BTreeMap<String, u64>>,
}

impl TimeoutsConfig {
    fn validate(&self) -> Result<()> {
        let zero = |key: String| FxError::Config(format!("{} must be greater than 0", key));

        for (key, secs) in &self.task {
            parse_task_key(key, "timeouts.task")?;
            if *secs == 0 {
                return Err(zero(format!("timeouts.task.{}", key)));
            }
        }
        for (key, secs) in &self.backend {
            if *secs == 0 {
                return Err(zero(format!("timeouts.backend.{}", key)));
            }
        }
        for (backend, tasks) in &self.backend_task {
            for (key, secs) in tasks {
                parse_task_key(key, &format!("timeouts.backend_task.{}", backend))?;
                if *secs == 0 {
                    return Err(zero(format!("timeouts.backend_task.{}.{}", backend, key)));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Candidate lists keyed by task config key
pub type BranchRouting = BTreeMap<String, Vec<RouteCandidate>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub local: BranchRouting,
    pub server: BranchRouting,
    pub last_resort: RouteCandidate,
}

impl RoutingConfig {
    pub fn branch(&self, branch: Branch) -> &BranchRouting {
        match branch {
            Branch::Local => &self.local,
            Branch::Server => &self.server,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let local_model = RouteCandidate::new("ollama_local", router_constants::LAST_RESORT_MODEL);
        let local = Task::ALL
            .into_iter()
            .map(|t| (t.config_key().to_string(), vec![local_model.clone()]))
            .collect();

        let server = Task::ALL
            .into_iter()
            .map(|t| {
                (
                    t.config_key().to_string(),
                    vec![
                        RouteCandidate::new("ollama_server", router_constants::LAST_RESORT_MODEL),
                        RouteCandidate::new("deepseek_api", "deepseek-chat"),
                    ],
                )
            })
            .collect();

        Self {
            local,
            server,
            last_resort: RouteCandidate::default(),
        }
    }
}

// =============================================================================
// Verification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifierMode {
    /// Report only
    #[default]
    Soft,
    /// Repair failed recommendations
    Hard,
}

impl std::fmt::Display for VerifierMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifierMode::Soft => write!(f, "soft"),
            VerifierMode::Hard => write!(f, "hard"),
        }
    }
}

/// What a run does when repairs run out and verification still fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepairExhaustion {
    /// Keep the last recommendation, flagged as unresolved
    #[default]
    AcceptWithCaveat,
    /// Mark the run FAILED
    FailRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub enabled: bool,
    pub mode: VerifierMode,
    pub max_repairs: u32,
    pub on_exhausted: RepairExhaustion,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: VerifierMode::Soft,
            max_repairs: verify_constants::DEFAULT_MAX_REPAIRS,
            on_exhausted: RepairExhaustion::AcceptWithCaveat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Confidence ceiling applied when the news digest is LOW quality
    pub max_confidence_when_news_low: f64,
    /// Score lead one side needs over the other to trade
    pub min_trade_edge: f64,
    /// No-trade score above which the decision is WAIT
    pub max_no_trade_score: f64,
    /// Oldest crossover still counted as fresh
    pub crossover_max_age_bars: usize,
    /// ATR percent below which volatility is too low to trade
    pub atr_pct_low_threshold: f64,
    /// Strict-JSON re-asks after a malformed synthesis answer
    pub corrective_retries: u8,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_confidence_when_news_low: pipeline_constants::MAX_CONFIDENCE_WHEN_NEWS_LOW,
            min_trade_edge: decision_constants::MIN_TRADE_EDGE,
            max_no_trade_score: decision_constants::MAX_NO_TRADE_SCORE,
            crossover_max_age_bars: decision_constants::CROSSOVER_MAX_AGE_BARS,
            atr_pct_low_threshold: decision_constants::ATR_PCT_LOW_THRESHOLD,
            corrective_retries: pipeline_constants::SYNTHESIS_CORRECTIVE_RETRIES,
        }
    }
}

// =============================================================================
// Data Sources
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketSourceKind {
    #[default]
    TwelveData,
    File,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub source: MarketSourceKind,
    pub window_candles: usize,
    pub min_candles: usize,
    /// Falls back to `TWELVE_DATA_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    /// Directory read by the `file` source
    pub file_dir: PathBuf,
}

impl std::fmt::Debug for MarketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketConfig")
            .field("source", &self.source)
            .field("window_candles", &self.window_candles)
            .field("min_candles", &self.min_candles)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("file_dir", &self.file_dir)
            .finish()
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            source: MarketSourceKind::TwelveData,
            window_candles: pipeline_constants::WINDOW_CANDLES,
            min_candles: pipeline_constants::MIN_CANDLES,
            api_key: None,
            base_url: source_constants::TWELVE_DATA_BASE_URL.to_string(),
            file_dir: PathBuf::from(source_constants::DEFAULT_FILE_DIR),
        }
    }
}

impl MarketConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key, source_constants::TWELVE_DATA_KEY_ENV)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NewsSourceKind {
    #[default]
    Newsapi,
    Disabled,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub source: NewsSourceKind,
    /// Falls back to `NEWSAPI_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub window_hours: u32,
    pub max_articles: usize,
}

impl std::fmt::Debug for NewsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsConfig")
            .field("source", &self.source)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("window_hours", &self.window_hours)
            .field("max_articles", &self.max_articles)
            .finish()
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            source: NewsSourceKind::Newsapi,
            api_key: None,
            base_url: source_constants::NEWSAPI_BASE_URL.to_string(),
            window_hours: pipeline_constants::NEWS_WINDOW_HOURS,
            max_articles: pipeline_constants::MAX_NEWS_ARTICLES,
        }
    }
}

impl NewsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key, source_constants::NEWSAPI_KEY_ENV)
    }
}

fn resolve_key(explicit: &Option<String>, env_var: &str) -> Option<String> {
    explicit
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".fxdesk/fxdesk.db"),
            artifacts_dir: PathBuf::from(".fxdesk/artifacts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.routing.local["synthesis"][0].backend, "ollama_local");
        assert_eq!(config.routing.server["tech"].len(), 2);
        assert!(!config.backends["deepseek_api"].enabled);
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut config = Config::default();
        config.llm.task_temperature.insert("verifier".into(), 2.5);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("llm.task_temperature.verifier"));
    }

    #[test]
    fn test_validate_unknown_task_key() {
        let mut config = Config::default();
        config.timeouts.task.insert("tech_analysis".into(), 30);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Unknown task 'tech_analysis'"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config
            .timeouts
            .backend_task
            .entry("ollama_server".into())
            .or_default()
            .insert("synthesis".into(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_backend() {
        let mut config = Config::default();
        config
            .routing
            .local
            .insert("news".into(), vec![RouteCandidate::new("lmstudio", "phi3")]);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("routing.local.news references unknown backend 'lmstudio'"));
    }

    #[test]
    fn test_validate_too_many_candidates() {
        let mut config = Config::default();
        config.routing.local.insert(
            "tech".into(),
            vec![RouteCandidate::new("ollama_local", "m"); 5],
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_candle_window() {
        let mut config = Config::default();
        config.market.min_candles = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_decision_scores() {
        let mut config = Config::default();
        config.decision.min_trade_edge = 150.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("decision.min_trade_edge must be between 0 and 100"));

        let mut config = Config::default();
        config.decision.atr_pct_low_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_keys_not_serialized() {
        let mut config = Config::default();
        config.market.api_key = Some("td-secret".into());
        config.news.api_key = Some("na-secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("td-secret"));
        assert!(!json.contains("na-secret"));
        assert!(!format!("{:?}", config).contains("td-secret"));
    }
}
