//! Pipeline stages and per-stage latency

use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Fixed stage order of one analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    MarketFetch,
    Features,
    TechAnalysis,
    NewsFetch,
    NewsAnalysis,
    Synthesis,
    Verification,
    Persistence,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Self::MarketFetch,
        Self::Features,
        Self::TechAnalysis,
        Self::NewsFetch,
        Self::NewsAnalysis,
        Self::Synthesis,
        Self::Verification,
        Self::Persistence,
    ];

    /// Key used in latency maps, logs and stage failures
    pub const fn key(&self) -> &'static str {
        match self {
            Self::MarketFetch => "market_fetch",
            Self::Features => "features",
            Self::TechAnalysis => "tech_analysis_llm",
            Self::NewsFetch => "news_fetch",
            Self::NewsAnalysis => "news_analysis_llm",
            Self::Synthesis => "synthesis",
            Self::Verification => "verification",
            Self::Persistence => "persistence",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::MarketFetch => "Market fetch",
            Self::Features => "Features",
            Self::TechAnalysis => "Tech analysis (LLM)",
            Self::NewsFetch => "News fetch",
            Self::NewsAnalysis => "News analysis (LLM)",
            Self::Synthesis => "Synthesis (LLM)",
            Self::Verification => "Verification (LLM)",
            Self::Persistence => "Persistence",
        }
    }

    /// Artifact file stem for stages that call a model
    pub const fn artifact_name(&self) -> Option<&'static str> {
        match self {
            Self::TechAnalysis => Some("tech_analysis"),
            Self::NewsAnalysis => Some("news_analysis"),
            Self::Synthesis => Some("synthesis"),
            Self::Verification => Some("verification"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Artifact stem of one repair round
pub fn repair_artifact_name(stage: Stage, iteration: u32) -> String {
    format!("{}_repair_{}", stage.key(), iteration)
}

/// Artifact name for the `n`th strict-JSON re-ask after `base`
pub fn correction_artifact_name(base: &str, n: usize) -> String {
    format!("{}_correction_{}", base, n)
}

/// Elapsed time per stage; a missing entry means the stage was skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageLatency {
    timings: BTreeMap<Stage, Duration>,
}

impl StageLatency {
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.timings.insert(stage, elapsed);
    }

    pub fn get(&self, stage: Stage) -> Option<Duration> {
        self.timings.get(&stage).copied()
    }

    pub fn total(&self) -> Duration {
        self.timings.values().sum()
    }

    /// Every stage in pipeline order
    pub fn iter(&self) -> impl Iterator<Item = (Stage, Option<Duration>)> + '_ {
        Stage::ALL.into_iter().map(|s| (s, self.get(s)))
    }
}

impl Serialize for StageLatency {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Stage::ALL.len()))?;
        for (stage, elapsed) in self.iter() {
            map.serialize_entry(stage.key(), &elapsed.map(|d| d.as_millis() as u64))?;
        }
        map.end()
    }
}
