//! Analysis Result Types
//!
//! Typed outputs of the four LLM tasks plus the verification report.
//!
//! ## Producers
//!
//! - [`TechnicalView`]: technical analyst
//! - [`NewsView`]: news analyst
//! - [`Recommendation`]: synthesizer, then safety policy
//! - [`VerificationReport`]: verifier, once per run and once per repair

use serde::{Deserialize, Serialize};

use crate::constants::verification as verify_constants;

// =============================================================================
// Technical Analysis
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bias {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

impl std::str::FromStr for Bias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BULLISH" => Ok(Self::Bullish),
            "BEARISH" => Ok(Self::Bearish),
            "NEUTRAL" => Ok(Self::Neutral),
            _ => Err(format!("Unknown bias: {}", s)),
        }
    }
}

/// Technical analyst output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TechnicalView {
    pub bias: Bias,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub contradictions: Vec<String>,
    pub setup_type: Option<String>,
    pub no_trade_flags: Vec<String>,
}

impl TechnicalView {
    /// Neutral view used when the model output cannot be interpreted
    pub fn fallback(flags: &[&str]) -> Self {
        Self {
            no_trade_flags: flags.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn summary(&self) -> String {
        let mut out = format!("Bias: {} ({:.0}%)", self.bias, self.confidence * 100.0);
        if let Some(setup) = &self.setup_type {
            out.push_str(&format!("\nSetup: {}", setup));
        }
        for item in &self.evidence {
            out.push_str(&format!("\n- {}", item));
        }
        if !self.contradictions.is_empty() {
            out.push_str(&format!("\nContradictions: {}", self.contradictions.join("; ")));
        }
        if !self.no_trade_flags.is_empty() {
            out.push_str(&format!("\nNo-trade flags: {}", self.no_trade_flags.join(", ")));
        }
        out
    }
}

// =============================================================================
// News Analysis
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Sentiment {
    #[serde(rename = "POS")]
    Positive,
    #[serde(rename = "NEG")]
    Negative,
    #[default]
    #[serde(rename = "NEU")]
    Neutral,
}

impl Sentiment {
    /// Lenient parse; anything unrecognized is neutral
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "POS" | "POSITIVE" => Self::Positive,
            "NEG" | "NEGATIVE" => Self::Negative,
            _ => Self::Neutral,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "POS"),
            Self::Negative => write!(f, "NEG"),
            Self::Neutral => write!(f, "NEU"),
        }
    }
}

/// News analyst output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsView {
    pub summary: String,
    pub sentiment: Sentiment,
    pub impact_score: f64,
    pub evidence_titles: Vec<String>,
}

impl NewsView {
    pub fn neutral(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            sentiment: Sentiment::Neutral,
            impact_score: 0.0,
            evidence_titles: Vec::new(),
        }
    }
}

// =============================================================================
// Recommendation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Call,
    Put,
    Wait,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CALL" => Ok(Self::Call),
            "PUT" => Ok(Self::Put),
            "WAIT" => Ok(Self::Wait),
            _ => Err(format!("Invalid action: {}. Valid values: CALL, PUT, WAIT", s)),
        }
    }
}

/// Synthesized research recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub timeframe: String,
    pub action: Action,
    pub confidence: f64,
    pub brief: String,
}

impl Recommendation {
    /// Text shown to the verifier as the author output
    pub fn author_output(&self) -> String {
        format!(
            "Action: {}\nBrief: {}\nConfidence: {:.2}%",
            self.action,
            self.brief,
            self.confidence * 100.0
        )
    }
}

// =============================================================================
// Verification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Unknown severities are treated as low
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Verifier verdict; superseded, never mutated, by later repair rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub issues: Vec<VerificationIssue>,
    pub suggested_fix: Option<String>,
    pub policy_version: String,
    /// Backend that produced the report, if any
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl VerificationReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
            suggested_fix: None,
            policy_version: verify_constants::POLICY_VERSION.to_string(),
            backend: None,
            model: None,
        }
    }

    /// Failed report carrying a single issue
    pub fn failed(issue: VerificationIssue, suggested_fix: Option<String>) -> Self {
        Self {
            passed: false,
            issues: vec![issue],
            suggested_fix,
            policy_version: verify_constants::POLICY_VERSION.to_string(),
            backend: None,
            model: None,
        }
    }

    pub fn served_by(mut self, backend: impl Into<String>, model: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self.model = Some(model.into());
        self
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Which agent a stored rationale came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RationaleKind {
    Technical,
    News,
    Synthesis,
}

impl RationaleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "TECHNICAL",
            Self::News => "NEWS",
            Self::Synthesis => "SYNTHESIS",
        }
    }
}

impl std::str::FromStr for RationaleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TECHNICAL" => Ok(Self::Technical),
            "NEWS" => Ok(Self::News),
            "SYNTHESIS" => Ok(Self::Synthesis),
            _ => Err(format!("Unknown rationale kind: {}", s)),
        }
    }
}

impl std::fmt::Display for RationaleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse() {
        assert_eq!("call".parse::<Action>().unwrap(), Action::Call);
        assert_eq!(" WAIT ".parse::<Action>().unwrap(), Action::Wait);
        assert!("BUY".parse::<Action>().is_err());
    }

    #[test]
    fn test_sentiment_lenient() {
        assert_eq!(Sentiment::parse_lenient("pos"), Sentiment::Positive);
        assert_eq!(Sentiment::parse_lenient("NEGATIVE"), Sentiment::Negative);
        assert_eq!(Sentiment::parse_lenient("bullish"), Sentiment::Neutral);
    }

    #[test]
    fn test_severity_lenient_and_ordering() {
        assert_eq!(Severity::parse_lenient("HIGH"), Severity::High);
        assert_eq!(Severity::parse_lenient("critical"), Severity::Low);
        assert!(Severity::High > Severity::Medium);
    }

    #[test]
    fn test_author_output_format() {
        let rec = Recommendation {
            symbol: "EUR/USD".into(),
            timeframe: "1h".into(),
            action: Action::Put,
            confidence: 0.42,
            brief: "Bearish drift".into(),
        };
        assert_eq!(
            rec.author_output(),
            "Action: PUT\nBrief: Bearish drift\nConfidence: 42.00%"
        );
    }

    #[test]
    fn test_highest_severity() {
        let mut report = VerificationReport::passed();
        assert_eq!(report.highest_severity(), None);
        report.issues.push(VerificationIssue {
            code: "a".into(),
            message: "m".into(),
            severity: Severity::Medium,
            evidence: None,
        });
        assert_eq!(report.highest_severity(), Some(Severity::Medium));
    }
}
