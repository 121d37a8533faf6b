//! Safety Policy
//!
//! Applied to every synthesized recommendation before it leaves the
//! synthesizer:
//! - Forbidden promotional phrases are removed (case-insensitive); their
//!   presence forces the action to WAIT and caps confidence
//! - The research disclaimer is appended exactly once

use regex::Regex;

use crate::constants::safety as safety_constants;
use crate::types::{Action, FxError, Recommendation, Result};

/// What the policy changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyVerdict {
    pub forbidden_found: Vec<String>,
    pub disclaimer_added: bool,
}

impl SafetyVerdict {
    pub fn forced_wait(&self) -> bool {
        !self.forbidden_found.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    patterns: Vec<(String, Regex)>,
    disclaimer: String,
    max_confidence_on_violation: f64,
}

impl SafetyPolicy {
    pub fn new(phrases: &[&str], disclaimer: &str, max_confidence_on_violation: f64) -> Result<Self> {
        let patterns = phrases
            .iter()
            .map(|phrase| {
                Regex::new(&format!(r"(?i){}", regex::escape(phrase)))
                    .map(|re| (phrase.to_string(), re))
                    .map_err(|e| FxError::Config(format!("Invalid safety phrase '{}': {}", phrase, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            disclaimer: disclaimer.to_string(),
            max_confidence_on_violation,
        })
    }

    pub fn standard() -> Self {
        let patterns = safety_constants::FORBIDDEN_PHRASES
            .iter()
            .filter_map(|phrase| {
                Regex::new(&format!(r"(?i){}", regex::escape(phrase)))
                    .ok()
                    .map(|re| (phrase.to_string(), re))
            })
            .collect();

        Self {
            patterns,
            disclaimer: safety_constants::DISCLAIMER.to_string(),
            max_confidence_on_violation: safety_constants::FORBIDDEN_PHRASE_MAX_CONFIDENCE,
        }
    }

    pub fn disclaimer(&self) -> &str {
        &self.disclaimer
    }

    /// Phrases present in `text`
    pub fn violations(&self, text: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(phrase, _)| phrase.clone())
            .collect()
    }

    /// Sanitize a recommendation in place
    pub fn apply(&self, recommendation: &mut Recommendation) -> SafetyVerdict {
        let mut verdict = SafetyVerdict {
            forbidden_found: self.violations(&recommendation.brief),
            disclaimer_added: false,
        };

        if verdict.forced_wait() {
            let mut brief = recommendation.brief.clone();
            for (_, re) in &self.patterns {
                brief = re.replace_all(&brief, "").into_owned();
            }
            recommendation.brief = collapse_spaces(&brief);
            recommendation.action = Action::Wait;
            recommendation.confidence = recommendation
                .confidence
                .min(self.max_confidence_on_violation);
        }

        if !recommendation.brief.contains(&self.disclaimer) {
            let body = recommendation.brief.trim_end();
            recommendation.brief = if body.is_empty() {
                self.disclaimer.clone()
            } else {
                format!("{}\n\n{}", body, self.disclaimer)
            };
            verdict.disclaimer_added = true;
        }

        verdict
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

fn collapse_spaces(text: &str) -> String {
    text.split(' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recommendation(action: Action, confidence: f64, brief: &str) -> Recommendation {
        Recommendation {
            symbol: "EUR/USD".into(),
            timeframe: "1h".into(),
            action,
            confidence,
            brief: brief.into(),
        }
    }

    #[test]
    fn test_clean_brief_only_gets_disclaimer() {
        let policy = SafetyPolicy::standard();
        let mut rec = recommendation(Action::Call, 0.7, "Momentum is positive.");
        let verdict = policy.apply(&mut rec);

        assert!(!verdict.forced_wait());
        assert!(verdict.disclaimer_added);
        assert_eq!(rec.action, Action::Call);
        assert_eq!(rec.confidence, 0.7);
        assert!(rec.brief.ends_with(safety_constants::DISCLAIMER));
    }

    #[test]
    fn test_forbidden_phrase_forces_wait() {
        let policy = SafetyPolicy::standard();
        let mut rec = recommendation(Action::Put, 0.9, "This is a SURE WIN setup with Guaranteed Profit.");
        let verdict = policy.apply(&mut rec);

        assert_eq!(verdict.forbidden_found, vec!["guaranteed profit", "sure win"]);
        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.confidence, 0.3);
        assert!(!rec.brief.to_lowercase().contains("sure win"));
        assert!(!rec.brief.to_lowercase().contains("guaranteed profit"));
    }

    #[test]
    fn test_low_confidence_is_not_raised() {
        let policy = SafetyPolicy::standard();
        let mut rec = recommendation(Action::Call, 0.1, "sure win");
        policy.apply(&mut rec);
        assert_eq!(rec.confidence, 0.1);
    }

    #[test]
    fn test_disclaimer_is_idempotent() {
        let policy = SafetyPolicy::standard();
        let mut rec = recommendation(Action::Wait, 0.5, "Range-bound.");
        policy.apply(&mut rec);
        let once = rec.brief.clone();
        let verdict = policy.apply(&mut rec);
        assert!(!verdict.disclaimer_added);
        assert_eq!(rec.brief, once);
        assert_eq!(rec.brief.matches(safety_constants::DISCLAIMER).count(), 1);
    }

    #[test]
    fn test_custom_phrases_are_escaped() {
        let policy = SafetyPolicy::new(&["100% (risk-free)"], "Disclaimer.", 0.2).unwrap();
        assert_eq!(policy.violations("a 100% (RISK-FREE) trade"), vec!["100% (risk-free)"]);
        assert!(policy.violations("100 risk free").is_empty());
    }
}
