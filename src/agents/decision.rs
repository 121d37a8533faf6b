//! Deterministic Decision
//!
//! Fixes the action and a calibrated confidence before the synthesizer runs.
//! The model only explains the decision; it never picks the side.
//!
//! ## Scoring
//!
//! | Signal | Bull | Bear | No-trade |
//! |--------|------|------|----------|
//! | Technical bias | 20 + strength/5 (max 20) | same | NEUTRAL: 10 |
//! | Indicator trend | 15 | 15 | NEUTRAL: 10 |
//! | Close vs SMA200 | above: 10 | below: 10 | |
//! | Fresh EMA9/SMA50 cross | 10 | 10 | none: 5 |
//! | ROC 5 | > 0: 5 | < 0: 5 | |
//! | RSI delta 1 and 5 | both up: 5 | both down: 5 | mixed: 5 |
//! | Low volatility | | | 20 |
//!
//! Scores are clamped to `0..=100`.
//!
//! ## Policy
//!
//! 1. No-trade score above the limit: WAIT, confidence capped at 0.4
//! 2. Bull minus bear reaches the trade edge: CALL at technical confidence
//! 3. Bear minus bull reaches the trade edge: PUT at technical confidence
//! 4. Otherwise WAIT at 70% of technical confidence
//!
//! Calibration then caps LOW-news confidence, scales conflicts by 0.8, and
//! caps any WAIT at 0.5.

use serde::Serialize;
use tracing::debug;

use crate::constants::{decision as decision_constants, pipeline as pipeline_constants};
use crate::features::{Crossover, FeatureSnapshot, ValidationStatus};
use crate::types::{Action, Bias, NewsQuality, TechnicalView};

/// Flag the technical analyst sets when its answer could not be read
const PARSING_FAILED_FLAG: &str = "PARSING_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct DecisionScores {
    pub bull: f64,
    pub bear: f64,
    pub no_trade: f64,
}

impl DecisionScores {
    fn clamped(self) -> Self {
        Self {
            bull: self.bull.clamp(0.0, 100.0),
            bear: self.bear.clamp(0.0, 100.0),
            no_trade: self.no_trade.clamp(0.0, 100.0),
        }
    }
}

/// Why a decision leans away from trading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    LowVolatility,
    NoFreshCrossover,
    WeakMomentum,
    InsufficientData,
    ConflictTrendStructure,
    ParsingFailed,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowVolatility => write!(f, "LOW_VOLATILITY"),
            Self::NoFreshCrossover => write!(f, "NO_FRESH_CROSSOVER"),
            Self::WeakMomentum => write!(f, "WEAK_MOMENTUM"),
            Self::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
            Self::ConflictTrendStructure => write!(f, "CONFLICT_TREND_STRUCTURE"),
            Self::ParsingFailed => write!(f, "PARSING_FAILED"),
        }
    }
}

/// Action and confidence the synthesizer must keep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: f64,
    pub scores: DecisionScores,
    pub reason_codes: Vec<ReasonCode>,
}

impl Decision {
    pub fn has(&self, code: ReasonCode) -> bool {
        self.reason_codes.contains(&code)
    }

    pub fn reason_list(&self) -> String {
        if self.reason_codes.is_empty() {
            return "NONE".to_string();
        }
        self.reason_codes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_prompt_text(&self) -> String {
        format!(
            "Decided Action (fixed): {}\nDecided Confidence (fixed): {:.4}\nScores: bull={:.1}, bear={:.1}, no_trade={:.1}\nReason Codes: {}",
            self.action,
            self.confidence,
            self.scores.bull,
            self.scores.bear,
            self.scores.no_trade,
            self.reason_list()
        )
    }
}

#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub min_trade_edge: f64,
    pub max_no_trade_score: f64,
    pub max_confidence_when_news_low: f64,
    pub crossover_max_age_bars: usize,
    pub atr_pct_low_threshold: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            min_trade_edge: decision_constants::MIN_TRADE_EDGE,
            max_no_trade_score: decision_constants::MAX_NO_TRADE_SCORE,
            max_confidence_when_news_low: pipeline_constants::MAX_CONFIDENCE_WHEN_NEWS_LOW,
            crossover_max_age_bars: decision_constants::CROSSOVER_MAX_AGE_BARS,
            atr_pct_low_threshold: decision_constants::ATR_PCT_LOW_THRESHOLD,
        }
    }
}

impl DecisionPolicy {
    pub fn decide(
        &self,
        features: &FeatureSnapshot,
        technical: &TechnicalView,
        news_quality: NewsQuality,
    ) -> Decision {
        let scores = self.score(features, technical);
        let reason_codes = self.reason_codes(features, technical);
        let base = technical.confidence.clamp(0.0, 1.0);

        let (action, confidence) = if scores.no_trade > self.max_no_trade_score {
            (Action::Wait, base.min(decision_constants::NO_TRADE_MAX_CONFIDENCE))
        } else if scores.bull - scores.bear >= self.min_trade_edge {
            (Action::Call, base)
        } else if scores.bear - scores.bull >= self.min_trade_edge {
            (Action::Put, base)
        } else {
            (Action::Wait, base * decision_constants::UNDECIDED_CONFIDENCE_FACTOR)
        };

        let confidence = self.calibrate(action, confidence, &reason_codes, news_quality);
        debug!(
            action = %action,
            confidence,
            bull = scores.bull,
            bear = scores.bear,
            no_trade = scores.no_trade,
            "Decision scored"
        );

        Decision {
            action,
            confidence,
            scores,
            reason_codes,
        }
    }

    fn score(&self, features: &FeatureSnapshot, technical: &TechnicalView) -> DecisionScores {
        let mut scores = DecisionScores::default();

        let strength_bonus = (technical.confidence.max(0.0) * 100.0 * 0.2).min(20.0);
        match technical.bias {
            Bias::Bullish => scores.bull += 20.0 + strength_bonus,
            Bias::Bearish => scores.bear += 20.0 + strength_bonus,
            Bias::Neutral => scores.no_trade += 10.0,
        }

        match features.trend {
            Bias::Bullish => scores.bull += 15.0,
            Bias::Bearish => scores.bear += 15.0,
            Bias::Neutral => scores.no_trade += 10.0,
        }

        if let Some(dist) = features.dist_sma200_pct {
            if dist > 0.0 {
                scores.bull += 10.0;
            } else {
                scores.bear += 10.0;
            }
        }

        match features.ema9_sma50_cross {
            None => scores.no_trade += 5.0,
            Some(cross) if self.is_fresh(cross) => match cross.direction {
                Bias::Bullish => scores.bull += 10.0,
                Bias::Bearish => scores.bear += 10.0,
                Bias::Neutral => {}
            },
            Some(_) => {}
        }

        if let Some(roc) = features.roc_5 {
            if roc > 0.0 {
                scores.bull += 5.0;
            } else if roc < 0.0 {
                scores.bear += 5.0;
            }
        }

        if let (Some(d1), Some(d5)) = (features.rsi_delta_1, features.rsi_delta_5) {
            if d1 > 0.0 && d5 > 0.0 {
                scores.bull += 5.0;
            } else if d1 < 0.0 && d5 < 0.0 {
                scores.bear += 5.0;
            } else {
                scores.no_trade += 5.0;
            }
        }

        if self.is_low_volatility(features) {
            scores.no_trade += 20.0;
        }

        scores.clamped()
    }

    fn reason_codes(&self, features: &FeatureSnapshot, technical: &TechnicalView) -> Vec<ReasonCode> {
        let mut codes = Vec::new();

        if self.is_low_volatility(features) {
            codes.push(ReasonCode::LowVolatility);
        }

        let fresh = [features.ema9_sma50_cross, features.sma50_sma200_cross]
            .into_iter()
            .flatten()
            .any(|c| self.is_fresh(c));
        if !fresh {
            codes.push(ReasonCode::NoFreshCrossover);
        }

        let weak = match (features.roc_5, features.roc_20) {
            (Some(r5), Some(r20)) => r5.abs() < 0.02 && r20.abs() < 0.05,
            _ => true,
        };
        if weak {
            codes.push(ReasonCode::WeakMomentum);
        }

        if features.candle_count < decision_constants::FULL_HISTORY_CANDLES
            || features.status != ValidationStatus::Ok
        {
            codes.push(ReasonCode::InsufficientData);
        }

        if has_conflict(features, technical.bias) {
            codes.push(ReasonCode::ConflictTrendStructure);
        }

        if technical.no_trade_flags.iter().any(|f| f == PARSING_FAILED_FLAG) {
            codes.push(ReasonCode::ParsingFailed);
        }

        codes
    }

    fn calibrate(
        &self,
        action: Action,
        confidence: f64,
        reason_codes: &[ReasonCode],
        news_quality: NewsQuality,
    ) -> f64 {
        let mut calibrated = confidence;
        if news_quality == NewsQuality::Low {
            calibrated = calibrated.min(self.max_confidence_when_news_low);
        }
        if reason_codes.contains(&ReasonCode::ConflictTrendStructure) {
            calibrated *= decision_constants::CONFLICT_CONFIDENCE_FACTOR;
        }
        if action == Action::Wait {
            calibrated = calibrated.min(decision_constants::MAX_WAIT_CONFIDENCE);
        }
        calibrated.clamp(0.0, 1.0)
    }

    fn is_fresh(&self, cross: Crossover) -> bool {
        cross.age_bars <= self.crossover_max_age_bars
    }

    fn is_low_volatility(&self, features: &FeatureSnapshot) -> bool {
        features
            .atr_pct
            .is_some_and(|pct| pct < self.atr_pct_low_threshold)
    }
}

fn opposed(a: Bias, b: Bias) -> bool {
    matches!(
        (a, b),
        (Bias::Bullish, Bias::Bearish) | (Bias::Bearish, Bias::Bullish)
    )
}

/// Technical bias, indicator trend and crossovers pulling in different directions
fn has_conflict(features: &FeatureSnapshot, bias: Bias) -> bool {
    let ema = features.ema9_sma50_cross.map(|c| c.direction);
    let sma = features.sma50_sma200_cross.map(|c| c.direction);

    ema.is_some_and(|d| opposed(bias, d))
        || sma.is_some_and(|d| opposed(bias, d))
        || ema.zip(sma).is_some_and(|(e, s)| opposed(e, s))
        || opposed(bias, features.trend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::features::tests::trending_candles;
    use crate::types::Timeframe;

    fn uptrend() -> FeatureSnapshot {
        build_features("EUR/USD", Timeframe::H1, &trending_candles(300, 0.0005), 200).unwrap()
    }

    fn view(bias: Bias, confidence: f64) -> TechnicalView {
        TechnicalView {
            bias,
            confidence,
            ..Default::default()
        }
    }

    /// Snapshot with no directional evidence at all
    fn flat() -> FeatureSnapshot {
        FeatureSnapshot {
            trend: Bias::Neutral,
            dist_sma200_pct: None,
            ema9_sma50_cross: None,
            sma50_sma200_cross: None,
            roc_5: None,
            roc_20: None,
            rsi_delta_1: None,
            rsi_delta_5: None,
            atr_pct: Some(1.0),
            ..uptrend()
        }
    }

    #[test]
    fn test_aligned_uptrend_is_call_at_technical_confidence() {
        let decision = DecisionPolicy::default().decide(&uptrend(), &view(Bias::Bullish, 0.7), NewsQuality::High);
        assert_eq!(decision.action, Action::Call);
        assert_eq!(decision.confidence, 0.7);
        assert!(decision.scores.bull - decision.scores.bear >= 15.0);
        assert!(!decision.has(ReasonCode::ConflictTrendStructure));
    }

    #[test]
    fn test_aligned_downtrend_is_put() {
        let snapshot =
            build_features("EUR/USD", Timeframe::H1, &trending_candles(300, -0.0005), 200).unwrap();
        let decision = DecisionPolicy::default().decide(&snapshot, &view(Bias::Bearish, 0.65), NewsQuality::Medium);
        assert_eq!(decision.action, Action::Put);
        assert_eq!(decision.confidence, 0.65);
    }

    #[test]
    fn test_no_trade_score_forces_wait() {
        let snapshot = FeatureSnapshot {
            atr_pct: Some(0.01),
            rsi_delta_1: Some(1.0),
            rsi_delta_5: Some(-1.0),
            ..flat()
        };
        let decision = DecisionPolicy::default().decide(&snapshot, &view(Bias::Neutral, 0.9), NewsQuality::High);
        // 10 + 10 + 5 + 5 + 20
        assert_eq!(decision.scores.no_trade, 50.0);
        assert_eq!(decision.action, Action::Wait);
        assert_eq!(decision.confidence, 0.4);
        assert!(decision.has(ReasonCode::LowVolatility));
    }

    #[test]
    fn test_missing_edge_is_wait_at_reduced_confidence() {
        let decision = DecisionPolicy::default().decide(&flat(), &view(Bias::Neutral, 0.6), NewsQuality::High);
        assert_eq!(decision.scores.bull, 0.0);
        assert_eq!(decision.scores.bear, 0.0);
        assert_eq!(decision.action, Action::Wait);
        assert!((decision.confidence - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_wait_confidence_capped_at_half() {
        let decision = DecisionPolicy::default().decide(&flat(), &view(Bias::Neutral, 1.0), NewsQuality::High);
        assert_eq!(decision.action, Action::Wait);
        assert_eq!(decision.confidence, 0.5);
    }

    #[test]
    fn test_low_news_caps_confidence() {
        let decision = DecisionPolicy::default().decide(&uptrend(), &view(Bias::Bullish, 0.9), NewsQuality::Low);
        assert_eq!(decision.action, Action::Call);
        assert_eq!(decision.confidence, 0.6);
    }

    #[test]
    fn test_conflict_scales_confidence() {
        // Analyst reads bearish while every indicator points up
        let decision = DecisionPolicy::default().decide(&uptrend(), &view(Bias::Bearish, 0.5), NewsQuality::High);
        assert!(decision.has(ReasonCode::ConflictTrendStructure));
        assert_eq!(decision.action, Action::Wait);
        assert!((decision.confidence - 0.5 * 0.7 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_crossover_scores_and_clears_reason() {
        let fresh = FeatureSnapshot {
            ema9_sma50_cross: Some(Crossover {
                direction: Bias::Bullish,
                age_bars: 3,
            }),
            ..uptrend()
        };
        let stale = FeatureSnapshot {
            ema9_sma50_cross: Some(Crossover {
                direction: Bias::Bullish,
                age_bars: 30,
            }),
            ..uptrend()
        };
        let policy = DecisionPolicy::default();
        let technical = view(Bias::Bullish, 0.7);

        let with_fresh = policy.decide(&fresh, &technical, NewsQuality::High);
        let with_stale = policy.decide(&stale, &technical, NewsQuality::High);
        assert_eq!(with_fresh.scores.bull, with_stale.scores.bull + 10.0);
        assert!(!with_fresh.has(ReasonCode::NoFreshCrossover));
        assert!(with_stale.has(ReasonCode::NoFreshCrossover));
    }

    #[test]
    fn test_reason_codes_for_short_history_and_parse_failure() {
        let short = build_features("EUR/USD", Timeframe::H1, &trending_candles(60, 0.0005), 30).unwrap();
        let technical = TechnicalView::fallback(&["PARSING_FAILED"]);
        let decision = DecisionPolicy::default().decide(&short, &technical, NewsQuality::High);
        assert!(decision.has(ReasonCode::InsufficientData));
        assert!(decision.has(ReasonCode::ParsingFailed));
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_prompt_text() {
        let decision = Decision {
            action: Action::Put,
            confidence: 0.55,
            scores: DecisionScores {
                bull: 5.0,
                bear: 45.0,
                no_trade: 10.0,
            },
            reason_codes: vec![ReasonCode::WeakMomentum, ReasonCode::ConflictTrendStructure],
        };
        assert_eq!(
            decision.to_prompt_text(),
            "Decided Action (fixed): PUT\nDecided Confidence (fixed): 0.5500\nScores: bull=5.0, bear=45.0, no_trade=10.0\nReason Codes: WEAK_MOMENTUM, CONFLICT_TREND_STRUCTURE"
        );
        assert_eq!(
            serde_json::to_value(&decision).unwrap()["reason_codes"][1],
            "CONFLICT_TREND_STRUCTURE"
        );
    }
}
