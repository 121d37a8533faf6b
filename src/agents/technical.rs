//! Technical Analyst

use tracing::{debug, instrument, warn};

use super::prompt::PromptTemplates;
use super::{AgentContext, AgentRun};
use crate::ai::{ExpectedFormat, Task};
use crate::features::FeatureSnapshot;
use crate::types::{Bias, TechnicalView, json_f64, json_string, json_string_array};

const REQUIRED_KEYS: &[&str] = &["bias", "confidence"];

pub struct TechnicalAnalyst {
    ctx: AgentContext,
}

impl TechnicalAnalyst {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    /// Interpret a feature snapshot
    ///
    /// A routing failure still returns a run: the view is neutral with an
    /// `LLM_ERROR` flag and the exchange carries the error for the caller.
    #[instrument(skip(self, snapshot), fields(symbol = %snapshot.symbol))]
    pub async fn analyze(&self, snapshot: &FeatureSnapshot) -> AgentRun<TechnicalView> {
        let request = self.ctx.router.prepare(
            Task::TechAnalysis,
            PromptTemplates::technical(&snapshot.symbol, snapshot.timeframe.as_str()),
            snapshot.to_prompt_text(),
            ExpectedFormat::json(REQUIRED_KEYS),
        );
        let exchange = self.ctx.router.exchange(self.ctx.branch, request).await;

        let view = match (&exchange.response.error, &exchange.response.json) {
            (Some(err), _) => {
                warn!(error = %err, "Technical analysis routing failed");
                TechnicalView::fallback(&["PARSING_FAILED", "LLM_ERROR"])
            }
            (None, Some(json)) => parse_view(json).unwrap_or_else(|| {
                warn!("Technical analysis output did not match the schema");
                TechnicalView::fallback(&["PARSING_FAILED"])
            }),
            (None, None) => TechnicalView::fallback(&["PARSING_FAILED"]),
        };

        debug!(bias = %view.bias, confidence = view.confidence, "Technical view ready");
        AgentRun::routed(view, exchange)
    }
}

fn parse_view(json: &serde_json::Value) -> Option<TechnicalView> {
    let bias: Bias = json_string(json, "bias")?.parse().ok()?;
    let confidence = json_f64(json, "confidence")?;
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    Some(TechnicalView {
        bias,
        confidence,
        evidence: json_string_array(json, "evidence"),
        contradictions: json_string_array(json, "contradictions"),
        setup_type: json_string(json, "setup_type").filter(|s| !s.trim().is_empty() && s.as_str() != "null"),
        no_trade_flags: json_string_array(json, "no_trade_flags"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{context, failing_context};
    use crate::features::build_features;
    use crate::features::tests::trending_candles;
    use crate::types::Timeframe;
    use serde_json::json;

    fn snapshot() -> FeatureSnapshot {
        build_features("EUR/USD", Timeframe::H1, &trending_candles(250, 0.0004), 200).unwrap()
    }

    #[test]
    fn test_parse_view() {
        let view = parse_view(&json!({
            "bias": "bullish",
            "confidence": "0.65",
            "evidence": ["Price above SMA200"],
            "contradictions": [],
            "setup_type": null,
            "no_trade_flags": []
        }))
        .unwrap();
        assert_eq!(view.bias, Bias::Bullish);
        assert_eq!(view.confidence, 0.65);
        assert_eq!(view.evidence, vec!["Price above SMA200"]);
        assert!(view.setup_type.is_none());
    }

    #[test]
    fn test_parse_view_rejects_out_of_range() {
        assert!(parse_view(&json!({"bias": "BULLISH", "confidence": 1.5})).is_none());
        assert!(parse_view(&json!({"bias": "UP", "confidence": 0.5})).is_none());
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let (ctx, backend) = context(&[r#"{"bias":"BULLISH","confidence":0.7,"evidence":["RSI 72"]}"#]);
        let run = TechnicalAnalyst::new(ctx).analyze(&snapshot()).await;

        assert_eq!(run.output.bias, Bias::Bullish);
        let exchange = run.exchange.unwrap();
        assert!(exchange.error().is_none());
        assert_eq!(exchange.request.task, Task::TechAnalysis);
        assert!(exchange.request.user_content.contains("**Current Price:**"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_flagged() {
        let (ctx, _) = context(&[r#"{"bias":"SIDEWAYS","confidence":0.4}"#]);
        let run = TechnicalAnalyst::new(ctx).analyze(&snapshot()).await;
        assert_eq!(run.output.bias, Bias::Neutral);
        assert_eq!(run.output.no_trade_flags, vec!["PARSING_FAILED"]);
        assert!(run.exchange.unwrap().error().is_none());
    }

    #[tokio::test]
    async fn test_routing_failure_keeps_error_on_exchange() {
        let ctx = failing_context();
        let run = TechnicalAnalyst::new(ctx).analyze(&snapshot()).await;
        assert!(run.output.no_trade_flags.contains(&"LLM_ERROR".to_string()));
        assert!(run.exchange.unwrap().error().is_some());
    }
}
