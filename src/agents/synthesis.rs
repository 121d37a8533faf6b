//! Synthesizer
//!
//! Explains the deterministic [`Decision`] as one [`Recommendation`]. The
//! model writes the brief; the action and confidence are decided upstream.
//!
//! ## Post-processing order
//!
//! 1. Route with field rules on `action` and `confidence`
//! 2. Malformed answer: re-ask for strict JSON, up to `corrective_retries`
//! 3. Still malformed: fall back to the decision with a fixed brief
//! 4. Force the decided action and confidence
//! 5. Apply the [`SafetyPolicy`]
//!
//! A repair round reuses the same call with a [`RepairContext`] appended to
//! the prompt and may only lower the decided confidence.

use tracing::{info, instrument, warn};

use super::decision::Decision;
use super::prompt::PromptTemplates;
use super::safety::SafetyPolicy;
use super::{AgentContext, AgentRun};
use crate::ai::{ExpectedFormat, LlmExchange, LlmResponse, Task};
use crate::constants::pipeline as pipeline_constants;
use crate::types::{
    Action, BackendFailure, FailureKind, FxError, NewsDigest, NewsView, Recommendation, Result,
    TechnicalView, Timeframe, VerificationIssue, VerificationReport, json_f64, json_string,
    truncate_chars,
};

const REQUIRED_KEYS: &[&str] = &["action", "confidence", "brief"];

/// Raw output quoted back to the model in a corrective re-ask
const CORRECTION_QUOTE_CHARS: usize = 4000;

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub headlines: usize,
    /// Strict-JSON re-asks after a malformed answer
    pub corrective_retries: u8,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            headlines: pipeline_constants::SYNTHESIS_HEADLINES,
            corrective_retries: pipeline_constants::SYNTHESIS_CORRECTIVE_RETRIES,
        }
    }
}

/// Verifier feedback handed back to the synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct RepairContext {
    pub previous: Recommendation,
    pub issues: Vec<VerificationIssue>,
    pub suggested_fix: Option<String>,
    /// 1-based repair round
    pub iteration: u32,
}

impl RepairContext {
    pub fn new(previous: &Recommendation, report: &VerificationReport, iteration: u32) -> Self {
        Self {
            previous: previous.clone(),
            issues: report.issues.clone(),
            suggested_fix: report.suggested_fix.clone(),
            iteration,
        }
    }

    fn to_prompt_text(&self) -> String {
        let mut out = format!(
            "Corrective Revision (round {}):\nA reviewer rejected the previous recommendation.\n\nPrevious Recommendation:\n{}\n\nIssues:",
            self.iteration,
            self.previous.author_output()
        );
        for issue in &self.issues {
            out.push_str(&format!("\n- [{}] {}: {}", issue.severity, issue.code, issue.message));
            if let Some(evidence) = &issue.evidence {
                out.push_str(&format!(" (evidence: {})", evidence));
            }
        }
        if let Some(fix) = &self.suggested_fix {
            out.push_str(&format!("\n\nSuggested Fix: {}", fix));
        }
        out.push_str("\n\nReturn a corrected recommendation that resolves every issue. You may lower the confidence, never raise it.");
        out
    }
}

/// Everything one synthesis call needs
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    pub technical: &'a TechnicalView,
    pub digest: &'a NewsDigest,
    pub news: &'a NewsView,
    pub decision: &'a Decision,
    pub repair: Option<&'a RepairContext>,
}

/// How one routed answer was read
enum Reading {
    Parsed(Recommendation),
    /// Reached a model but the text is unusable; worth a corrective re-ask
    Malformed(String),
    /// No model answered
    Failed(FxError),
}

pub struct Synthesizer {
    ctx: AgentContext,
    config: SynthesizerConfig,
    safety: SafetyPolicy,
}

impl Synthesizer {
    pub fn new(ctx: AgentContext, config: SynthesizerConfig, safety: SafetyPolicy) -> Self {
        Self { ctx, config, safety }
    }

    /// Produce a recommendation; exchanges are returned even on failure.
    ///
    /// `Err` only when no backend answered the first call. Malformed output
    /// never fails the run: it ends in the decision fallback.
    #[instrument(skip(self, input), fields(symbol = %input.symbol, action = %input.decision.action, repair = ?input.repair.map(|r| r.iteration)))]
    pub async fn synthesize(&self, input: &SynthesisInput<'_>) -> AgentRun<Result<Recommendation>> {
        let request = self.ctx.router.prepare(
            Task::Synthesis,
            PromptTemplates::synthesis(),
            self.user_prompt(input),
            output_format(),
        );
        let exchange = self.ctx.router.exchange(self.ctx.branch, request).await;

        let mut reading = self.read(input, &exchange.response);
        let mut raw = exchange.response.text.clone();
        let mut corrections: Vec<LlmExchange> = Vec::new();

        while let Reading::Malformed(reason) = &reading {
            if corrections.len() >= usize::from(self.config.corrective_retries) {
                break;
            }
            warn!(
                attempt = corrections.len() + 1,
                max = self.config.corrective_retries,
                reason = %reason,
                "Synthesis output malformed, asking for strict JSON"
            );
            let correction = self.correct(input, &raw).await;
            reading = match self.read(input, &correction.response) {
                // The first answer reached a model; a transport failure now just ends the re-asks
                Reading::Failed(e) => Reading::Malformed(e.to_string()),
                other => other,
            };
            raw = correction.response.text.clone();
            corrections.push(correction);
        }

        let result = match reading {
            Reading::Parsed(rec) => Ok(self.finish(input, self.enforce(input, rec))),
            Reading::Malformed(reason) => {
                warn!(reason = %reason, corrections = corrections.len(), "Synthesis unusable, falling back to decided action");
                Ok(self.finish(input, fallback(input)))
            }
            Reading::Failed(e) => Err(e),
        };
        if let Ok(rec) = &result {
            info!(action = %rec.action, confidence = rec.confidence, "Recommendation synthesized");
        }
        AgentRun::routed(result, exchange).with_corrections(corrections)
    }

    async fn correct(&self, input: &SynthesisInput<'_>, raw: &str) -> LlmExchange {
        let user = format!(
            "Convert this into STRICT valid JSON.\nKeep action {} and confidence {:.4} exactly.\n\nInvalid output:\n{}",
            input.decision.action,
            input.decision.confidence,
            truncate_chars(raw, CORRECTION_QUOTE_CHARS)
        );
        let request = self.ctx.router.prepare(
            Task::Synthesis,
            PromptTemplates::strict_json(),
            user,
            output_format(),
        );
        self.ctx.router.exchange(self.ctx.branch, request).await
    }

    fn read(&self, input: &SynthesisInput<'_>, response: &LlmResponse) -> Reading {
        if let Some(err) = &response.error {
            if err.last_failure().kind == FailureKind::InvalidResponse {
                return Reading::Malformed(err.last_failure().message.clone());
            }
            return Reading::Failed(FxError::Route(err.clone()));
        }
        let Some(json) = response.json.as_ref() else {
            return Reading::Malformed("Response carries no JSON payload".to_string());
        };
        match parse_recommendation(json, input.symbol, input.timeframe) {
            Ok(rec) => Reading::Parsed(rec),
            Err(e) => Reading::Malformed(e.message),
        }
    }

    /// The model never picks the side; a repair round may only lower confidence
    fn enforce(&self, input: &SynthesisInput<'_>, mut rec: Recommendation) -> Recommendation {
        let decision = input.decision;
        if rec.action != decision.action {
            warn!(model = %rec.action, decided = %decision.action, "Model changed the decided action, overriding");
            rec.action = decision.action;
        }
        rec.confidence = match input.repair {
            Some(_) => rec.confidence.min(decision.confidence),
            None => decision.confidence,
        };
        rec
    }

    fn finish(&self, input: &SynthesisInput<'_>, mut rec: Recommendation) -> Recommendation {
        let verdict = self.safety.apply(&mut rec);
        if verdict.forced_wait() {
            warn!(
                symbol = input.symbol,
                phrases = ?verdict.forbidden_found,
                "Forbidden phrases removed, action forced to WAIT"
            );
        }
        rec
    }

    fn user_prompt(&self, input: &SynthesisInput<'_>) -> String {
        let mut news = Vec::new();
        if input.digest.is_low() {
            news.push("News Quality: LOW (ignore news, rely on technical analysis)".to_string());
        } else {
            news.push(format!("News Quality: {}", input.digest.quality));
            news.push(format!("News Sentiment: {}", input.news.sentiment));
            news.push(format!("News Impact Score: {:.2}", input.news.impact_score));
            news.push(format!("News Summary: {}", input.news.summary));
            if !input.digest.articles.is_empty() {
                news.push("Top News Headlines:".to_string());
                news.extend(
                    input
                        .digest
                        .articles
                        .iter()
                        .take(self.config.headlines)
                        .map(|a| format!("- {}", a.title)),
                );
            }
        }

        let decision = input.decision;
        let mut out = format!(
            "Instrument: {} ({})\n\nDecision:\n{}\n\nTechnical Analysis:\n{}\n\nNews Context:\n{}\n\nConstraints: action MUST be {}, confidence MUST be {:.4}",
            input.symbol,
            input.timeframe,
            decision.to_prompt_text(),
            input.technical.summary(),
            news.join("\n"),
            decision.action,
            decision.confidence
        );
        if let Some(repair) = input.repair {
            out.push_str("\n\n");
            out.push_str(&repair.to_prompt_text());
        }
        out
    }
}

fn output_format() -> ExpectedFormat {
    ExpectedFormat::json(REQUIRED_KEYS)
        .one_of("action", &["CALL", "PUT", "WAIT"])
        .within("confidence", 0.0, 1.0)
}

/// Recommendation built from the decision alone
fn fallback(input: &SynthesisInput<'_>) -> Recommendation {
    Recommendation {
        symbol: input.symbol.to_string(),
        timeframe: input.timeframe.to_string(),
        action: input.decision.action,
        confidence: input.decision.confidence,
        brief: pipeline_constants::FALLBACK_BRIEF.to_string(),
    }
}

fn parse_recommendation(
    json: &serde_json::Value,
    symbol: &str,
    timeframe: Timeframe,
) -> std::result::Result<Recommendation, BackendFailure> {
    let action: Action = json_string(json, "action")
        .ok_or_else(|| BackendFailure::invalid_response("Field 'action' must be a string"))?
        .parse()
        .map_err(BackendFailure::invalid_response)?;

    let confidence = json_f64(json, "confidence")
        .ok_or_else(|| BackendFailure::invalid_response("Field 'confidence' must be a number"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(BackendFailure::invalid_response(format!(
            "Invalid confidence: {}. Must be between 0.0 and 1.0",
            confidence
        )));
    }

    let brief = json_string(json, "brief")
        .map(|b| normalize_brief(&b))
        .filter(|b| !b.is_empty())
        .ok_or_else(|| BackendFailure::invalid_response("Field 'brief' must be a non-empty string"))?;

    Ok(Recommendation {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        action,
        confidence,
        brief,
    })
}

/// Strip wrapping quotes and fold the brief onto one line
fn normalize_brief(brief: &str) -> String {
    let trimmed = brief.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::decision::DecisionScores;
    use crate::agents::testing::{context, failing_context};
    use crate::constants::safety as safety_constants;
    use crate::types::{Bias, NewsQuality, Severity};
    use serde_json::json;

    const BUY: &str = r#"{"action":"BUY","confidence":0.7,"brief":"Buy now."}"#;
    const OVERCONFIDENT: &str = r#"{"action":"CALL","confidence":1.4,"brief":"Strong trend."}"#;

    fn digest(quality: NewsQuality) -> NewsDigest {
        NewsDigest {
            quality,
            ..NewsDigest::degraded("EURUSD", 24, "test")
        }
    }

    fn decided(action: Action, confidence: f64) -> Decision {
        Decision {
            action,
            confidence,
            scores: DecisionScores {
                bull: 50.0,
                bear: 10.0,
                no_trade: 5.0,
            },
            reason_codes: Vec::new(),
        }
    }

    fn synthesizer(ctx: AgentContext) -> Synthesizer {
        Synthesizer::new(ctx, SynthesizerConfig::default(), SafetyPolicy::standard())
    }

    async fn run_decided(
        synth: &Synthesizer,
        decision: &Decision,
        repair: Option<&RepairContext>,
    ) -> AgentRun<Result<Recommendation>> {
        let technical = TechnicalView {
            bias: Bias::Bullish,
            confidence: 0.8,
            ..Default::default()
        };
        let news = NewsView::neutral("quiet");
        let digest = digest(NewsQuality::High);
        let input = SynthesisInput {
            symbol: "EURUSD",
            timeframe: Timeframe::H1,
            technical: &technical,
            digest: &digest,
            news: &news,
            decision,
            repair,
        };
        synth.synthesize(&input).await
    }

    async fn run(synth: &Synthesizer) -> AgentRun<Result<Recommendation>> {
        run_decided(synth, &decided(Action::Call, 0.65), None).await
    }

    #[test]
    fn test_normalize_brief() {
        assert_eq!(normalize_brief("\"Uptrend\nholds.  RSI firm\""), "Uptrend holds. RSI firm");
    }

    #[test]
    fn test_parse_recommendation_rejects_bad_fields() {
        let err = parse_recommendation(
            &json!({"action": "BUY", "confidence": 0.5, "brief": "x"}),
            "EURUSD",
            Timeframe::H1,
        )
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidResponse);

        let err = parse_recommendation(
            &json!({"action": "CALL", "confidence": 1.2, "brief": "x"}),
            "EURUSD",
            Timeframe::H1,
        )
        .unwrap_err();
        assert!(err.message.starts_with("Invalid confidence"));
    }

    #[test]
    fn test_output_format_rejects_out_of_vocabulary_values() {
        let format = output_format();
        assert!(format.check(BUY).is_err());
        assert!(format.check(OVERCONFIDENT).is_err());
        assert!(format.check(r#"{"action":"put","confidence":"0.5","brief":"x"}"#).is_ok());
    }

    #[tokio::test]
    async fn test_synthesize_applies_decision_and_disclaimer() {
        let (ctx, backend) = context(&[r#"{"action":"CALL","confidence":0.9,"brief":"Trend intact."}"#]);
        let result = run(&synthesizer(ctx)).await;
        let rec = result.output.unwrap();
        assert_eq!(rec.action, Action::Call);
        assert_eq!(rec.confidence, 0.65);
        assert_eq!(rec.timeframe, "1h");
        assert!(rec.brief.starts_with("Trend intact."));
        assert!(rec.brief.ends_with(safety_constants::DISCLAIMER));
        assert!(result.corrections.is_empty());

        let seen = backend.seen.lock().unwrap();
        let prompt = &seen[0].user_content;
        assert!(prompt.contains("Decided Action (fixed): CALL"));
        assert!(prompt.contains("Constraints: action MUST be CALL, confidence MUST be 0.6500"));
    }

    #[tokio::test]
    async fn test_model_cannot_change_decided_action() {
        let (ctx, _) = context(&[r#"{"action":"PUT","confidence":0.3,"brief":"Looks weak."}"#]);
        let rec = run_decided(&synthesizer(ctx), &decided(Action::Wait, 0.35), None)
            .await
            .output
            .unwrap();
        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.confidence, 0.35);
    }

    #[tokio::test]
    async fn test_forbidden_phrase_forces_wait() {
        let (ctx, _) = context(&[r#"{"action":"CALL","confidence":0.8,"brief":"A sure win setup."}"#]);
        let rec = run(&synthesizer(ctx)).await.output.unwrap();
        assert_eq!(rec.action, Action::Wait);
        assert!(rec.confidence <= 0.3);
        assert!(!rec.brief.to_lowercase().contains("sure win"));
    }

    #[tokio::test]
    async fn test_malformed_answer_is_corrected_with_strict_json() {
        // Candidate, its retry, and the last resort all answer BUY
        let (ctx, backend) = context(&[
            BUY,
            BUY,
            BUY,
            r#"{"action":"CALL","confidence":0.65,"brief":"Higher highs hold."}"#,
        ]);
        let result = run(&synthesizer(ctx)).await;

        let rec = result.output.unwrap();
        assert_eq!(rec.action, Action::Call);
        assert!(rec.brief.starts_with("Higher highs hold."));
        assert_eq!(result.corrections.len(), 1);
        assert_eq!(backend.calls(), 4);
        assert!(result.exchange.unwrap().error().is_some());

        let seen = backend.seen.lock().unwrap();
        let correction = &seen[3];
        assert!(correction.system_prompt.starts_with("Return ONLY valid JSON"));
        assert!(correction.user_content.contains("Invalid output:\n{\"action\":\"BUY\""));
        assert!(correction.user_content.contains("Keep action CALL and confidence 0.6500"));
    }

    #[tokio::test]
    async fn test_exhausted_corrections_fall_back_to_decision() {
        let (ctx, backend) = context(&[OVERCONFIDENT]);
        let result = run_decided(&synthesizer(ctx), &decided(Action::Put, 0.55), None).await;

        let rec = result.output.as_ref().unwrap();
        assert_eq!(rec.action, Action::Put);
        assert_eq!(rec.confidence, 0.55);
        assert!(rec.brief.starts_with(pipeline_constants::FALLBACK_BRIEF));
        assert!(rec.brief.ends_with(safety_constants::DISCLAIMER));
        assert_eq!(result.corrections.len(), 2);
        // Three routed calls per exchange: candidate, retry, last resort
        assert_eq!(backend.calls(), 9);
        assert!(result.last_exchange().unwrap().raw_text().contains("1.4"));
    }

    #[tokio::test]
    async fn test_zero_corrective_retries_falls_back_immediately() {
        let (ctx, backend) = context(&[BUY]);
        let config = SynthesizerConfig {
            corrective_retries: 0,
            ..SynthesizerConfig::default()
        };
        let synth = Synthesizer::new(ctx, config, SafetyPolicy::standard());
        let result = run(&synth).await;
        assert!(result.output.unwrap().brief.starts_with(pipeline_constants::FALLBACK_BRIEF));
        assert!(result.corrections.is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_routing_failure_is_error() {
        let result = run(&synthesizer(failing_context())).await;
        assert!(matches!(result.output, Err(FxError::Route(_))));
        assert!(result.corrections.is_empty());
    }

    #[tokio::test]
    async fn test_repair_context_in_prompt_and_may_only_lower_confidence() {
        let (ctx, backend) = context(&[r#"{"action":"CALL","confidence":0.3,"brief":"Mixed signals."}"#]);
        let previous = Recommendation {
            symbol: "EURUSD".into(),
            timeframe: "1h".into(),
            action: Action::Call,
            confidence: 0.9,
            brief: "Certain rally.".into(),
        };
        let report = VerificationReport::failed(
            VerificationIssue {
                code: "unsupported_claim".into(),
                message: "Certainty not supported".into(),
                severity: Severity::High,
                evidence: None,
            },
            Some("Lower confidence".into()),
        );
        let repair = RepairContext::new(&previous, &report, 1);

        let rec = run_decided(&synthesizer(ctx), &decided(Action::Call, 0.65), Some(&repair))
            .await
            .output
            .unwrap();
        assert_eq!(rec.action, Action::Call);
        assert_eq!(rec.confidence, 0.3);

        let seen = backend.seen.lock().unwrap();
        let prompt = &seen[0].user_content;
        assert!(prompt.contains("Corrective Revision (round 1)"));
        assert!(prompt.contains("[high] unsupported_claim"));
        assert!(prompt.contains("Suggested Fix: Lower confidence"));
    }

    #[tokio::test]
    async fn test_repair_cannot_raise_confidence() {
        let (ctx, _) = context(&[r#"{"action":"CALL","confidence":0.95,"brief":"Revised."}"#]);
        let previous = Recommendation {
            symbol: "EURUSD".into(),
            timeframe: "1h".into(),
            action: Action::Call,
            confidence: 0.65,
            brief: "Trend.".into(),
        };
        let report = VerificationReport::failed(
            VerificationIssue {
                code: "vague".into(),
                message: "Too vague".into(),
                severity: Severity::Low,
                evidence: None,
            },
            None,
        );
        let repair = RepairContext::new(&previous, &report, 2);
        let rec = run_decided(&synthesizer(ctx), &decided(Action::Call, 0.65), Some(&repair))
            .await
            .output
            .unwrap();
        assert_eq!(rec.confidence, 0.65);
    }
}
