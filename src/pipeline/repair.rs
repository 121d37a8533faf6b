//! Repair Loop
//!
//! Bounded re-synthesis after a failed verification (hard verifier mode).
//! Each round feeds the previous recommendation plus the verifier's issues
//! and suggested fix back to the synthesizer, then verifies the new answer.
//!
//! The loop stops at the first passing report or after `max_repairs`
//! rounds. It never fails: a round whose synthesis breaks keeps the previous
//! recommendation and report. Persisting the rounds is the caller's job.

use tracing::{info, warn};

use crate::agents::{AgentRun, RepairContext, SynthesisInput, Synthesizer, Verifier};
use crate::ai::LlmExchange;
use crate::types::{Recommendation, VerificationReport};

/// Everything one repair round produced
#[derive(Debug, Clone)]
pub struct RepairRound {
    /// 1-based
    pub iteration: u32,
    pub synthesis: Option<LlmExchange>,
    /// Strict-JSON re-asks made while producing this round's recommendation
    pub corrections: Vec<LlmExchange>,
    /// Set when the corrective synthesis produced no usable recommendation
    pub synthesis_error: Option<String>,
    pub verification: Option<AgentRun<VerificationReport>>,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// Last recommendation produced (the initial one if no round succeeded)
    pub recommendation: Recommendation,
    /// Latest report, unmodified
    pub report: VerificationReport,
    /// Exchange behind `recommendation` when a round replaced it
    pub synthesis: Option<LlmExchange>,
    pub rounds: Vec<RepairRound>,
}

impl RepairOutcome {
    pub fn resolved(&self) -> bool {
        self.report.passed
    }
}

pub struct RepairLoop<'a> {
    synthesizer: &'a Synthesizer,
    verifier: &'a Verifier,
    max_repairs: u32,
}

impl<'a> RepairLoop<'a> {
    pub fn new(synthesizer: &'a Synthesizer, verifier: &'a Verifier, max_repairs: u32) -> Self {
        Self {
            synthesizer,
            verifier,
            max_repairs,
        }
    }

    pub async fn run(
        &self,
        input: SynthesisInput<'_>,
        inputs_summary: &str,
        recommendation: Recommendation,
        report: VerificationReport,
    ) -> RepairOutcome {
        let mut outcome = RepairOutcome {
            recommendation,
            report,
            synthesis: None,
            rounds: Vec::new(),
        };

        for iteration in 1..=self.max_repairs {
            if outcome.report.passed {
                break;
            }
            info!(iteration, max = self.max_repairs, issues = outcome.report.issues.len(), "Attempting repair");

            let context = RepairContext::new(&outcome.recommendation, &outcome.report, iteration);
            let repaired = self
                .synthesizer
                .synthesize(&SynthesisInput {
                    repair: Some(&context),
                    ..input
                })
                .await;

            let last_exchange = repaired.last_exchange().cloned();
            let recommendation = match repaired.output {
                Ok(rec) => rec,
                Err(e) => {
                    warn!(iteration, error = %e, "Repair synthesis failed, keeping previous recommendation");
                    outcome.rounds.push(RepairRound {
                        iteration,
                        synthesis: repaired.exchange,
                        corrections: repaired.corrections,
                        synthesis_error: Some(e.to_string()),
                        verification: None,
                    });
                    continue;
                }
            };

            let verification = self
                .verifier
                .verify("synthesis", inputs_summary, &recommendation.author_output())
                .await;

            if verification.output.passed {
                info!(iteration, "Repair passed verification");
            } else {
                warn!(iteration, issues = verification.output.issues.len(), "Repair still failed verification");
            }

            outcome.recommendation = recommendation;
            outcome.report = verification.output.clone();
            outcome.synthesis = last_exchange;
            outcome.rounds.push(RepairRound {
                iteration,
                synthesis: repaired.exchange,
                corrections: repaired.corrections,
                synthesis_error: None,
                verification: Some(verification),
            });
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{context, failing_context};
    use crate::agents::{AgentContext, Decision, DecisionScores, SafetyPolicy, SynthesizerConfig};
    use crate::constants::pipeline as pipeline_constants;
    use crate::types::{
        Action, NewsDigest, NewsView, Severity, TechnicalView, Timeframe, VerificationIssue,
    };

    const FAILED: &str = r#"{"passed": false, "issues": [{"code": "overconfident", "message": "Too sure", "severity": "high"}], "suggested_fix": "Lower confidence"}"#;
    const PASSED: &str = r#"{"passed": true, "issues": []}"#;
    const REPAIRED: &str = r#"{"action": "CALL", "confidence": 0.4, "brief": "Trend up, moderate conviction."}"#;

    fn initial() -> (Recommendation, VerificationReport) {
        let rec = Recommendation {
            symbol: "EUR/USD".into(),
            timeframe: "1h".into(),
            action: Action::Call,
            confidence: 0.95,
            brief: "Certain breakout.".into(),
        };
        let report = VerificationReport::failed(
            VerificationIssue {
                code: "overconfident".into(),
                message: "Too sure".into(),
                severity: Severity::High,
                evidence: None,
            },
            Some("Lower confidence".into()),
        );
        (rec, report)
    }

    struct Inputs {
        technical: TechnicalView,
        digest: NewsDigest,
        news: NewsView,
        decision: Decision,
    }

    impl Inputs {
        fn new() -> Self {
            Self {
                technical: TechnicalView::default(),
                digest: NewsDigest::degraded("EUR/USD", 24, "test"),
                news: NewsView::neutral("Not enough relevant news"),
                decision: Decision {
                    action: Action::Call,
                    confidence: 0.6,
                    scores: DecisionScores::default(),
                    reason_codes: Vec::new(),
                },
            }
        }

        fn input(&self) -> SynthesisInput<'_> {
            SynthesisInput {
                symbol: "EUR/USD",
                timeframe: Timeframe::H1,
                technical: &self.technical,
                digest: &self.digest,
                news: &self.news,
                decision: &self.decision,
                repair: None,
            }
        }
    }

    /// Both agents share one scripted backend: replies alternate synthesis, verification
    async fn run_loop(replies: &[&str], max_repairs: u32) -> (RepairOutcome, u32) {
        let (ctx, backend) = context(replies);
        (run_loop_in(ctx, max_repairs).await, backend.calls())
    }

    async fn run_loop_in(ctx: AgentContext, max_repairs: u32) -> RepairOutcome {
        let synthesizer = Synthesizer::new(ctx.clone(), SynthesizerConfig::default(), SafetyPolicy::standard());
        let verifier = Verifier::new(ctx);
        let inputs = Inputs::new();
        let (rec, report) = initial();

        RepairLoop::new(&synthesizer, &verifier, max_repairs)
            .run(inputs.input(), "Technical: ...", rec, report)
            .await
    }

    #[tokio::test]
    async fn test_repair_resolves_on_first_round() {
        let (outcome, calls) = run_loop(&[REPAIRED, PASSED], 3).await;
        assert!(outcome.resolved());
        assert_eq!(outcome.rounds.len(), 1);
        assert_eq!(calls, 2);
        assert_eq!(outcome.recommendation.confidence, 0.4);
        assert!(outcome.synthesis.is_some());
    }

    #[tokio::test]
    async fn test_repair_bounded_by_max_repairs() {
        let (outcome, calls) = run_loop(&[REPAIRED, FAILED, REPAIRED, FAILED, REPAIRED, PASSED], 2).await;
        assert!(!outcome.resolved());
        assert_eq!(outcome.rounds.len(), 2);
        assert_eq!(calls, 4);
        assert_eq!(outcome.report.issues[0].code, "overconfident");
        assert_eq!(outcome.rounds[1].iteration, 2);
    }

    #[tokio::test]
    async fn test_zero_repairs_keeps_initial_outcome() {
        let (outcome, calls) = run_loop(&[], 0).await;
        let (rec, report) = initial();
        assert_eq!(calls, 0);
        assert_eq!(outcome.recommendation, rec);
        assert_eq!(outcome.report, report);
        assert!(outcome.rounds.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_repair_synthesis_keeps_previous_recommendation() {
        let outcome = run_loop_in(failing_context(), 1).await;
        let (rec, report) = initial();
        assert_eq!(outcome.recommendation, rec);
        assert_eq!(outcome.report, report);
        assert!(outcome.rounds[0].synthesis_error.is_some());
        assert!(outcome.rounds[0].verification.is_none());
        assert!(outcome.synthesis.is_none());
    }

    #[tokio::test]
    async fn test_malformed_repair_synthesis_falls_back_to_decision() {
        // Every synthesis call, its re-asks, then the verifier see the same bad answer
        let (outcome, _) = run_loop(&[r#"{"action": "BUY", "confidence": 0.5, "brief": "x"}"#], 1).await;
        assert_eq!(outcome.rounds.len(), 1);
        assert_eq!(outcome.rounds[0].corrections.len(), 2);
        assert!(outcome.rounds[0].synthesis_error.is_none());
        assert_eq!(outcome.recommendation.action, Action::Call);
        assert_eq!(outcome.recommendation.confidence, 0.6);
        assert!(outcome.recommendation.brief.starts_with(pipeline_constants::FALLBACK_BRIEF));
        assert!(outcome.rounds[0].verification.is_some());
        assert!(!outcome.resolved());
    }
}
