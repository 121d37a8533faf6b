//! Analysis Orchestrator
//!
//! Sequences one run:
//!
//! | # | Stage | On failure |
//! |---|-------|------------|
//! | 1 | market fetch | run FAILED |
//! | 2 | features | run FAILED |
//! | 3 | technical analysis | run FAILED |
//! | 4 | news fetch | degraded LOW digest, run continues |
//! | 5 | news analysis | neutral view, run continues |
//! | 6 | decision | never fails |
//! | 7 | synthesis | decision fallback on malformed output; run FAILED if no backend answers |
//! | 8 | verification (optional) | failed report, run continues |
//! | 9 | repair loop (hard mode) | last report kept |
//! | 10 | persistence | run FAILED after the recommendation exists |
//!
//! A FAILED run still returns its `run_id`; artifacts written before the
//! failing stage stay on disk. `end_time` is written together with the
//! terminal status. If that final write fails the outcome is still
//! returned, marked FAILED with the storage error appended.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::job::{run_job, timed};
use super::repair::{RepairLoop, RepairRound};
use super::stage::{Stage, StageLatency, correction_artifact_name, repair_artifact_name};
use crate::agents::{
    AgentContext, Decision, DecisionPolicy, NewsAnalyst, SafetyPolicy, SynthesisInput,
    Synthesizer, SynthesizerConfig, TechnicalAnalyst, Verifier,
};
use crate::ai::LlmExchange;
use crate::config::{Config, RepairExhaustion, VerifierConfig, VerifierMode};
use crate::constants::pipeline as pipeline_constants;
use crate::features::build_features;
use crate::sources::{MarketDataSource, NewsSource};
use crate::storage::{ArtifactSink, RationaleRecord, RecordStore, RunStore};
use crate::types::{
    Candle, FxError, NewsDigest, NewsView, RationaleKind, Recommendation, Result, RunId,
    RunStatus, Timeframe, VerificationReport, normalize_symbol, truncate_chars,
};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub window_candles: usize,
    pub min_candles: usize,
    pub news_window_hours: u32,
    pub verifier: VerifierConfig,
    pub decision: DecisionPolicy,
    pub synthesizer: SynthesizerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            window_candles: pipeline_constants::WINDOW_CANDLES,
            min_candles: pipeline_constants::MIN_CANDLES,
            news_window_hours: pipeline_constants::NEWS_WINDOW_HOURS,
            verifier: VerifierConfig::default(),
            decision: DecisionPolicy::default(),
            synthesizer: SynthesizerConfig::default(),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            window_candles: config.market.window_candles,
            min_candles: config.market.min_candles,
            news_window_hours: config.news.window_hours,
            verifier: config.verifier.clone(),
            decision: DecisionPolicy {
                min_trade_edge: config.decision.min_trade_edge,
                max_no_trade_score: config.decision.max_no_trade_score,
                max_confidence_when_news_low: config.decision.max_confidence_when_news_low,
                crossover_max_age_bars: config.decision.crossover_max_age_bars,
                atr_pct_low_threshold: config.decision.atr_pct_low_threshold,
            },
            synthesizer: SynthesizerConfig {
                corrective_retries: config.decision.corrective_retries,
                ..SynthesizerConfig::default()
            },
        }
    }
}

/// External collaborators of a run
#[derive(Clone)]
pub struct PipelineDeps {
    pub market: Arc<dyn MarketDataSource>,
    pub news: Arc<dyn NewsSource>,
    pub runs: Arc<dyn RunStore>,
    pub records: Arc<dyn RecordStore>,
    pub artifacts: Arc<dyn ArtifactSink>,
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub error: Option<String>,
    /// Deterministic action and confidence, once technical and news analysis ran
    pub decision: Option<Decision>,
    /// Present once synthesis succeeded, even if a later stage failed
    pub recommendation: Option<Recommendation>,
    /// Latest verification report, if verification ran
    pub verification: Option<VerificationReport>,
    /// Recommendation issued while the latest report still fails
    pub unresolved_verification: bool,
    pub latency: StageLatency,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Mutable state accumulated while stages execute
#[derive(Default)]
struct RunState {
    latency: StageLatency,
    decision: Option<Decision>,
    recommendation: Option<Recommendation>,
    verification: Option<VerificationReport>,
    unresolved_verification: bool,
}

/// Verification results to persist, in the order they were produced
struct VerificationTrail {
    reports: Vec<(String, VerificationReport)>,
    repair_rounds: usize,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    deps: PipelineDeps,
    config: OrchestratorConfig,
    technical: TechnicalAnalyst,
    news_analyst: NewsAnalyst,
    synthesizer: Synthesizer,
    verifier: Verifier,
}

impl Orchestrator {
    pub fn new(ctx: AgentContext, deps: PipelineDeps, config: OrchestratorConfig) -> Self {
        Self {
            technical: TechnicalAnalyst::new(ctx.clone()),
            news_analyst: NewsAnalyst::new(ctx.clone()),
            synthesizer: Synthesizer::new(ctx.clone(), config.synthesizer.clone(), SafetyPolicy::standard()),
            verifier: Verifier::new(ctx),
            deps,
            config,
        }
    }

    /// Execute one run end to end.
    ///
    /// Stage failures are reported through [`RunOutcome`]; `Err` means the
    /// run could not be created in the run store.
    #[instrument(skip(self), fields(symbol = %symbol, timeframe = %timeframe))]
    pub async fn run_analysis(&self, symbol: &str, timeframe: Timeframe) -> Result<RunOutcome> {
        let symbol = normalize_symbol(symbol);
        let run_id = self.deps.runs.create(&symbol, timeframe.as_str())?;
        info!(run_id = %run_id, "Run started");

        let mut state = RunState::default();
        let result = self.execute(run_id, &symbol, timeframe, &mut state).await;

        let (mut status, mut error) = match result {
            Ok(()) => {
                info!(run_id = %run_id, total_ms = state.latency.total().as_millis() as u64, "Run completed");
                (RunStatus::Success, None)
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run failed");
                (RunStatus::Failed, Some(e.to_string()))
            }
        };
        if let Err(e) = self
            .deps
            .runs
            .update_status(run_id, status, error.as_deref(), Some(Utc::now()))
        {
            error!(run_id = %run_id, error = %e, "Failed to finalize run");
            let finalize = format!("Failed to finalize run: {}", e);
            status = RunStatus::Failed;
            error = Some(match error {
                Some(previous) => format!("{}; {}", previous, finalize),
                None => finalize,
            });
        }

        Ok(RunOutcome {
            run_id,
            status,
            error,
            decision: state.decision,
            recommendation: state.recommendation,
            verification: state.verification,
            unresolved_verification: state.unresolved_verification,
            latency: state.latency,
        })
    }

    async fn execute(
        &self,
        run_id: RunId,
        symbol: &str,
        timeframe: Timeframe,
        state: &mut RunState,
    ) -> Result<()> {
        // 1. Market data
        let market = run_job(Stage::MarketFetch, self.fetch_candles(symbol, timeframe)).await;
        state.latency.record(Stage::MarketFetch, market.elapsed);
        let candles = market.into_result()?;

        // 2. Features
        let features = run_job(Stage::Features, async {
            build_features(symbol, timeframe, &candles, self.config.min_candles)
        })
        .await;
        state.latency.record(Stage::Features, features.elapsed);
        let snapshot = features.into_result()?;

        // 3. Technical analysis
        let (technical, elapsed) = timed(Stage::TechAnalysis, self.technical.analyze(&snapshot)).await;
        state.latency.record(Stage::TechAnalysis, elapsed);
        self.write_artifact(run_id, Stage::TechAnalysis, technical.exchange.as_ref());
        if let Some(err) = technical.exchange.as_ref().and_then(LlmExchange::error) {
            return Err(FxError::stage(Stage::TechAnalysis.key(), err.to_string()));
        }
        let technical_view = technical.output;
        let technical_rationale = RationaleRecord::from_exchange(
            RationaleKind::Technical,
            technical_view.summary(),
            technical.exchange.as_ref(),
        );

        // 4. News (soft)
        let digest = self.fetch_news(symbol, state).await;

        // 5. News analysis
        let (news, elapsed) = timed(Stage::NewsAnalysis, self.news_analyst.analyze(&digest)).await;
        if news.exchange.is_some() {
            state.latency.record(Stage::NewsAnalysis, elapsed);
        }
        self.write_artifact(run_id, Stage::NewsAnalysis, news.exchange.as_ref());
        let news_view = news.output;
        let news_rationale = RationaleRecord::from_exchange(
            RationaleKind::News,
            news_rationale_text(&digest, &news_view),
            news.exchange.as_ref(),
        );

        // 6. Decision
        let decision = self.config.decision.decide(&snapshot, &technical_view, digest.quality);
        info!(
            run_id = %run_id,
            action = %decision.action,
            confidence = decision.confidence,
            reasons = %decision.reason_list(),
            "Action decided"
        );
        state.decision = Some(decision.clone());

        // 7. Synthesis
        let input = SynthesisInput {
            symbol,
            timeframe,
            technical: &technical_view,
            digest: &digest,
            news: &news_view,
            decision: &decision,
            repair: None,
        };
        let (synthesis, elapsed) = timed(Stage::Synthesis, self.synthesizer.synthesize(&input)).await;
        state.latency.record(Stage::Synthesis, elapsed);
        self.write_artifact(run_id, Stage::Synthesis, synthesis.exchange.as_ref());
        for (n, correction) in synthesis.corrections.iter().enumerate() {
            self.write_named_artifact(run_id, &correction_artifact_name(Stage::Synthesis.key(), n + 1), correction);
        }
        let mut synthesis_exchange = synthesis.last_exchange().cloned();
        let mut recommendation = synthesis
            .output
            .map_err(|e| FxError::stage(Stage::Synthesis.key(), e.to_string()))?;
        state.recommendation = Some(recommendation.clone());

        // 8-9. Verification and repair
        let mut trail = VerificationTrail {
            reports: Vec::new(),
            repair_rounds: 0,
        };
        if self.config.verifier.enabled {
            let summary = verifier_summary(&technical_rationale.content, &news_rationale.content);
            let (verified, elapsed) = timed(
                Stage::Verification,
                self.verify_and_repair(run_id, input, &summary, recommendation, &mut trail),
            )
            .await;
            state.latency.record(Stage::Verification, elapsed);

            let (final_recommendation, report, repaired_exchange) = verified;
            recommendation = final_recommendation;
            if repaired_exchange.is_some() {
                synthesis_exchange = repaired_exchange;
            }
            state.unresolved_verification = !report.passed;
            state.recommendation = Some(recommendation.clone());
            state.verification = Some(report);
        }

        // 10. Persistence
        let rationales = [
            technical_rationale,
            news_rationale,
            RationaleRecord::from_exchange(
                RationaleKind::Synthesis,
                recommendation.author_output(),
                synthesis_exchange.as_ref(),
            ),
        ];
        let persisted = run_job(Stage::Persistence, async {
            self.persist(run_id, &recommendation, &rationales, &trail.reports)
                .map_err(|e| FxError::PersistenceFailure(e.to_string()))
        })
        .await;
        state.latency.record(Stage::Persistence, persisted.elapsed);
        persisted.into_result()?;

        if state.unresolved_verification {
            let issues = state.verification.as_ref().map_or(0, |r| r.issues.len());
            warn!(run_id = %run_id, issues, "Recommendation issued with unresolved verification concerns");

            let fail_run = self.config.verifier.mode == VerifierMode::Hard
                && self.config.verifier.on_exhausted == RepairExhaustion::FailRun;
            if fail_run {
                return Err(FxError::VerificationFailed(format!(
                    "{} unresolved issue(s) after {} repair round(s)",
                    issues, trail.repair_rounds
                )));
            }
        }

        Ok(())
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let candles = self
            .deps
            .market
            .fetch_candles(symbol, timeframe, self.config.window_candles)
            .await?;
        if candles.len() < self.config.min_candles {
            return Err(FxError::stage(
                Stage::MarketFetch.key(),
                format!(
                    "Insufficient candles: got {}, need at least {}",
                    candles.len(),
                    self.config.min_candles
                ),
            ));
        }
        info!(count = candles.len(), source = self.deps.market.name(), "Candles loaded");
        Ok(candles)
    }

    async fn fetch_news(&self, symbol: &str, state: &mut RunState) -> NewsDigest {
        let hours = self.config.news_window_hours;
        let job = run_job(Stage::NewsFetch, self.deps.news.fetch_digest(symbol, hours)).await;
        state.latency.record(Stage::NewsFetch, job.elapsed);

        match job.into_result() {
            Ok(digest) => {
                info!(quality = %digest.quality, articles = digest.articles.len(), "News digest ready");
                digest
            }
            Err(e) => {
                let message = match e {
                    FxError::StageFailure { message, .. } => message,
                    other => other.to_string(),
                };
                warn!(error = %message, "News fetch failed, continuing with degraded digest");
                NewsDigest::degraded(symbol, hours, format!("Provider error: {}", message))
            }
        }
    }

    /// Verify the recommendation and, in hard mode, repair it
    async fn verify_and_repair(
        &self,
        run_id: RunId,
        input: SynthesisInput<'_>,
        summary: &str,
        recommendation: Recommendation,
        trail: &mut VerificationTrail,
    ) -> (Recommendation, VerificationReport, Option<LlmExchange>) {
        let verified = self
            .verifier
            .verify("synthesis", summary, &recommendation.author_output())
            .await;
        self.write_artifact(run_id, Stage::Verification, verified.exchange.as_ref());
        let report = verified.output;
        trail.reports.push((Stage::Verification.key().to_string(), report.clone()));

        if report.passed {
            info!(run_id = %run_id, "Verification passed");
            return (recommendation, report, None);
        }
        warn!(run_id = %run_id, issues = report.issues.len(), "Verification failed");

        let verifier = &self.config.verifier;
        if verifier.mode != VerifierMode::Hard || verifier.max_repairs == 0 {
            return (recommendation, report, None);
        }

        let outcome = RepairLoop::new(&self.synthesizer, &self.verifier, verifier.max_repairs)
            .run(input, summary, recommendation, report)
            .await;

        for round in &outcome.rounds {
            self.record_repair_round(run_id, round, trail);
        }
        trail.repair_rounds = outcome.rounds.len();

        (outcome.recommendation, outcome.report, outcome.synthesis)
    }

    fn record_repair_round(&self, run_id: RunId, round: &RepairRound, trail: &mut VerificationTrail) {
        let synthesis_name = repair_artifact_name(Stage::Synthesis, round.iteration);
        if let Some(exchange) = &round.synthesis {
            self.write_named_artifact(run_id, &synthesis_name, exchange);
        }
        for (n, correction) in round.corrections.iter().enumerate() {
            self.write_named_artifact(run_id, &correction_artifact_name(&synthesis_name, n + 1), correction);
        }
        if let Some(verification) = &round.verification {
            let name = repair_artifact_name(Stage::Verification, round.iteration);
            if let Some(exchange) = &verification.exchange {
                self.write_named_artifact(run_id, &name, exchange);
            }
            trail.reports.push((name, verification.output.clone()));
        }
    }

    fn persist(
        &self,
        run_id: RunId,
        recommendation: &Recommendation,
        rationales: &[RationaleRecord],
        reports: &[(String, VerificationReport)],
    ) -> Result<()> {
        self.deps
            .records
            .save_run_records(run_id, recommendation, rationales, reports)?;

        self.deps.artifacts.write_recommendation(run_id, recommendation)?;
        self.deps.artifacts.write_rationales(run_id, rationales)?;
        info!(run_id = %run_id, "Recommendation persisted");
        Ok(())
    }

    /// Stage artifacts are audit material; a failed write is logged, not fatal
    fn write_artifact(&self, run_id: RunId, stage: Stage, exchange: Option<&LlmExchange>) {
        if let (Some(name), Some(exchange)) = (stage.artifact_name(), exchange) {
            self.write_named_artifact(run_id, name, exchange);
        }
    }

    fn write_named_artifact(&self, run_id: RunId, name: &str, exchange: &LlmExchange) {
        if let Err(e) = self.deps.artifacts.write(run_id, name, exchange) {
            warn!(run_id = %run_id, artifact = name, error = %e, "Failed to write artifact");
        }
    }
}

fn news_rationale_text(digest: &NewsDigest, view: &NewsView) -> String {
    let quality = if digest.quality_reason.is_empty() {
        digest.quality.to_string()
    } else {
        format!("{} ({})", digest.quality, digest.quality_reason)
    };
    format!(
        "Quality: {}\nSummary: {}\nSentiment: {}",
        quality, view.summary, view.sentiment
    )
}

/// Verifier input: the head of each upstream rationale
fn verifier_summary(technical: &str, news: &str) -> String {
    let limit = pipeline_constants::VERIFIER_SUMMARY_CHARS;
    format!(
        "Technical: {}...\nNews: {}...",
        truncate_chars(technical, limit),
        truncate_chars(news, limit)
    )
}
