//! Analyze Command
//!
//! Runs the full pipeline for one symbol and prints the recommendation.

use std::sync::Arc;

use tracing::info;

use crate::agents::AgentContext;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, OutputFormat, print_json};
use crate::pipeline::{Orchestrator, OrchestratorConfig, PipelineDeps, RunOutcome, Stage};
use crate::sources::{create_market_source, create_news_source};
use crate::storage::FileArtifactSink;
use crate::types::{Result, RunStatus, Timeframe};

/// Returns whether the run succeeded
pub async fn run(ctx: &CommandContext, symbol: &str, timeframe: Timeframe, format: OutputFormat) -> Result<bool> {
    let config = &ctx.config;
    let db = ctx.db()?;

    let router = Arc::new(config.build_router()?);
    let deps = PipelineDeps {
        market: create_market_source(&config.market)?,
        news: create_news_source(&config.news)?,
        runs: db.clone(),
        records: db,
        artifacts: Arc::new(FileArtifactSink::new(&config.storage.artifacts_dir)),
    };
    info!(branch = %config.branch, market = deps.market.name(), news = deps.news.name(), "Pipeline ready");

    let orchestrator = Orchestrator::new(
        AgentContext::new(router, config.branch),
        deps,
        OrchestratorConfig::from(config),
    );
    let outcome = orchestrator.run_analysis(symbol, timeframe).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => print_outcome(&outcome, ctx),
    }
    Ok(outcome.succeeded())
}

fn print_outcome(outcome: &RunOutcome, ctx: &CommandContext) {
    let out = Output::new();
    out.header(&format!("Run {}", outcome.run_id));
    out.field("Status", out.status(outcome.status));

    if let Some(rec) = &outcome.recommendation {
        out.section(&format!("{} {}", rec.symbol, rec.timeframe));
        out.field("Action", out.action(rec.action));
        out.field("Confidence", format!("{:.0}%", rec.confidence * 100.0));
        if let Some(decision) = &outcome.decision {
            out.field("Reasons", decision.reason_list());
        }
        println!("\n{}", rec.brief);
    }

    if let Some(report) = &outcome.verification {
        out.section("Verification");
        out.check(report.passed, if report.passed { "Passed" } else { "Failed" });
        for issue in &report.issues {
            println!("  [{}] {}: {}", issue.severity, issue.code, issue.message);
        }
        if outcome.unresolved_verification {
            out.warning("Recommendation issued with unresolved verification issues");
        }
    }

    out.section("Latency");
    for stage in Stage::ALL {
        if let Some(elapsed) = outcome.latency.get(stage) {
            out.field(stage.label(), format!("{} ms", elapsed.as_millis()));
        }
    }

    let artifacts = ctx.config.storage.artifacts_dir.join(outcome.run_id.artifact_dir_name());
    println!();
    match (&outcome.status, &outcome.error) {
        (RunStatus::Success, _) => out.success(&format!("Artifacts: {}", artifacts.display())),
        (_, Some(error)) => out.error(error),
        _ => {}
    }
}
