//! Runs Command
//!
//! Inspect stored runs.
//!
//! Usage:
//!   fxdesk runs list [--limit 20] [-f json]
//!   fxdesk runs show <ID> [-f json]

use serde::Serialize;

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, OutputFormat, print_json};
use crate::storage::{RationaleRecord, RecordStore, RunStore, StoredVerification};
use crate::types::{FxError, Recommendation, Result, Run, RunId};

/// Everything stored for one run
#[derive(Debug, Serialize)]
pub struct RunDetails {
    pub run: Run,
    pub recommendation: Option<Recommendation>,
    pub rationales: Vec<RationaleRecord>,
    pub verifications: Vec<StoredVerification>,
}

pub fn load_details<S: RunStore + RecordStore>(store: &S, run_id: RunId) -> Result<RunDetails> {
    let run = store
        .get(run_id)?
        .ok_or_else(|| FxError::NotFound(format!("run {}", run_id)))?;
    Ok(RunDetails {
        run,
        recommendation: store.recommendation_for_run(run_id)?,
        rationales: store.rationales_for_run(run_id)?,
        verifications: store.verifications_for_run(run_id)?,
    })
}

pub fn list(ctx: &CommandContext, limit: usize, format: OutputFormat) -> Result<()> {
    let runs = ctx.db()?.recent(limit)?;
    if format == OutputFormat::Json {
        return print_json(&runs);
    }

    let out = Output::new();
    if runs.is_empty() {
        out.info("No runs recorded yet");
        return Ok(());
    }

    println!("{:>6}  {:<9}  {:<4}  {:<20}  {}", "ID", "SYMBOL", "TF", "STARTED", "STATUS");
    for run in &runs {
        println!(
            "{:>6}  {:<9}  {:<4}  {:<20}  {}",
            run.id,
            run.symbol,
            run.timeframe,
            run.start_time.format("%Y-%m-%d %H:%M:%S"),
            out.status(run.status)
        );
    }
    Ok(())
}

pub fn show(ctx: &CommandContext, id: i64, format: OutputFormat) -> Result<()> {
    let details = load_details(ctx.db()?.as_ref(), RunId::new(id))?;
    if format == OutputFormat::Json {
        return print_json(&details);
    }

    let out = Output::new();
    let run = &details.run;
    out.header(&format!("Run {}", run.id));
    out.field("Symbol", &run.symbol);
    out.field("Timeframe", &run.timeframe);
    out.field("Status", out.status(run.status));
    out.field("Started", run.start_time.to_rfc3339());
    if let Some(duration) = run.duration() {
        out.field("Duration", format!("{} ms", duration.num_milliseconds()));
    }
    if let Some(error) = &run.error {
        out.field("Error", error);
    }

    if let Some(rec) = &details.recommendation {
        out.section("Recommendation");
        out.field("Action", out.action(rec.action));
        out.field("Confidence", format!("{:.0}%", rec.confidence * 100.0));
        println!("\n{}", rec.brief);
    }

    for rationale in &details.rationales {
        out.section(&format!("{} rationale", rationale.kind));
        if let (Some(backend), Some(model)) = (&rationale.backend, &rationale.model) {
            out.field("Served by", format!("{}/{}", backend, model));
        }
        if let Some(error) = &rationale.error {
            out.field("Error", error);
        }
        println!("{}", rationale.content);
    }

    for stored in &details.verifications {
        out.section(&format!("Verification ({})", stored.stage));
        out.check(stored.report.passed, if stored.report.passed { "Passed" } else { "Failed" });
        for issue in &stored.report.issues {
            println!("  [{}] {}: {}", issue.severity, issue.code, issue.message);
        }
        if let Some(fix) = &stored.report.suggested_fix {
            out.field("Suggested fix", fix);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::{Action, RationaleKind, RunStatus};
    use chrono::Utc;

    #[test]
    fn test_load_details_collects_records() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create("EUR/USD", "1h").unwrap();
        db.save_recommendation(
            run_id,
            &Recommendation {
                symbol: "EUR/USD".into(),
                timeframe: "1h".into(),
                action: Action::Wait,
                confidence: 0.4,
                brief: "Range bound.".into(),
            },
        )
        .unwrap();
        db.save_rationale(run_id, &RationaleRecord::offline(RationaleKind::News, "No news"))
            .unwrap();
        db.update_status(run_id, RunStatus::Success, None, Some(Utc::now()))
            .unwrap();

        let details = load_details(&db, run_id).unwrap();
        assert_eq!(details.run.status, RunStatus::Success);
        assert_eq!(details.recommendation.unwrap().action, Action::Wait);
        assert_eq!(details.rationales.len(), 1);
        assert!(details.verifications.is_empty());
    }

    #[test]
    fn test_load_details_unknown_run() {
        let db = Database::open_in_memory().unwrap();
        let err = load_details(&db, RunId::new(42)).unwrap_err();
        assert!(matches!(err, FxError::NotFound(_)));
    }
}
