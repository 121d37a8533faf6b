//! Run and Record Stores
//!
//! | Trait | Tables | Written by |
//! |-------|--------|------------|
//! | [`RunStore`] | `runs` | orchestrator lifecycle |
//! | [`RecordStore`] | `recommendations`, `rationales`, `verification_reports` | persistence stage |
//!
//! Both traits are implemented by [`Database`]. Timestamps are stored as
//! RFC 3339 text so a run reads back with identical values.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::database::Database;
use crate::ai::LlmExchange;
use crate::types::{
    FxError, RationaleKind, Recommendation, Result, ResultExt, Run, RunId, RunStatus,
    VerificationIssue, VerificationReport,
};

// =============================================================================
// Traits
// =============================================================================

pub trait RunStore: Send + Sync {
    /// Insert a PENDING run
    fn create(&self, symbol: &str, timeframe: &str) -> Result<RunId>;

    /// `end_time` must be set exactly when `status` is terminal
    fn update_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        error: Option<&str>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<()>;

    fn get(&self, run_id: RunId) -> Result<Option<Run>>;

    /// Most recent runs first
    fn recent(&self, limit: usize) -> Result<Vec<Run>>;
}

pub trait RecordStore: Send + Sync {
    fn save_recommendation(&self, run_id: RunId, recommendation: &Recommendation) -> Result<()>;

    fn save_rationale(&self, run_id: RunId, rationale: &RationaleRecord) -> Result<()>;

    /// `stage` distinguishes the first report from repair rounds
    fn save_verification(&self, run_id: RunId, stage: &str, report: &VerificationReport) -> Result<()>;

    /// Everything the persistence stage writes for one run; the
    /// recommendation row is written last
    fn save_run_records(
        &self,
        run_id: RunId,
        recommendation: &Recommendation,
        rationales: &[RationaleRecord],
        verifications: &[(String, VerificationReport)],
    ) -> Result<()> {
        for (stage, report) in verifications {
            self.save_verification(run_id, stage, report)?;
        }
        for rationale in rationales {
            self.save_rationale(run_id, rationale)?;
        }
        self.save_recommendation(run_id, recommendation)
    }

    fn recommendation_for_run(&self, run_id: RunId) -> Result<Option<Recommendation>>;

    fn rationales_for_run(&self, run_id: RunId) -> Result<Vec<RationaleRecord>>;

    /// Oldest first
    fn verifications_for_run(&self, run_id: RunId) -> Result<Vec<StoredVerification>>;
}

// =============================================================================
// Records
// =============================================================================

/// One agent's rationale plus the routing metadata that produced it
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RationaleRecord {
    pub kind: RationaleKind,
    pub content: String,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub latency_ms: Option<u64>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl RationaleRecord {
    /// Rationale produced without an LLM call
    pub fn offline(kind: RationaleKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            backend: None,
            model: None,
            latency_ms: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn from_exchange(
        kind: RationaleKind,
        content: impl Into<String>,
        exchange: Option<&LlmExchange>,
    ) -> Self {
        let Some(exchange) = exchange else {
            return Self::offline(kind, content);
        };
        let response = &exchange.response;
        Self {
            kind,
            content: content.into(),
            backend: Some(response.backend.clone()),
            model: Some(response.model.clone()),
            latency_ms: Some(response.latency.as_millis() as u64),
            attempts: response.attempts,
            error: response.error.as_ref().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoredVerification {
    pub stage: String,
    pub report: VerificationReport,
}

// =============================================================================
// SQLite implementation
// =============================================================================

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context_fn(|| format!("Corrupted timestamp '{}'", value))
}

type RunRow = (i64, String, String, String, Option<String>, String, Option<String>);

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn run_from_row(row: RunRow) -> Result<Run> {
    let (id, symbol, timeframe, start_time, end_time, status, error) = row;
    Ok(Run {
        id: RunId::new(id),
        symbol,
        timeframe,
        start_time: parse_time(&start_time)?,
        end_time: end_time.as_deref().map(parse_time).transpose()?,
        status: status.parse().map_err(FxError::Storage)?,
        error,
    })
}

const RUN_COLUMNS: &str = "id, symbol, timeframe, start_time, end_time, status, error";

impl RunStore for Database {
    fn create(&self, symbol: &str, timeframe: &str) -> Result<RunId> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO runs (symbol, timeframe, start_time, status) VALUES (?1, ?2, ?3, ?4)",
            params![symbol, timeframe, Utc::now().to_rfc3339(), RunStatus::Pending.as_str()],
        )
        .with_context("Failed to create run")?;
        Ok(RunId::new(conn.last_insert_rowid()))
    }

    fn update_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        error: Option<&str>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if status.is_terminal() != end_time.is_some() {
            return Err(FxError::Storage(format!(
                "Run {}: end_time must be set exactly when status is terminal (status {})",
                run_id, status
            )));
        }

        let updated = self
            .connection()?
            .execute(
                "UPDATE runs SET status = ?1, error = ?2, end_time = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    error,
                    end_time.map(|t| t.to_rfc3339()),
                    run_id.get()
                ],
            )
            .with_context("Failed to update run status")?;

        if updated == 0 {
            return Err(FxError::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    fn get(&self, run_id: RunId) -> Result<Option<Run>> {
        let row = self
            .connection()?
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id.get()],
                map_run_row,
            )
            .optional()
            .with_context("Failed to load run")?;
        row.map(run_from_row).transpose()
    }

    fn recent(&self, limit: usize) -> Result<Vec<Run>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM runs ORDER BY start_time DESC, id DESC LIMIT ?1",
                RUN_COLUMNS
            ))
            .with_context("Failed to prepare recent runs query")?;

        let rows = stmt
            .query_map(params![limit as i64], map_run_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch recent runs")?;

        rows.into_iter().map(run_from_row).collect()
    }
}

fn insert_recommendation(conn: &Connection, run_id: RunId, rec: &Recommendation) -> Result<()> {
    conn.execute(
        "INSERT INTO recommendations (run_id, symbol, timeframe, action, confidence, brief, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id.get(),
            rec.symbol,
            rec.timeframe,
            rec.action.to_string(),
            rec.confidence,
            rec.brief,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context("Failed to save recommendation")?;
    Ok(())
}

fn insert_rationale(conn: &Connection, run_id: RunId, r: &RationaleRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO rationales (run_id, kind, content, backend, model, latency_ms, attempts, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run_id.get(),
            r.kind.as_str(),
            r.content,
            r.backend,
            r.model,
            r.latency_ms.map(|ms| ms as i64),
            r.attempts,
            r.error,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context("Failed to save rationale")?;
    Ok(())
}

fn insert_verification(conn: &Connection, run_id: RunId, stage: &str, report: &VerificationReport) -> Result<()> {
    let issues_json = serde_json::to_string(&report.issues).with_context("Failed to serialize issues")?;
    conn.execute(
        "INSERT INTO verification_reports
         (run_id, stage, passed, issues_json, suggested_fix, policy_version, backend, model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run_id.get(),
            stage,
            report.passed,
            issues_json,
            report.suggested_fix,
            report.policy_version,
            report.backend,
            report.model,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context("Failed to save verification report")?;
    Ok(())
}

impl RecordStore for Database {
    fn save_recommendation(&self, run_id: RunId, rec: &Recommendation) -> Result<()> {
        let conn = self.connection()?;
        insert_recommendation(&conn, run_id, rec)
    }

    fn save_rationale(&self, run_id: RunId, rationale: &RationaleRecord) -> Result<()> {
        let conn = self.connection()?;
        insert_rationale(&conn, run_id, rationale)
    }

    fn save_verification(&self, run_id: RunId, stage: &str, report: &VerificationReport) -> Result<()> {
        let conn = self.connection()?;
        insert_verification(&conn, run_id, stage, report)
    }

    /// Single transaction: a failed run leaves no partial records behind
    fn save_run_records(
        &self,
        run_id: RunId,
        recommendation: &Recommendation,
        rationales: &[RationaleRecord],
        verifications: &[(String, VerificationReport)],
    ) -> Result<()> {
        self.transaction(|conn| {
            for (stage, report) in verifications {
                insert_verification(conn, run_id, stage, report)?;
            }
            for rationale in rationales {
                insert_rationale(conn, run_id, rationale)?;
            }
            insert_recommendation(conn, run_id, recommendation)
        })
    }

    fn recommendation_for_run(&self, run_id: RunId) -> Result<Option<Recommendation>> {
        let row = self
            .connection()?
            .query_row(
                "SELECT symbol, timeframe, action, confidence, brief FROM recommendations WHERE run_id = ?1",
                params![run_id.get()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .with_context("Failed to load recommendation")?;

        row.map(|(symbol, timeframe, action, confidence, brief)| {
            Ok(Recommendation {
                symbol,
                timeframe,
                action: action.parse().map_err(FxError::Storage)?,
                confidence,
                brief,
            })
        })
        .transpose()
    }

    fn rationales_for_run(&self, run_id: RunId) -> Result<Vec<RationaleRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT kind, content, backend, model, latency_ms, attempts, error
                 FROM rationales WHERE run_id = ?1 ORDER BY id",
            )
            .with_context("Failed to prepare rationales query")?;

        let rows = stmt
            .query_map(params![run_id.get()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch rationales")?;

        rows.into_iter()
            .map(|(kind, content, backend, model, latency_ms, attempts, error)| {
                Ok(RationaleRecord {
                    kind: kind.parse().map_err(FxError::Storage)?,
                    content,
                    backend,
                    model,
                    latency_ms: latency_ms.map(|ms| ms as u64),
                    attempts,
                    error,
                })
            })
            .collect()
    }

    fn verifications_for_run(&self, run_id: RunId) -> Result<Vec<StoredVerification>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT stage, passed, issues_json, suggested_fix, policy_version, backend, model
                 FROM verification_reports WHERE run_id = ?1 ORDER BY id",
            )
            .with_context("Failed to prepare verification query")?;

        let rows = stmt
            .query_map(params![run_id.get()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch verification reports")?;

        rows.into_iter()
            .map(|(stage, passed, issues_json, suggested_fix, policy_version, backend, model)| {
                let issues: Vec<VerificationIssue> = serde_json::from_str(&issues_json)
                    .with_context_fn(|| format!("Corrupted issues JSON for stage '{}'", stage))?;
                Ok(StoredVerification {
                    stage,
                    report: VerificationReport {
                        passed,
                        issues,
                        suggested_fix,
                        policy_version,
                        backend,
                        model,
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Severity};

    fn recommendation() -> Recommendation {
        Recommendation {
            symbol: "EUR/USD".into(),
            timeframe: "1h".into(),
            action: Action::Call,
            confidence: 0.55,
            brief: "Trend intact above SMA50.".into(),
        }
    }

    #[test]
    fn test_run_round_trip_preserves_status_error_and_timestamps() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create("EUR/USD", "1h").unwrap();

        let pending = db.get(run_id).unwrap().unwrap();
        assert_eq!(pending.status, RunStatus::Pending);
        assert!(pending.end_time.is_none());

        let end = Utc::now();
        db.update_status(run_id, RunStatus::Failed, Some("Stage market_fetch failed: boom"), Some(end))
            .unwrap();

        let run = db.get(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("Stage market_fetch failed: boom"));
        assert_eq!(run.start_time, pending.start_time);
        assert_eq!(run.end_time, Some(end));
    }

    #[test]
    fn test_end_time_required_exactly_for_terminal_status() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create("EUR/USD", "1h").unwrap();

        assert!(db.update_status(run_id, RunStatus::Success, None, None).is_err());
        assert!(
            db.update_status(run_id, RunStatus::Pending, None, Some(Utc::now()))
                .is_err()
        );
        assert!(matches!(
            db.update_status(RunId::new(999), RunStatus::Success, None, Some(Utc::now())),
            Err(FxError::NotFound(_))
        ));
    }

    #[test]
    fn test_recent_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create("EUR/USD", "1h").unwrap();
        let second = db.create("GBP/USD", "4h").unwrap();

        let runs = db.recent(10).unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(db.recent(1).unwrap().len(), 1);
        assert!(db.get(RunId::new(42)).unwrap().is_none());
    }

    #[test]
    fn test_records_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create("EUR/USD", "1h").unwrap();

        db.save_recommendation(run_id, &recommendation()).unwrap();
        assert_eq!(db.recommendation_for_run(run_id).unwrap(), Some(recommendation()));

        let rationale = RationaleRecord {
            latency_ms: Some(1200),
            attempts: 2,
            backend: Some("ollama_local".into()),
            model: Some("llama3:latest".into()),
            ..RationaleRecord::offline(RationaleKind::Technical, "Bias BULLISH (0.70)")
        };
        db.save_rationale(run_id, &rationale).unwrap();
        db.save_rationale(run_id, &RationaleRecord::offline(RationaleKind::News, "Not enough relevant news"))
            .unwrap();
        let rationales = db.rationales_for_run(run_id).unwrap();
        assert_eq!(rationales.len(), 2);
        assert_eq!(rationales[0], rationale);
        assert_eq!(rationales[1].kind, RationaleKind::News);

        let failed = VerificationReport::failed(
            VerificationIssue {
                code: "overconfident".into(),
                message: "Confidence ignores RSI divergence".into(),
                severity: Severity::High,
                evidence: None,
            },
            Some("Lower confidence".into()),
        );
        db.save_verification(run_id, "verification", &failed).unwrap();
        db.save_verification(run_id, "verification_repair_1", &VerificationReport::passed())
            .unwrap();

        let stored = db.verifications_for_run(run_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].stage, "verification");
        assert_eq!(stored[0].report, failed);
        assert!(stored[1].report.passed);
    }

    #[test]
    fn test_second_recommendation_for_run_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create("EUR/USD", "1h").unwrap();
        db.save_recommendation(run_id, &recommendation()).unwrap();
        assert!(db.save_recommendation(run_id, &recommendation()).is_err());
    }

    #[test]
    fn test_run_records_are_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create("EUR/USD", "1h").unwrap();
        let rationales = [RationaleRecord::offline(RationaleKind::Technical, "Bias NEUTRAL")];
        let reports = [("verification".to_string(), VerificationReport::passed())];

        db.save_run_records(run_id, &recommendation(), &rationales, &reports)
            .unwrap();
        assert!(
            db.save_run_records(run_id, &recommendation(), &rationales, &reports)
                .is_err()
        );

        assert_eq!(db.rationales_for_run(run_id).unwrap().len(), 1);
        assert_eq!(db.verifications_for_run(run_id).unwrap().len(), 1);
    }
}
