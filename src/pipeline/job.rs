//! Stage outcome envelope
//!
//! Jobs return a [`JobResult`] instead of propagating errors so the
//! orchestrator decides, per stage, whether a failure halts the run.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use super::stage::Stage;
use crate::types::{FxError, Result};

#[derive(Debug)]
pub struct JobResult<T> {
    pub stage: Stage,
    pub elapsed: Duration,
    outcome: Result<T>,
}

impl<T> JobResult<T> {
    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&FxError> {
        self.outcome.as_ref().err()
    }

    /// Failures come back as `StageFailure` carrying the upstream message verbatim
    pub fn into_result(self) -> Result<T> {
        let stage = self.stage;
        self.outcome.map_err(|e| match e {
            FxError::StageFailure { .. } => e,
            other => FxError::stage(stage.key(), other.to_string()),
        })
    }
}

/// Run one stage future, timing it and logging its boundaries
pub async fn run_job<T, F>(stage: Stage, job: F) -> JobResult<T>
where
    F: Future<Output = Result<T>>,
{
    let (outcome, elapsed) = timed(stage, job).await;
    if let Err(e) = &outcome {
        debug!(stage = %stage, error = %e, "Stage failed");
    }
    JobResult {
        stage,
        elapsed,
        outcome,
    }
}

/// Time a stage that reports failure through its own output
pub async fn timed<T, F>(stage: Stage, fut: F) -> (T, Duration)
where
    F: Future<Output = T>,
{
    debug!(stage = %stage, "Stage start");
    let start = Instant::now();
    let output = fut.await;
    let elapsed = start.elapsed();
    debug!(stage = %stage, duration_ms = elapsed.as_millis() as u64, "Stage end");
    (output, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_job() {
        let job = run_job(Stage::Features, async { Ok::<_, FxError>(7) }).await;
        assert!(job.ok());
        assert_eq!(job.value(), Some(&7));
        assert!(job.error().is_none());
        assert_eq!(job.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failed_job_wraps_upstream_error() {
        let job: JobResult<()> = run_job(Stage::MarketFetch, async {
            Err(FxError::DataSource("TwelveData API error: Invalid API key".into()))
        })
        .await;
        assert!(!job.ok());
        assert!(job.value().is_none());

        match job.into_result().unwrap_err() {
            FxError::StageFailure { stage, message } => {
                assert_eq!(stage, "market_fetch");
                assert_eq!(message, "Data source error: TwelveData API error: Invalid API key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stage_failure_passes_through() {
        let job: JobResult<()> = run_job(Stage::MarketFetch, async {
            Err(FxError::stage("market_fetch", "Insufficient candles: got 3, need at least 200"))
        })
        .await;
        assert_eq!(
            job.into_result().unwrap_err().to_string(),
            "Stage market_fetch failed: Insufficient candles: got 3, need at least 200"
        );
    }
}
