//! Deadline Helpers
//!
//! [`with_deadline`] wraps a backend call in `tokio::time::timeout` and maps
//! expiry to a `BACKEND_TIMEOUT` failure. A timed-out future is dropped,
//! never awaited further.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::with_deadline;
//!
//! let reply = with_deadline(timeout, backend.send(&request)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::types::BackendFailure;

/// Execute a backend call under its resolved deadline
pub async fn with_deadline<T, F>(
    timeout: Duration,
    future: F,
) -> std::result::Result<T, BackendFailure>
where
    F: Future<Output = std::result::Result<T, BackendFailure>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(BackendFailure::timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    #[tokio::test]
    async fn test_with_deadline_maps_to_backend_timeout() {
        let result: std::result::Result<(), BackendFailure> = with_deadline(
            Duration::from_millis(20),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, FailureKind::BackendTimeout);
        assert_eq!(err.elapsed, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_inner_failure_through() {
        let result: std::result::Result<(), BackendFailure> = with_deadline(
            Duration::from_secs(1),
            async { Err(BackendFailure::invalid_response("empty")) },
        )
        .await;
        assert_eq!(result.unwrap_err().kind, FailureKind::InvalidResponse);
    }
}
