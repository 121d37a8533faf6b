//! Candle Data Contract
//!
//! Classifies a candle series before any indicator is computed.
//!
//! - **INVALID** blocks the run: missing or too few candles, non-positive
//!   prices, `high < low`, open/close outside the bar range, timestamps going
//!   backwards.
//! - **DEGRADED** is reported but allowed: duplicate timestamps, gaps larger
//!   than 1.5x the smallest step, volume missing or all zero.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::pipeline as pipeline_constants;
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Ok,
    Degraded,
    Invalid,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReport {
    pub status: ValidationStatus,
    pub reasons: Vec<String>,
    pub candle_count: usize,
}

/// Validate a candle series against the data contract
pub fn validate_candles(candles: &[Candle], min_count: usize) -> ContractReport {
    let candle_count = candles.len();
    let mut invalid = Vec::new();
    let mut degraded = Vec::new();

    if candle_count == 0 {
        invalid.push("no_candles".to_string());
        if min_count > 0 {
            invalid.push(format!("insufficient_candles: expected>={} got=0", min_count));
        }
        return ContractReport {
            status: ValidationStatus::Invalid,
            reasons: invalid,
            candle_count,
        };
    }

    if candle_count < min_count {
        invalid.push(format!(
            "insufficient_candles: expected>={} got={}",
            min_count, candle_count
        ));
    }

    let prices_ok = |c: &Candle| [c.open, c.high, c.low, c.close].iter().all(|p| p.is_finite() && *p > 0.0);
    if !candles.iter().all(prices_ok) {
        invalid.push("non_positive_prices".to_string());
    }
    if candles.iter().any(|c| c.high < c.low) {
        invalid.push("high_less_than_low".to_string());
    }
    if candles.iter().any(|c| c.open < c.low || c.open > c.high) {
        invalid.push("open_outside_range".to_string());
    }
    if candles.iter().any(|c| c.close < c.low || c.close > c.high) {
        invalid.push("close_outside_range".to_string());
    }

    if candles.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        invalid.push("timestamps_not_monotonic_non_decreasing".to_string());
    } else {
        let unique: HashSet<_> = candles.iter().map(|c| c.timestamp).collect();
        if unique.len() < candle_count {
            degraded.push("duplicate_timestamps".to_string());
        }

        let steps: Vec<i64> = candles
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
            .filter(|s| *s > 0)
            .collect();
        if let Some(&min_step) = steps.iter().min() {
            let limit = min_step as f64 * pipeline_constants::GAP_TOLERANCE;
            if steps.iter().any(|&s| s as f64 > limit) {
                degraded.push("timestamp_gaps_detected".to_string());
            }
        }
    }

    if candles.iter().all(|c| c.volume == 0.0) {
        degraded.push("volume_missing_or_all_zero".to_string());
    }

    let (status, reasons) = if !invalid.is_empty() {
        (ValidationStatus::Invalid, invalid)
    } else if !degraded.is_empty() {
        (ValidationStatus::Degraded, degraded)
    } else {
        (ValidationStatus::Ok, Vec::new())
    };

    ContractReport {
        status,
        reasons,
        candle_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Candle::new(start + Duration::hours(i as i64), 1.10, 1.12, 1.08, 1.11)
                    .with_volume(100.0)
            })
            .collect()
    }

    #[test]
    fn test_clean_series_is_ok() {
        let report = validate_candles(&series(200), 200);
        assert_eq!(report.status, ValidationStatus::Ok);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn test_empty_series() {
        let report = validate_candles(&[], 200);
        assert_eq!(report.status, ValidationStatus::Invalid);
        assert_eq!(report.reasons[0], "no_candles");
    }

    #[test]
    fn test_insufficient_candles() {
        let report = validate_candles(&series(50), 200);
        assert_eq!(report.status, ValidationStatus::Invalid);
        assert_eq!(report.reasons, vec!["insufficient_candles: expected>=200 got=50"]);
    }

    #[test]
    fn test_price_violations_are_invalid() {
        let mut candles = series(10);
        candles[3].high = 1.0;
        candles[4].low = -1.0;
        let report = validate_candles(&candles, 5);
        assert_eq!(report.status, ValidationStatus::Invalid);
        assert!(report.reasons.contains(&"high_less_than_low".to_string()));
        assert!(report.reasons.contains(&"non_positive_prices".to_string()));
        assert!(report.reasons.contains(&"close_outside_range".to_string()));
    }

    #[test]
    fn test_backwards_timestamps_are_invalid() {
        let mut candles = series(10);
        candles.swap(2, 3);
        let report = validate_candles(&candles, 5);
        assert!(
            report
                .reasons
                .contains(&"timestamps_not_monotonic_non_decreasing".to_string())
        );
    }

    #[test]
    fn test_gaps_and_zero_volume_degrade() {
        let mut candles = series(10);
        candles.remove(5);
        for c in &mut candles {
            c.volume = 0.0;
        }
        let report = validate_candles(&candles, 5);
        assert_eq!(report.status, ValidationStatus::Degraded);
        assert_eq!(
            report.reasons,
            vec!["timestamp_gaps_detected", "volume_missing_or_all_zero"]
        );
    }

    #[test]
    fn test_duplicate_timestamps_degrade() {
        let mut candles = series(10);
        candles[4].timestamp = candles[3].timestamp;
        let report = validate_candles(&candles, 5);
        assert_eq!(report.status, ValidationStatus::Degraded);
        assert!(report.reasons.contains(&"duplicate_timestamps".to_string()));
    }
}
