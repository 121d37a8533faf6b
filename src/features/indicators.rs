//! Technical Indicators
//!
//! Pure functions over closing prices and candles. Every function returns
//! `None` when the series is too short rather than a partial value.

use serde::{Deserialize, Serialize};

use crate::types::{Bias, Candle};

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// SMA series aligned to the input: entry `i` covers `values[i+1-period..=i]`
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    out.push(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out.push(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    Some(
        values[period..]
            .iter()
            .fold(seed, |prev, &v| v * k + prev * (1.0 - k)),
    )
}

/// EMA series; the first entry is the SMA seed over `values[..period]`
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out.push(prev);
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Rate of change over `period` bars, in percent
pub fn roc(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() <= period {
        return None;
    }
    let now = values[values.len() - 1];
    let then = values[values.len() - 1 - period];
    if then == 0.0 {
        return None;
    }
    Some((now / then - 1.0) * 100.0)
}

/// RSI now minus RSI `lag` bars ago
pub fn rsi_delta(closes: &[f64], period: usize, lag: usize) -> Option<f64> {
    if lag == 0 || lag >= closes.len() {
        return None;
    }
    Some(rsi(closes, period)? - rsi(&closes[..closes.len() - lag], period)?)
}

/// Most recent sign change of `fast - slow`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crossover {
    /// Bullish when `fast` moved above `slow`
    pub direction: Bias,
    /// Bars since the cross; 0 means the latest bar
    pub age_bars: usize,
}

/// Latest crossover within the last `lookback` bars.
///
/// Both series must end on the same bar. Bars where the two are equal carry
/// the previous sign forward.
pub fn last_crossover(fast: &[f64], slow: &[f64], lookback: usize) -> Option<Crossover> {
    let overlap = fast.len().min(slow.len()).min(lookback);
    if overlap < 2 {
        return None;
    }
    let fast = &fast[fast.len() - overlap..];
    let slow = &slow[slow.len() - overlap..];

    let mut prev: Option<bool> = None;
    let mut last = None;
    for (i, (f, s)) in fast.iter().zip(slow).enumerate() {
        let above = match f.partial_cmp(s) {
            Some(std::cmp::Ordering::Greater) => true,
            Some(std::cmp::Ordering::Less) => false,
            _ => continue,
        };
        if prev.is_some_and(|p| p != above) {
            last = Some((i, above));
        }
        prev = Some(above);
    }

    last.map(|(i, above)| Crossover {
        direction: if above { Bias::Bullish } else { Bias::Bearish },
        age_bars: overlap - 1 - i,
    })
}

/// Wilder's RSI
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (mut avg_gain, mut avg_loss) = deltas[..period].iter().fold((0.0, 0.0), |(g, l), &d| {
        if d > 0.0 { (g + d, l) } else { (g, l - d) }
    });
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for &d in &deltas[period..] {
        let (gain, loss) = if d > 0.0 { (d, 0.0) } else { (0.0, -d) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Wilder's average true range
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let c = &w[1];
            (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect();

    let seed = true_ranges[..period].iter().sum::<f64>() / period as f64;
    Some(true_ranges[period..].iter().fold(seed, |prev, &tr| {
        (prev * (period as f64 - 1.0) + tr) / period as f64
    }))
}

/// Percent change of the `period` SMA over the last `lookback` bars
pub fn sma_slope_pct(values: &[f64], period: usize, lookback: usize) -> Option<f64> {
    let series = sma_series(values, period);
    if series.len() <= lookback {
        return None;
    }
    let now = series[series.len() - 1];
    let then = series[series.len() - 1 - lookback];
    if then == 0.0 {
        return None;
    }
    Some((now - then) / then * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.0 + i as f64 * 0.001).collect()
    }

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
        assert_eq!(sma(&[1.0], 0), None);
    }

    #[test]
    fn test_sma_series_matches_point_sma() {
        let values = rising(30);
        let series = sma_series(&values, 20);
        assert_eq!(series.len(), 11);
        let last = *series.last().unwrap();
        assert!((last - sma(&values, 20).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_ema_of_constant_series_is_constant() {
        let values = vec![1.2345; 50];
        assert!((ema(&values, 9).unwrap() - 1.2345).abs() < 1e-12);
    }

    #[test]
    fn test_ema_tracks_trend_faster_than_sma() {
        let values = rising(100);
        assert!(ema(&values, 21).unwrap() > sma(&values, 21).unwrap() - 1e-9);
    }

    #[test]
    fn test_rsi_bounds() {
        assert_eq!(rsi(&rising(30), 14), Some(100.0));
        let falling: Vec<f64> = rising(30).into_iter().rev().collect();
        assert!(rsi(&falling, 14).unwrap() < 1e-9);
        assert_eq!(rsi(&[1.0; 30], 14), Some(50.0));
        assert_eq!(rsi(&[1.0; 14], 14), None);
    }

    #[test]
    fn test_atr_of_fixed_range() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                Candle::new(start + Duration::hours(i), 1.10, 1.11, 1.09, 1.10)
            })
            .collect();
        assert!((atr(&candles, 14).unwrap() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_slope_sign() {
        assert!(sma_slope_pct(&rising(80), 50, 10).unwrap() > 0.0);
        assert_eq!(sma_slope_pct(&rising(55), 50, 10), None);
    }

    #[test]
    fn test_ema_series_ends_at_point_ema() {
        let values = rising(40);
        let series = ema_series(&values, 9);
        assert_eq!(series.len(), 32);
        assert!((series.last().unwrap() - ema(&values, 9).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_roc() {
        assert!((roc(&[100.0, 101.0, 102.0, 105.0], 3).unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(roc(&[1.0, 2.0], 2), None);
        assert_eq!(roc(&[0.0, 2.0], 1), None);
    }

    #[test]
    fn test_rsi_delta_turns_negative_after_reversal() {
        let mut closes = rising(40);
        closes.extend((1..=5).map(|i| 1.039 - i as f64 * 0.002));
        assert!(rsi_delta(&closes, 14, 5).unwrap() < 0.0);
        assert_eq!(rsi_delta(&closes, 14, 0), None);
    }

    #[test]
    fn test_last_crossover_direction_and_age() {
        let fast = [1.0, 1.0, 3.0, 3.0, 3.0];
        let slow = [2.0, 2.0, 2.0, 2.0, 2.0];
        assert_eq!(
            last_crossover(&fast, &slow, 50),
            Some(Crossover { direction: Bias::Bullish, age_bars: 2 })
        );

        let fast = [3.0, 2.0, 1.0];
        assert_eq!(
            last_crossover(&fast, &slow, 50),
            Some(Crossover { direction: Bias::Bearish, age_bars: 0 })
        );
    }

    #[test]
    fn test_last_crossover_respects_lookback_and_ties() {
        let fast = [1.0, 3.0, 3.0, 3.0, 3.0];
        let slow = [2.0; 5];
        assert!(last_crossover(&fast, &slow, 3).is_none());
        // A touch without crossing is not a cross
        assert!(last_crossover(&[3.0, 2.0, 3.0], &[2.0, 2.0, 2.0], 10).is_none());
        assert!(last_crossover(&[1.0], &[2.0], 10).is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn rsi_stays_in_range(closes in prop::collection::vec(0.5f64..2.0, 15..120)) {
                let value = rsi(&closes, 14).unwrap();
                prop_assert!((0.0..=100.0).contains(&value));
            }

            #[test]
            fn sma_is_bounded_by_window(values in prop::collection::vec(0.5f64..2.0, 20..80)) {
                let value = sma(&values, 20).unwrap();
                let window = &values[values.len() - 20..];
                let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                prop_assert!(value >= min - 1e-12 && value <= max + 1e-12);
            }
        }
    }
}
