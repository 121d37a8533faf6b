//! Feature Builder
//!
//! Turns a validated candle window into the indicator snapshot the technical
//! analyst reads.
//!
//! ## Indicators
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `last_close` | Close of the newest candle |
//! | `sma_20/50/200` | Simple moving averages |
//! | `ema_9/21` | Exponential moving averages |
//! | `rsi_14` | Wilder RSI |
//! | `atr_14` | Wilder ATR |
//! | `atr_pct` | ATR as a percent of the last close |
//! | `dist_sma200_pct` | Distance of the last close from SMA200, percent |
//! | `roc_5/20` | Rate of change, percent |
//! | `rsi_delta_1/5` | RSI change over 1 and 5 bars |
//! | `ema9_sma50_cross` | Latest EMA9/SMA50 crossover in the lookback |
//! | `sma50_sma200_cross` | Latest SMA50/SMA200 crossover in the lookback |
//! | `trend` | BULLISH / BEARISH / NEUTRAL from SMA alignment and slope |

mod contract;
mod indicators;

pub use contract::{ContractReport, ValidationStatus, validate_candles};
pub use indicators::{
    Crossover, atr, ema, ema_series, last_crossover, roc, rsi, rsi_delta, sma, sma_series,
    sma_slope_pct,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Bias, Candle, FxError, Result, Timeframe};

/// Bars used to measure moving-average slope
const SLOPE_LOOKBACK: usize = 10;

/// Bars searched for moving-average crossovers
const CROSSOVER_LOOKBACK: usize = 50;

/// Indicator snapshot for one symbol and timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub as_of: DateTime<Utc>,
    pub candle_count: usize,
    pub status: ValidationStatus,
    pub validation_reasons: Vec<String>,
    pub last_close: f64,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub atr_pct: Option<f64>,
    pub dist_sma200_pct: Option<f64>,
    pub roc_5: Option<f64>,
    pub roc_20: Option<f64>,
    pub rsi_delta_1: Option<f64>,
    pub rsi_delta_5: Option<f64>,
    pub ema9_sma50_cross: Option<Crossover>,
    pub sma50_sma200_cross: Option<Crossover>,
    pub sma50_slope_pct: Option<f64>,
    pub sma200_slope_pct: Option<f64>,
    pub trend: Bias,
    /// 0..100
    pub trend_strength: f64,
}

impl FeatureSnapshot {
    /// Markdown block handed to the technical analyst
    pub fn to_prompt_text(&self) -> String {
        fn price(v: Option<f64>) -> String {
            v.map(|x| format!("{:.5}", x)).unwrap_or_else(|| "n/a".to_string())
        }
        fn pct(v: Option<f64>) -> String {
            v.map(|x| format!("{:+.2}%", x)).unwrap_or_else(|| "n/a".to_string())
        }
        fn cross(c: Option<Crossover>) -> String {
            c.map(|c| format!("{} ({} bars ago)", c.direction, c.age_bars))
                .unwrap_or_else(|| "none".to_string())
        }

        let rsi_line = match self.rsi_14 {
            Some(r) if r > 70.0 => format!("{:.2} (Overbought)", r),
            Some(r) if r < 30.0 => format!("{:.2} (Oversold)", r),
            Some(r) => format!("{:.2} (Neutral)", r),
            None => "n/a".to_string(),
        };

        let mut lines = vec![
            format!("**Instrument:** {} ({})", self.symbol, self.timeframe),
            format!("**As of:** {}", self.as_of.format("%Y-%m-%d %H:%M UTC")),
            format!("**Current Price:** {:.5}", self.last_close),
            format!("**RSI 14:** {}", rsi_line),
            format!("**SMA 20:** {}", price(self.sma_20)),
            format!("**SMA 50:** {}", price(self.sma_50)),
            format!("**SMA 200:** {}", price(self.sma_200)),
            format!("**EMA 9:** {}", price(self.ema_9)),
            format!("**EMA 21:** {}", price(self.ema_21)),
            format!("**ATR 14:** {}", price(self.atr_14)),
            format!("**ROC 5 / 20:** {} / {}", pct(self.roc_5), pct(self.roc_20)),
            format!("**EMA9/SMA50 cross:** {}", cross(self.ema9_sma50_cross)),
            format!("**SMA50/SMA200 cross:** {}", cross(self.sma50_sma200_cross)),
            format!(
                "**Trend:** {} (strength {:.0}/100)",
                self.trend, self.trend_strength
            ),
        ];
        if self.status != ValidationStatus::Ok {
            lines.push(format!(
                "**Data quality:** {} ({})",
                self.status,
                self.validation_reasons.join(", ")
            ));
        }
        lines.join("\n")
    }
}

/// Validate candles and compute the feature snapshot
///
/// INVALID data is a stage failure with every reason joined by `; `.
pub fn build_features(
    symbol: &str,
    timeframe: Timeframe,
    candles: &[Candle],
    min_candles: usize,
) -> Result<FeatureSnapshot> {
    let report = validate_candles(candles, min_candles);
    if report.status == ValidationStatus::Invalid {
        return Err(FxError::stage(
            "features",
            format!("Invalid candle data: {}", report.reasons.join("; ")),
        ));
    }
    if report.status == ValidationStatus::Degraded {
        warn!(symbol, reasons = ?report.reasons, "Candle data degraded");
    }

    // Non-empty: an empty series is always INVALID
    let Some(last) = candles.last() else {
        return Err(FxError::stage("features", "Invalid candle data: no_candles"));
    };
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let sma_50 = sma(&closes, 50);
    let sma_200 = sma(&closes, 200);
    let sma50_slope_pct = sma_slope_pct(&closes, 50, SLOPE_LOOKBACK);
    let sma200_slope_pct = sma_slope_pct(&closes, 200, SLOPE_LOOKBACK);
    let (trend, trend_strength) =
        detect_trend(last.close, sma_50, sma_200, sma50_slope_pct, sma200_slope_pct);

    let atr_14 = atr(candles, 14);
    let ema9 = ema_series(&closes, 9);
    let sma50 = sma_series(&closes, 50);
    let sma200 = sma_series(&closes, 200);

    let snapshot = FeatureSnapshot {
        symbol: symbol.to_string(),
        timeframe,
        as_of: last.timestamp,
        candle_count: candles.len(),
        status: report.status,
        validation_reasons: report.reasons,
        last_close: last.close,
        sma_20: sma(&closes, 20),
        sma_50,
        sma_200,
        ema_9: ema(&closes, 9),
        ema_21: ema(&closes, 21),
        rsi_14: rsi(&closes, 14),
        atr_14,
        atr_pct: atr_14.and_then(|a| percent_of(a, last.close)),
        dist_sma200_pct: sma_200.and_then(|m| percent_of(last.close - m, m)),
        roc_5: roc(&closes, 5),
        roc_20: roc(&closes, 20),
        rsi_delta_1: rsi_delta(&closes, 14, 1),
        rsi_delta_5: rsi_delta(&closes, 14, 5),
        ema9_sma50_cross: last_crossover(&ema9, &sma50, CROSSOVER_LOOKBACK),
        sma50_sma200_cross: last_crossover(&sma50, &sma200, CROSSOVER_LOOKBACK),
        sma50_slope_pct,
        sma200_slope_pct,
        trend,
        trend_strength,
    };

    debug!(
        symbol,
        candles = snapshot.candle_count,
        trend = %snapshot.trend,
        rsi = ?snapshot.rsi_14,
        "Features built"
    );
    Ok(snapshot)
}

fn percent_of(value: f64, base: f64) -> Option<f64> {
    (base != 0.0).then(|| value / base * 100.0)
}

/// Trend from price vs SMA200, SMA50 vs SMA200, and both slopes agreeing
fn detect_trend(
    close: f64,
    sma_50: Option<f64>,
    sma_200: Option<f64>,
    slope_50: Option<f64>,
    slope_200: Option<f64>,
) -> (Bias, f64) {
    let (Some(s50), Some(s200), Some(k50), Some(k200)) = (sma_50, sma_200, slope_50, slope_200)
    else {
        return (Bias::Neutral, 0.0);
    };
    if s50 == 0.0 || s200 == 0.0 {
        return (Bias::Neutral, 0.0);
    }

    let bias = if close > s200 && s50 > s200 && k50 > 0.0 && k200 > 0.0 {
        Bias::Bullish
    } else if close < s200 && s50 < s200 && k50 < 0.0 && k200 < 0.0 {
        Bias::Bearish
    } else {
        Bias::Neutral
    };

    let mut strength = ((k50.abs() + k200.abs()) * 100.0).clamp(0.0, 100.0);
    if bias == Bias::Neutral {
        strength = strength.min(40.0);
    }
    (bias, strength)
}
