// Technical indicators module
// Pure functions over candle windows: MA, RSI, ATR, ADX, volume baseline

pub mod adx;
pub mod atr;
pub mod market_analysis;
pub mod moving_average;
pub mod rsi;

pub use adx::calculate_adx;
pub use atr::calculate_atr;
pub use market_analysis::{
    calculate_average_volume, is_reversal_pattern, is_volume_confirmed, lower_closes_drop,
    recent_high,
};
pub use moving_average::{calculate_ema, calculate_ma, calculate_sma, MovingAverageKind};
pub use rsi::calculate_rsi;

use crate::models::Candle;
use serde::{Deserialize, Serialize};

/// Periods for the fast-timeframe indicator set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub fast_ma_period: usize,
    pub slow_ma_period: usize,
    pub ma_kind: MovingAverageKind,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    pub volume_period: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            fast_ma_period: 9,
            slow_ma_period: 21,
            ma_kind: MovingAverageKind::Ema,
            rsi_period: 14,
            atr_period: 14,
            adx_period: 14,
            volume_period: 20,
        }
    }
}

impl IndicatorSettings {
    /// Closed candles needed before every indicator (and its previous-bar value) is available
    pub fn min_candles(&self) -> usize {
        let slowest = [
            self.slow_ma_period,
            self.fast_ma_period,
            self.rsi_period + 1,
            self.atr_period + 1,
            2 * self.adx_period,
            self.volume_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        slowest + 1
    }
}

/// Indicator values for one tick, recomputed from scratch and never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub fast_ma: f64,
    pub slow_ma: f64,
    pub prev_fast_ma: f64,
    pub prev_slow_ma: f64,
    pub rsi: f64,
    pub atr: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub prev_adx: Option<f64>,
    pub volume_baseline: f64,
    pub last_volume: f64,
    /// Close of the latest closed candle
    pub last_close: f64,
    /// Live close when a trailing open candle exists, otherwise `last_close`
    pub last_price: f64,
}

impl IndicatorSnapshot {
    /// Compute every indicator over the closed part of `candles`
    ///
    /// Returns the names of the unavailable indicators on failure.
    pub fn compute(
        candles: &[Candle],
        settings: &IndicatorSettings,
    ) -> Result<Self, Vec<&'static str>> {
        let closed = closed_only(candles);
        let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
        let prev_closes = &closes[..closes.len().saturating_sub(1)];

        let fast_ma = calculate_ma(settings.ma_kind, &closes, settings.fast_ma_period);
        let slow_ma = calculate_ma(settings.ma_kind, &closes, settings.slow_ma_period);
        let prev_fast_ma = calculate_ma(settings.ma_kind, prev_closes, settings.fast_ma_period);
        let prev_slow_ma = calculate_ma(settings.ma_kind, prev_closes, settings.slow_ma_period);
        let rsi = calculate_rsi(&closes, settings.rsi_period);
        let atr = calculate_atr(closed, settings.atr_period);
        let adx = calculate_adx(closed, settings.adx_period);
        let prev_adx = if closed.is_empty() {
            None
        } else {
            calculate_adx(&closed[..closed.len() - 1], settings.adx_period).map(|(a, _, _)| a)
        };
        let volume_baseline = calculate_average_volume(closed, settings.volume_period);

        let mut missing = Vec::new();
        if fast_ma.is_none() || prev_fast_ma.is_none() {
            missing.push("fast_ma");
        }
        if slow_ma.is_none() || prev_slow_ma.is_none() {
            missing.push("slow_ma");
        }
        if rsi.is_none() {
            missing.push("rsi");
        }
        if atr.is_none() {
            missing.push("atr");
        }
        if adx.is_none() {
            missing.push("adx");
        }
        if volume_baseline.is_none() {
            missing.push("volume_baseline");
        }

        match (
            fast_ma,
            slow_ma,
            prev_fast_ma,
            prev_slow_ma,
            rsi,
            atr,
            adx,
            volume_baseline,
            closed.last(),
        ) {
            (
                Some(fast_ma),
                Some(slow_ma),
                Some(prev_fast_ma),
                Some(prev_slow_ma),
                Some(rsi),
                Some(atr),
                Some((adx, plus_di, minus_di)),
                Some(volume_baseline),
                Some(last),
            ) => Ok(Self {
                fast_ma,
                slow_ma,
                prev_fast_ma,
                prev_slow_ma,
                rsi,
                atr,
                adx,
                plus_di,
                minus_di,
                prev_adx,
                volume_baseline,
                last_volume: last.volume,
                last_close: last.close,
                last_price: candles.last().map(|c| c.close).unwrap_or(last.close),
            }),
            _ => {
                if missing.is_empty() {
                    missing.push("candles");
                }
                Err(missing)
            }
        }
    }
}

/// Drop a trailing not-yet-closed candle
///
/// Only the last candle of a live window can be open.
pub fn closed_only(candles: &[Candle]) -> &[Candle] {
    match candles.last() {
        Some(last) if !last.is_closed => &candles[..candles.len() - 1],
        _ => candles,
    }
}
