/// Volume and price structure analysis
///
/// Volume baseline/confirmation, recent highs for retrace checks and the
/// three-lower-closes reversal pattern.
use crate::models::Candle;

/// Average volume of the `period` candles before the latest one
pub fn calculate_average_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let end = candles.len() - 1;
    let total_volume: f64 = candles[end - period..end].iter().map(|c| c.volume).sum();
    Some(total_volume / period as f64)
}

/// Latest volume exceeds baseline * factor
///
/// Returns None when the baseline cannot be computed.
pub fn is_volume_confirmed(candles: &[Candle], period: usize, factor: f64) -> Option<bool> {
    let baseline = calculate_average_volume(candles, period)?;
    let current = candles.last()?.volume;
    Some(current > baseline * factor)
}

/// Highest high over the last `lookback` candles
pub fn recent_high(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.is_empty() {
        return None;
    }

    let start = candles.len().saturating_sub(lookback);
    candles[start..]
        .iter()
        .map(|c| c.high)
        .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))))
}

/// Three consecutive candles each closing and printing a low below the one before
///
/// Returns the cumulative drop in percent (from the reference close to the
/// latest close) when the pattern is present, None otherwise. Needs 4 candles.
pub fn lower_closes_drop(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 4 {
        return None;
    }

    let recent = &candles[candles.len() - 4..];
    let descending = recent
        .windows(2)
        .all(|w| w[1].close < w[0].close && w[1].low < w[0].low);

    if !descending || recent[0].close <= 0.0 {
        return None;
    }

    Some((recent[0].close - recent[3].close) / recent[0].close * 100.0)
}

/// Structural reversal: three lower closes with lower lows, cumulative drop above `min_drop_pct`
pub fn is_reversal_pattern(candles: &[Candle], min_drop_pct: f64) -> bool {
    lower_closes_drop(candles)
        .map(|drop| drop > min_drop_pct)
        .unwrap_or(false)
}
