/// Average Directional Index (ADX) - Measures trend strength
///
/// ADX ranges from 0 to 100:
/// - ADX > 25: Strong trend (bull or bear)
/// - ADX 20-25: Moderate trend
/// - ADX < 20: Weak trend / choppy / ranging market
///
/// Also returns +DI and -DI to determine trend direction:
/// - +DI > -DI: Uptrend
/// - -DI > +DI: Downtrend
use super::atr::true_ranges;
use crate::models::Candle;

/// Calculate ADX, +DI, and -DI for trend strength and direction
///
/// DX is Wilder-smoothed over `period` to produce ADX, so at least
/// `2 * period` candles are required.
///
/// Returns (adx, plus_di, minus_di) or None if insufficient data
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < 2 * period {
        return None;
    }

    let trs = true_ranges(candles);
    let mut plus_dms = Vec::with_capacity(trs.len());
    let mut minus_dms = Vec::with_capacity(trs.len());

    for w in candles.windows(2) {
        let up_move = w[1].high - w[0].high;
        let down_move = w[0].low - w[1].low;

        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let smoothed_tr = wilder_series(&trs, period);
    let smoothed_plus = wilder_series(&plus_dms, period);
    let smoothed_minus = wilder_series(&minus_dms, period);

    let mut dxs = Vec::with_capacity(smoothed_tr.len());
    let mut last_di = (0.0, 0.0);

    for i in 0..smoothed_tr.len() {
        let (plus_di, minus_di) = if smoothed_tr[i] > 0.0 {
            (
                smoothed_plus[i] / smoothed_tr[i] * 100.0,
                smoothed_minus[i] / smoothed_tr[i] * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        let di_sum = plus_di + minus_di;
        dxs.push(if di_sum > 0.0 {
            (plus_di - minus_di).abs() / di_sum * 100.0
        } else {
            0.0
        });
        last_di = (plus_di, minus_di);
    }

    let adx = *wilder_series(&dxs, period).last()?;
    Some((adx, last_di.0, last_di.1))
}

/// Wilder's smoothing, one value per input from index `period - 1` onwards
fn wilder_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period {
        return Vec::new();
    }

    let n = period as f64;
    let mut smoothed = values[..period].iter().sum::<f64>() / n;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(smoothed);

    for value in &values[period..] {
        smoothed = (smoothed * (n - 1.0) + value) / n;
        series.push(smoothed);
    }

    series
}
