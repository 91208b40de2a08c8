use serde::{Deserialize, Serialize};

/// Which average feeds the fast/slow crossover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverageKind {
    Sma,
    Ema,
}

/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA), seeded with the SMA of the first `period` values
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut ema = calculate_sma(&prices[0..period], period)?;
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
    }

    Some(ema)
}

pub fn calculate_ma(kind: MovingAverageKind, prices: &[f64], period: usize) -> Option<f64> {
    match kind {
        MovingAverageKind::Sma => calculate_sma(prices, period),
        MovingAverageKind::Ema => calculate_ema(prices, period),
    }
}
