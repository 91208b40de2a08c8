/// Calculate Relative Strength Index (RSI) with Wilder's smoothing
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Needs at least `period + 1` prices.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    // Seed with simple averages over the first `period` changes
    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    let n = period as f64;
    for change in &changes[period..] {
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return Some(50.0); // Flat series
        }
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 50.0 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        assert!(calculate_rsi(&prices, 14).is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        assert_eq!(calculate_rsi(&prices, 5), Some(100.0));
    }

    #[test]
    fn test_rsi_all_losses() {
        let prices = vec![105.0, 104.0, 103.0, 102.0, 101.0, 100.0];
        assert_eq!(calculate_rsi(&prices, 5), Some(0.0));
    }

    #[test]
    fn test_rsi_flat() {
        let prices = vec![100.0; 20];
        assert_eq!(calculate_rsi(&prices, 14), Some(50.0));
    }

    #[test]
    fn test_rsi_smoothing_uses_full_history() {
        // Same last 15 prices, different earlier history
        let tail: Vec<f64> = (0..15).map(|i| 100.0 + (i % 3) as f64).collect();
        let mut rising = (0..20).map(|i| 80.0 + i as f64).collect::<Vec<_>>();
        rising.extend(&tail);
        let mut falling = (0..20).map(|i| 120.0 - i as f64).collect::<Vec<_>>();
        falling.extend(&tail);

        let a = calculate_rsi(&rising, 14).unwrap();
        let b = calculate_rsi(&falling, 14).unwrap();
        assert!(a != b);
    }
}
