use super::{
    signals::{evaluate_entry_conditions, evaluate_exit_conditions, SignalConfig},
    SignalDecision, SignalEvaluator, WindowSet,
};
use crate::models::{Candle, Timeframe};

/// Multi-timeframe trend-following strategy
///
/// Enters when the slower timeframes trend up and the fast timeframe shows
/// healthy momentum:
/// - Price above the trend SMA on every confirmation timeframe
/// - RSI in the healthy zone, fast MA above slow MA
/// - Volume and ADX confirmation
///
/// Exits on overbought RSI, bearish MA ordering, a retrace from the recent
/// high, or three lower closes.
#[derive(Debug, Clone)]
pub struct TrendMomentumStrategy {
    config: SignalConfig,
}

impl TrendMomentumStrategy {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }
}

impl Default for TrendMomentumStrategy {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}

impl SignalEvaluator for TrendMomentumStrategy {
    fn evaluate_entry(&self, windows: &WindowSet) -> SignalDecision {
        let decision = evaluate_entry_conditions(windows, &self.config);
        tracing::debug!("{}", decision.rationale);
        decision
    }

    fn evaluate_exit(&self, candles: &[Candle]) -> SignalDecision {
        let decision = evaluate_exit_conditions(candles, &self.config);
        tracing::debug!("{}", decision.rationale);
        decision
    }

    fn name(&self) -> &str {
        "TrendMomentum"
    }

    fn fast_timeframe(&self) -> Timeframe {
        self.config.fast_timeframe
    }

    fn required_windows(&self) -> Vec<(Timeframe, usize)> {
        let mut windows = vec![(
            self.config.fast_timeframe,
            self.config
                .indicators
                .min_candles()
                .max(self.config.retrace_lookback),
        )];
        for tf in &self.config.confirm_timeframes {
            if *tf != self.config.fast_timeframe {
                windows.push((*tf, self.config.trend_window_len()));
            }
        }
        windows
    }
}
