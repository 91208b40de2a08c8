// Signal evaluation module
pub mod signals;
pub mod trend_momentum;

use crate::models::{Candle, Timeframe};
use std::collections::HashMap;

pub use signals::SignalConfig;
pub use trend_momentum::TrendMomentumStrategy;

/// Candle windows keyed by timeframe, as handed to the evaluator each tick
pub type WindowSet = HashMap<Timeframe, Vec<Candle>>;

/// Outcome of an entry or exit evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecision {
    pub fired: bool,
    pub rationale: String,
}

impl SignalDecision {
    pub fn new(fired: bool, rationale: impl Into<String>) -> Self {
        Self {
            fired,
            rationale: rationale.into(),
        }
    }

    /// Never fires; `which` names the missing inputs
    pub fn insufficient(which: impl AsRef<str>) -> Self {
        Self::new(false, format!("insufficient data: {}", which.as_ref()))
    }

    pub fn is_insufficient(&self) -> bool {
        self.rationale.starts_with("insufficient data")
    }
}

/// Entry/exit decision logic over candle windows
pub trait SignalEvaluator: Send + Sync {
    /// Conjunctive entry gate across the fast and confirmation timeframes
    fn evaluate_entry(&self, windows: &WindowSet) -> SignalDecision;

    /// Disjunctive exit check on the fast timeframe
    fn evaluate_exit(&self, candles: &[Candle]) -> SignalDecision;

    /// Get evaluator name
    fn name(&self) -> &str;

    /// Timeframe whose candles drive the pending-entry confirmation and exits
    fn fast_timeframe(&self) -> Timeframe;

    /// Every window the evaluator reads, with its warm-up length
    fn required_windows(&self) -> Vec<(Timeframe, usize)>;
}
