use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ExitReason, Position};

/// ATR multipliers and cost estimates for sizing risk boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub sl_multiplier: f64,
    pub tp_multiplier: f64,
    pub trailing_activation_multiplier: f64,
    pub trailing_multiplier: f64,
    pub fee_rate: f64,     // Per side, fraction (0.001 = 0.1%)
    pub slippage_pct: f64, // Fraction
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            sl_multiplier: 1.5,                  // 1.5 ATR below entry
            tp_multiplier: 3.0,                  // 3 ATR above entry
            trailing_activation_multiplier: 2.0, // Trail once 2 ATR in profit
            trailing_multiplier: 1.0,            // Trail 1 ATR below the high
            fee_rate: 0.001,
            slippage_pct: 0.001,
        }
    }
}

/// Initial boundaries for a new position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLevels {
    pub sl_price: f64,
    pub tp_price: f64,
    pub initial_trailing_sl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn initialize_risk(&self, entry_price: f64, atr: f64) -> RiskLevels {
        let sl_price = entry_price - atr * self.config.sl_multiplier;
        RiskLevels {
            sl_price,
            tp_price: entry_price + atr * self.config.tp_multiplier,
            initial_trailing_sl: sl_price,
        }
    }

    /// Build a position with ATR-sized boundaries
    pub fn open_position(
        &self,
        entry_price: f64,
        size: f64,
        entry_time: DateTime<Utc>,
        atr: f64,
    ) -> Position {
        let levels = self.initialize_risk(entry_price, atr);
        Position {
            entry_price,
            size,
            entry_time,
            sl_price: levels.sl_price,
            tp_price: levels.tp_price,
            trailing_sl_price: levels.initial_trailing_sl,
            trailing_activated: false,
            highest_price_since_activation: None,
            entry_approximated: false,
        }
    }

    /// Advance the trailing stop for the current price
    ///
    /// Activates once price exceeds entry + ATR * activation multiplier. While
    /// active the stop is `max(previous, highest - ATR * trailing, sl)`, so it
    /// never moves down.
    pub fn update_trailing(&self, position: &Position, current_price: f64, atr: f64) -> Position {
        let mut updated = position.clone();

        if !updated.trailing_activated {
            let activation_price =
                updated.entry_price + atr * self.config.trailing_activation_multiplier;
            if current_price <= activation_price {
                return updated;
            }
            updated.trailing_activated = true;
            tracing::info!(
                "🎯 Trailing stop activated at {:.6} (activation {:.6})",
                current_price,
                activation_price
            );
        }

        let highest = updated
            .highest_price_since_activation
            .map_or(current_price, |h| h.max(current_price));
        updated.highest_price_since_activation = Some(highest);

        let candidate = highest - atr * self.config.trailing_multiplier;
        updated.trailing_sl_price = updated
            .trailing_sl_price
            .max(candidate)
            .max(updated.sl_price);

        updated
    }

    /// Stop-loss first, then take-profit (only before trailing activates), then trailing stop
    pub fn check_exit(&self, current_price: f64, position: &Position) -> Option<ExitReason> {
        if current_price <= position.sl_price {
            return Some(ExitReason::StopLoss);
        }

        if !position.trailing_activated && current_price >= position.tp_price {
            return Some(ExitReason::TakeProfit);
        }

        if position.trailing_activated && current_price <= position.trailing_sl_price {
            return Some(ExitReason::TrailingStop);
        }

        None
    }

    /// Projected take-profit distance must beat round-trip fees plus slippage
    ///
    /// Returns whether the check passed and a human-readable detail.
    pub fn passes_profitability(&self, entry_price: f64, atr: f64) -> (bool, String) {
        if entry_price <= 0.0 {
            return (false, format!("invalid entry price {}", entry_price));
        }

        let projected = atr * self.config.tp_multiplier / entry_price;
        let cost = 2.0 * self.config.fee_rate + self.config.slippage_pct;
        let ok = projected > cost;

        (
            ok,
            format!(
                "projected TP {:.3}% vs cost {:.3}%",
                projected * 100.0,
                cost * 100.0
            ),
        )
    }
}
