use chrono::{DateTime, Utc};
use serde::Serialize;

use super::PositionPhase;
use crate::models::Position;

/// Risk view of the open position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionStatus {
    pub entry_price: f64,
    pub size: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    pub trailing_sl_price: f64,
    pub trailing_activated: bool,
    pub unrealized_pnl_percent: Option<f64>,
    pub entry_approximated: bool,
}

impl PositionStatus {
    pub fn new(position: &Position, price: Option<f64>) -> Self {
        Self {
            entry_price: position.entry_price,
            size: position.size,
            sl_price: position.sl_price,
            tp_price: position.tp_price,
            trailing_sl_price: position.trailing_sl_price,
            trailing_activated: position.trailing_activated,
            unrealized_pnl_percent: price.map(|p| position.pnl_percent(p)),
            entry_approximated: position.entry_approximated,
        }
    }
}

/// Latest decision of the engine, published after every tick
///
/// Read-only for consumers; only the state machine writes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub symbol: String,
    pub phase: PositionPhase,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_price: Option<f64>,
    pub entry_signal: bool,
    pub rationale: String,
    pub position: Option<PositionStatus>,
    pub stream_connected: bool,
    pub failure_streak: u32,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    /// One-line operator summary
    pub fn summary(&self) -> String {
        let price = self
            .last_price
            .map(|p| format!("{:.6}", p))
            .unwrap_or_else(|| "n/a".to_string());

        match &self.position {
            Some(p) => format!(
                "{} {} @ {} | entry {:.6} SL {:.6} TP {:.6} trail {:.6}{} | P&L {}",
                self.symbol,
                self.phase,
                price,
                p.entry_price,
                p.sl_price,
                p.tp_price,
                p.trailing_sl_price,
                if p.trailing_activated { " (active)" } else { "" },
                p.unrealized_pnl_percent
                    .map(|v| format!("{:+.2}%", v))
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            None => format!("{} {} @ {} | {}", self.symbol, self.phase, price, self.rationale),
        }
    }
}
