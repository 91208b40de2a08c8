use crate::models::{AccountTrade, BotState, TradeSide};

/// What the exchange balance says about local state
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    InSync,
    /// Open locally, but the holdings are gone: closed outside the bot
    ClearPosition { expected: f64, observed: f64 },
    /// Flat locally, but holding more than dust: rebuild the position
    Rebuild { observed: f64 },
}

/// Compare local state against the external base-asset balance
///
/// The exchange is authoritative. Positions only count as closed when the
/// balance drops below `ratio` of the recorded size, so fees and rounding
/// never trigger a reset.
pub fn assess(state: &BotState, base_balance: f64, dust_threshold: f64, ratio: f64) -> ReconcileAction {
    match &state.position {
        Some(position) => {
            if base_balance < position.size * ratio {
                ReconcileAction::ClearPosition {
                    expected: position.size,
                    observed: base_balance,
                }
            } else {
                ReconcileAction::InSync
            }
        }
        None if base_balance > dust_threshold => ReconcileAction::Rebuild {
            observed: base_balance,
        },
        None => ReconcileAction::InSync,
    }
}

/// Most recent buy among the account's fills
pub fn last_buy(trades: &[AccountTrade]) -> Option<&AccountTrade> {
    trades
        .iter()
        .filter(|t| t.side == TradeSide::Buy && t.price > 0.0)
        .max_by_key(|t| t.timestamp)
}
