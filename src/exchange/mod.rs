// Broker collaborators
pub mod binance;
pub mod guard;
pub mod paper;

pub use binance::BinanceClient;
pub use guard::bounded;
pub use paper::PaperBroker;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{AccountTrade, OrderResult, TradingPair};
use crate::Result;

/// Account and order operations the engine needs from an exchange
///
/// Every call may fail; callers treat a failure as "try again next tick".
#[async_trait]
pub trait Broker: Send + Sync {
    /// Free balance per asset
    async fn get_balance(&self) -> Result<HashMap<String, f64>>;

    /// Most recent account fills for the pair, oldest first
    async fn get_last_trades(&self, pair: &TradingPair, limit: usize)
        -> Result<Vec<AccountTrade>>;

    /// Market buy spending `quote_amount` of the quote asset
    async fn place_market_buy(&self, pair: &TradingPair, quote_amount: f64)
        -> Result<OrderResult>;

    /// Market sell of `base_amount` of the base asset
    async fn place_market_sell(&self, pair: &TradingPair, base_amount: f64)
        -> Result<OrderResult>;

    async fn get_current_price(&self, pair: &TradingPair) -> Result<f64>;
}
