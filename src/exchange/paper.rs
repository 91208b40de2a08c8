use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::Broker;
use crate::models::{AccountTrade, OrderResult, TradeSide, TradingPair};
use crate::{BotError, Result};

#[derive(Debug, Default)]
struct PaperWallet {
    balances: HashMap<String, f64>,
    trades: Vec<AccountTrade>,
}

/// Dry-run broker
///
/// Fills market orders at the live price from `prices` with slippage and
/// fees applied, against simulated balances kept in memory.
pub struct PaperBroker {
    prices: Arc<dyn Broker>,
    fee_rate: f64,
    slippage_pct: f64,
    wallet: Mutex<PaperWallet>,
    next_order_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(
        prices: Arc<dyn Broker>,
        pair: &TradingPair,
        initial_quote: f64,
        fee_rate: f64,
        slippage_pct: f64,
    ) -> Self {
        let mut wallet = PaperWallet::default();
        wallet.balances.insert(pair.quote.clone(), initial_quote);
        wallet.balances.insert(pair.base.clone(), 0.0);

        Self {
            prices,
            fee_rate,
            slippage_pct,
            wallet: Mutex::new(wallet),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Seed the base balance, e.g. with a persisted position after a restart
    pub fn with_base_balance(self, pair: &TradingPair, amount: f64) -> Self {
        if let Ok(mut wallet) = self.wallet.lock() {
            wallet.balances.insert(pair.base.clone(), amount);
        }
        self
    }

    fn wallet(&self) -> Result<std::sync::MutexGuard<'_, PaperWallet>> {
        self.wallet
            .lock()
            .map_err(|e| BotError::OrderExecution(format!("paper wallet lock poisoned: {}", e)))
    }

    fn order_id(&self) -> String {
        format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn get_balance(&self) -> Result<HashMap<String, f64>> {
        Ok(self.wallet()?.balances.clone())
    }

    async fn get_last_trades(&self, _pair: &TradingPair, limit: usize) -> Result<Vec<AccountTrade>> {
        let wallet = self.wallet()?;
        let skip = wallet.trades.len().saturating_sub(limit);
        Ok(wallet.trades[skip..].to_vec())
    }

    async fn place_market_buy(&self, pair: &TradingPair, quote_amount: f64) -> Result<OrderResult> {
        let market = self.prices.get_current_price(pair).await?;
        let price = market * (1.0 + self.slippage_pct);

        let mut wallet = self.wallet()?;
        let available = wallet.balances.get(&pair.quote).copied().unwrap_or(0.0);
        if quote_amount <= 0.0 || available < quote_amount {
            return Err(BotError::OrderExecution(format!(
                "insufficient {} balance: {:.4} < {:.4}",
                pair.quote, available, quote_amount
            )));
        }

        let filled = quote_amount / price * (1.0 - self.fee_rate);
        *wallet.balances.entry(pair.quote.clone()).or_insert(0.0) -= quote_amount;
        *wallet.balances.entry(pair.base.clone()).or_insert(0.0) += filled;

        let now = Utc::now();
        wallet.trades.push(AccountTrade {
            side: TradeSide::Buy,
            price,
            quantity: filled,
            timestamp: now,
        });

        tracing::info!(
            pair = %pair,
            price,
            filled,
            "🧪 DRY RUN: simulated BUY"
        );

        Ok(OrderResult {
            order_id: self.order_id(),
            side: TradeSide::Buy,
            filled_base: filled,
            average_price: price,
            timestamp: now,
        })
    }

    async fn place_market_sell(&self, pair: &TradingPair, base_amount: f64) -> Result<OrderResult> {
        let market = self.prices.get_current_price(pair).await?;
        let price = market * (1.0 - self.slippage_pct);

        let mut wallet = self.wallet()?;
        let available = wallet.balances.get(&pair.base).copied().unwrap_or(0.0);
        if base_amount <= 0.0 || available + 1e-9 < base_amount {
            return Err(BotError::OrderExecution(format!(
                "insufficient {} balance: {:.8} < {:.8}",
                pair.base, available, base_amount
            )));
        }

        let proceeds = base_amount * price * (1.0 - self.fee_rate);
        let base = wallet.balances.entry(pair.base.clone()).or_insert(0.0);
        *base = (*base - base_amount).max(0.0);
        *wallet.balances.entry(pair.quote.clone()).or_insert(0.0) += proceeds;

        let now = Utc::now();
        wallet.trades.push(AccountTrade {
            side: TradeSide::Sell,
            price,
            quantity: base_amount,
            timestamp: now,
        });

        tracing::info!(
            pair = %pair,
            price,
            proceeds,
            "🧪 DRY RUN: simulated SELL"
        );

        Ok(OrderResult {
            order_id: self.order_id(),
            side: TradeSide::Sell,
            filled_base: base_amount,
            average_price: price,
            timestamp: now,
        })
    }

    async fn get_current_price(&self, pair: &TradingPair) -> Result<f64> {
        self.prices.get_current_price(pair).await
    }
}
