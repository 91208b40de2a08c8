// Market data: candle cache shared with the kline stream
pub mod candle_buffer;
pub mod stream;

pub use candle_buffer::CandleBuffer;
pub use stream::KlineStream;

use async_trait::async_trait;

use crate::models::{Candle, Timeframe, TradingPair};
use crate::Result;

/// Historical candle provider used to warm up and backfill the cache
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Most recent `limit` candles, oldest first; the last one may still be open
    async fn fetch_history(
        &self,
        pair: &TradingPair,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Snapshot of one timeframe buffer handed to a tick
#[derive(Debug, Clone)]
pub struct CandleWindow {
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    /// Fewer closed candles than the slowest indicator needs
    pub insufficient: bool,
}

impl CandleWindow {
    /// Close of the newest candle, open or not
    pub fn last_price(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }
}
