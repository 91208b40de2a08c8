use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{CandleWindow, MarketDataSource};
use crate::exchange::bounded;
use crate::models::{Candle, Timeframe, TradingPair};
use crate::{BotError, Result};

/// Thread-safe in-memory buffer for candle data
///
/// Maintains a bounded rolling window per timeframe, ordered by open time.
/// Shared between the kline stream task and the tick loop; the lock is only
/// held for the duration of a copy or an insert.
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<Timeframe, VecDeque<Candle>>>>,
    max_candles: usize,
}

fn poisoned<E: std::fmt::Display>(e: E) -> BotError {
    BotError::DataUnavailable(format!("candle buffer lock poisoned: {}", e))
}

fn closed_count(candles: &[Candle]) -> usize {
    candles.iter().filter(|c| c.is_closed).count()
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per timeframe
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles: max_candles.max(1),
        }
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }

    /// Insert or replace a candle
    ///
    /// A newer open time appends, an equal open time replaces the live
    /// candle, an older one is ignored. Returns whether the buffer changed.
    pub fn upsert(&self, timeframe: Timeframe, candle: Candle) -> Result<bool> {
        let mut data = self.data.write().map_err(poisoned)?;
        let candles = data.entry(timeframe).or_default();

        match candles.back_mut() {
            Some(last) if candle.open_time == last.open_time => {
                *last = candle;
            }
            Some(last) if candle.open_time < last.open_time => {
                return Ok(false);
            }
            _ => candles.push_back(candle),
        }

        while candles.len() > self.max_candles {
            candles.pop_front();
        }

        Ok(true)
    }

    /// Merge a historical batch by open time
    ///
    /// Buffered entries win on equal open times, except that a closed
    /// historical candle always replaces a buffered one that never saw its
    /// close (e.g. a live bar left behind by a disconnect).
    pub fn merge_history(&self, timeframe: Timeframe, history: Vec<Candle>) -> Result<usize> {
        let mut data = self.data.write().map_err(poisoned)?;
        let candles = data.entry(timeframe).or_default();

        let mut merged: BTreeMap<DateTime<Utc>, Candle> = history
            .into_iter()
            .map(|c| (c.open_time, c))
            .collect();
        for candle in candles.drain(..) {
            let superseded = !candle.is_closed
                && merged
                    .get(&candle.open_time)
                    .is_some_and(|historical| historical.is_closed);
            if !superseded {
                merged.insert(candle.open_time, candle);
            }
        }

        let skip = merged.len().saturating_sub(self.max_candles);
        candles.extend(merged.into_values().skip(skip));

        Ok(candles.len())
    }

    /// Consistent copy of one timeframe, oldest first
    pub fn snapshot(&self, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let data = self.data.read().map_err(poisoned)?;

        Ok(data
            .get(&timeframe)
            .map(|deque| deque.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn len(&self, timeframe: Timeframe) -> usize {
        self.data
            .read()
            .map(|data| data.get(&timeframe).map(|d| d.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, timeframe: Timeframe) -> bool {
        self.len(timeframe) == 0
    }

    /// Window for a tick
    ///
    /// Warm buffers are returned as-is. A cold buffer triggers one historical
    /// fetch bounded by `timeout`; if the window is still short afterwards it
    /// is returned with `insufficient` set.
    pub async fn get_window(
        &self,
        source: &dyn MarketDataSource,
        pair: &TradingPair,
        timeframe: Timeframe,
        min_length: usize,
        timeout: Duration,
    ) -> CandleWindow {
        let cached = self.snapshot(timeframe).unwrap_or_default();
        if closed_count(&cached) >= min_length {
            return CandleWindow {
                timeframe,
                candles: cached,
                insufficient: false,
            };
        }

        // One extra bar for the live candle
        let limit = (min_length + 1).max(self.max_candles.min(1000));
        tracing::info!(
            timeframe = %timeframe,
            cached = cached.len(),
            needed = min_length,
            "📥 Window cold, fetching history"
        );

        match bounded(
            "fetch_history",
            timeout,
            source.fetch_history(pair, timeframe, limit),
        )
        .await
        {
            Ok(history) => {
                if let Err(e) = self.merge_history(timeframe, history) {
                    tracing::warn!(timeframe = %timeframe, "Failed to merge history: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(timeframe = %timeframe, "History fallback failed: {}", e);
            }
        }

        let candles = self.snapshot(timeframe).unwrap_or_default();
        let insufficient = closed_count(&candles) < min_length;
        CandleWindow {
            timeframe,
            candles,
            insufficient,
        }
    }
}
