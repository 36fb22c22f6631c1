//! Tumbling-window candle aggregation

use super::{Candle, WindowKey};
use crate::feed::Trade;
use std::collections::HashMap;
use std::time::Duration;

/// Keyed state table of in-progress candles
///
/// Every trade mutates exactly one window and returns that window's full
/// current state, so the output is a changelog keyed by
/// `(product_id, window_end_ms)`. Windows are never evicted and late trades
/// still update their window.
#[derive(Debug)]
pub struct CandleAggregator {
    window_ms: i64,
    candles: HashMap<WindowKey, Candle>,
}

impl CandleAggregator {
    /// Create an aggregator with the given window length (rounded to whole
    /// milliseconds, minimum 1ms)
    pub fn new(window: Duration) -> Self {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            window_ms,
            candles: HashMap::new(),
        }
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Fold a trade into its window and return the window's current candle
    pub fn on_trade(&mut self, trade: &Trade) -> Candle {
        let key = WindowKey::for_timestamp(&trade.product_id, trade.timestamp_ms, self.window_ms);
        let window_end_ms = key.window_id + self.window_ms;

        let candle = self
            .candles
            .entry(key)
            .and_modify(|c| c.update(trade.price))
            .or_insert_with(|| Candle::new(trade.product_id.clone(), window_end_ms, trade.price));

        candle.clone()
    }

    /// Reinstate a previously emitted candle as its window's current state
    ///
    /// Returns false when the candle does not end on a window boundary of this
    /// aggregator's window length.
    pub fn restore(&mut self, candle: Candle) -> bool {
        let window_id = candle.window_end_ms - self.window_ms;
        if window_id.rem_euclid(self.window_ms) != 0 {
            return false;
        }
        let key = WindowKey {
            product_id: candle.product_id.clone(),
            window_id,
        };
        self.candles.insert(key, candle);
        true
    }

    /// Current candle for a window, if any trade landed in it
    pub fn get(&self, key: &WindowKey) -> Option<&Candle> {
        self.candles.get(key)
    }

    /// Number of windows tracked
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether no trade has been aggregated yet
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}
