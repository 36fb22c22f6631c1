//! Candle types

use crate::store::{FeatureRow, RowKey};
use serde::{Deserialize, Serialize};

/// Tumbling-window identity of a trade
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub product_id: String,
    /// Window start in epoch milliseconds, a multiple of the window length
    pub window_id: i64,
}

impl WindowKey {
    /// Window containing `timestamp_ms`
    pub fn for_timestamp(product_id: &str, timestamp_ms: i64, window_ms: i64) -> Self {
        Self {
            product_id: product_id.to_string(),
            window_id: timestamp_ms.div_euclid(window_ms) * window_ms,
        }
    }
}

/// OHLC summary of one product over one window
///
/// Serialized as the `ohlc` topic wire record:
/// `{timestamp, open, high, low, close, product_id}` where `timestamp` is the
/// window end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "timestamp")]
    pub window_end_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub product_id: String,
}

impl Candle {
    /// Candle opened by a single price
    pub fn new(product_id: impl Into<String>, window_end_ms: i64, price: f64) -> Self {
        Self {
            window_end_ms,
            open: price,
            high: price,
            low: price,
            close: price,
            product_id: product_id.into(),
        }
    }

    /// Fold one more price into the candle
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

impl FeatureRow for Candle {
    fn primary_key(&self) -> RowKey {
        RowKey {
            product_id: self.product_id.clone(),
            timestamp_ms: self.window_end_ms,
        }
    }
}
