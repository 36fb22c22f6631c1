//! OHLC candle aggregation
//!
//! Folds trades into tumbling-window candles and re-emits the current candle
//! after every trade.

mod aggregator;
mod service;
mod types;

pub use aggregator::CandleAggregator;
pub use service::{AggregateOutcome, AggregationService};
pub use types::{Candle, WindowKey};
