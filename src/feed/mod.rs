//! Trade sources
//!
//! A [`TradeSource`] yields batches of validated trades either from the live
//! exchange stream or from a bounded historical backfill. The ingestion
//! service publishes every trade to the `trade` topic keyed by product.

mod historical;
mod live;
mod service;
mod types;

pub use historical::{HistoricalConfig, HistoricalTradeSource, KRAKEN_REST_URL};
pub use live::{LiveTradeSource, KRAKEN_WS_URL};
pub use service::{IngestionError, IngestionService};
pub use types::{SourceError, Trade, ValidationError};

use async_trait::async_trait;

/// Producer of trade batches
#[async_trait]
pub trait TradeSource: Send {
    /// Next batch of trades, possibly empty
    async fn get_trades(&mut self) -> Result<Vec<Trade>, SourceError>;

    /// Whether the source is exhausted; always false for live streams
    fn is_done(&self) -> bool;
}
