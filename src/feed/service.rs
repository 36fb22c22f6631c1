//! Source-to-bus ingestion loop

use super::{SourceError, TradeSource};
use crate::bus::{produce_json, BusError, Producer};
use crate::telemetry::TRADES_INGESTED;
use tokio_util::sync::CancellationToken;

/// Why ingestion stopped
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Publishes every trade of a source to the trade topic
pub struct IngestionService<P> {
    source: Box<dyn TradeSource>,
    producer: P,
    topic: String,
    published: u64,
}

impl<P: Producer> IngestionService<P> {
    pub fn new(source: Box<dyn TradeSource>, producer: P, topic: impl Into<String>) -> Self {
        Self {
            source,
            producer,
            topic: topic.into(),
            published: 0,
        }
    }

    /// Trades published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Fetch one batch and publish it; returns the batch size
    pub async fn step(&mut self) -> Result<usize, IngestionError> {
        let trades = self.source.get_trades().await?;

        for trade in &trades {
            produce_json(
                &self.producer,
                &self.topic,
                &trade.product_id,
                trade,
                trade.timestamp_ms,
            )
            .await?;
        }

        let count = trades.len();
        if count > 0 {
            self.published += count as u64;
            metrics::counter!(TRADES_INGESTED).increment(count as u64);
            tracing::debug!(count, total = self.published, "Published trades");
        }
        Ok(count)
    }

    /// Run until the source is exhausted, cancelled, or fails
    pub async fn run(mut self, cancel: CancellationToken) -> Result<u64, IngestionError> {
        tracing::info!(topic = %self.topic, "Ingestion service started");

        while !self.source.is_done() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.step() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Ingestion failed");
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(
            published = self.published,
            exhausted = self.source.is_done(),
            "Ingestion service stopped"
        );
        Ok(self.published)
    }
}
