//! Trade-to-candle service loop

use super::{Candle, CandleAggregator};
use crate::bus::{produce_json, BusMessage, Consumer, MalformedMessage, Producer};
use crate::feed::Trade;
use crate::telemetry::{CANDLES_EMITTED, MALFORMED_MESSAGES};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    /// Nothing arrived within the poll timeout
    Idle,
    /// A trade was folded in and its candle published
    Emitted(Candle),
    /// The message was unusable and skipped
    Skipped,
}

/// Consumes `trade`, publishes candle snapshots to `ohlc`
pub struct AggregationService<C, P> {
    consumer: C,
    producer: P,
    output_topic: String,
    poll_timeout: Duration,
    aggregator: CandleAggregator,
}

impl<C: Consumer, P: Producer> AggregationService<C, P> {
    pub fn new(
        consumer: C,
        producer: P,
        output_topic: impl Into<String>,
        window: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            producer,
            output_topic: output_topic.into(),
            poll_timeout,
            aggregator: CandleAggregator::new(window),
        }
    }

    /// Aggregator state, for inspection
    pub fn aggregator(&self) -> &CandleAggregator {
        &self.aggregator
    }

    /// Rebuild window state from the candle changelog before consuming trades
    ///
    /// Reads `changelog` until a poll comes back empty; later candles for a
    /// window replace earlier ones. Nothing is committed on the changelog so
    /// every restore starts from the beginning of the topic.
    pub async fn restore<R: Consumer>(&mut self, changelog: &mut R) -> anyhow::Result<usize> {
        let mut restored = 0;

        while let Some(message) = changelog.poll(self.poll_timeout).await? {
            match message.decode::<Candle>() {
                Ok(candle) => {
                    if self.aggregator.restore(candle) {
                        restored += 1;
                    } else {
                        tracing::debug!(
                            offset = message.offset,
                            "Ignoring candle from a different window length"
                        );
                    }
                }
                Err(e) => {
                    metrics::counter!(MALFORMED_MESSAGES, "stage" => "restore").increment(1);
                    tracing::warn!(error = %e, "Skipping malformed candle");
                }
            }
        }

        tracing::info!(
            records = restored,
            windows = self.aggregator.len(),
            "Restored candle state"
        );
        Ok(restored)
    }

    fn decode_trade(message: &BusMessage) -> Result<Trade, MalformedMessage> {
        let trade: Trade = message.decode()?;
        trade.validate().map_err(|e| MalformedMessage {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason: e.to_string(),
        })?;
        Ok(trade)
    }

    /// Poll once and process at most one trade
    ///
    /// The trade's offset is committed only after its candle is published.
    pub async fn poll_once(&mut self) -> anyhow::Result<AggregateOutcome> {
        let Some(message) = self.consumer.poll(self.poll_timeout).await? else {
            return Ok(AggregateOutcome::Idle);
        };

        let trade = match Self::decode_trade(&message) {
            Ok(trade) => trade,
            Err(e) => {
                metrics::counter!(MALFORMED_MESSAGES, "stage" => "aggregate")
                    .increment(1);
                tracing::warn!(error = %e, "Skipping malformed trade");
                self.consumer.commit(&[message.offset()]).await?;
                return Ok(AggregateOutcome::Skipped);
            }
        };

        let candle = self.aggregator.on_trade(&trade);

        produce_json(
            &self.producer,
            &self.output_topic,
            &candle.product_id,
            &candle,
            candle.window_end_ms,
        )
        .await?;
        self.consumer.commit(&[message.offset()]).await?;

        metrics::counter!(CANDLES_EMITTED).increment(1);
        tracing::debug!(
            product_id = %candle.product_id,
            window_end_ms = candle.window_end_ms,
            open = candle.open,
            high = candle.high,
            low = candle.low,
            close = candle.close,
            "Candle updated"
        );

        Ok(AggregateOutcome::Emitted(candle))
    }

    /// Run until cancelled or a bus error occurs
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            window_ms = self.aggregator.window_ms(),
            output_topic = %self.output_topic,
            "Aggregation service started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => {
                    outcome?;
                }
            }
        }

        tracing::info!(windows = self.aggregator.len(), "Aggregation service stopped");
        Ok(())
    }
}
