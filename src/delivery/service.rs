//! Bus-to-store delivery loop

use super::{BufferState, DeliveryBuffer, DeliveryError, DeliveryMode, FlushPolicy};
use crate::bus::{Consumer, Offset};
use crate::store::{FeatureRow, FeatureStoreClient};
use crate::telemetry::MALFORMED_MESSAGES;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a single poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing arrived and no flush was due
    Idle,
    /// A record was added to the buffer
    Buffered,
    /// The message could not be decoded
    Skipped,
    /// This many records were written and their offsets committed
    Flushed(usize),
}

/// Consumes finalized rows and delivers them in bulk to a feature store
pub struct DeliveryService<C, S: ?Sized, R> {
    consumer: C,
    store: Arc<S>,
    buffer: DeliveryBuffer<R, Offset>,
    poll_timeout: Duration,
}

impl<C, S, R> DeliveryService<C, S, R>
where
    C: Consumer,
    S: FeatureStoreClient<R> + ?Sized,
    R: FeatureRow + DeserializeOwned,
{
    pub fn new(
        consumer: C,
        store: Arc<S>,
        policy: FlushPolicy,
        mode: DeliveryMode,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            store,
            buffer: DeliveryBuffer::new(policy, mode),
            poll_timeout,
        }
    }

    pub fn buffer(&self) -> &DeliveryBuffer<R, Offset> {
        &self.buffer
    }

    async fn flush(&mut self) -> Result<DeliveryOutcome, DeliveryError> {
        let count = self.buffer.len();
        let acks = self.buffer.flush(&*self.store).await?;
        if !acks.is_empty() {
            self.consumer.commit(&acks).await?;
        }
        if count == 0 {
            Ok(DeliveryOutcome::Idle)
        } else {
            Ok(DeliveryOutcome::Flushed(count))
        }
    }

    /// Poll once, buffer at most one record, flush if a trigger fired
    pub async fn poll_once(&mut self) -> Result<DeliveryOutcome, DeliveryError> {
        if self.buffer.state() == BufferState::Terminated {
            return Err(DeliveryError::Terminated);
        }

        let Some(message) = self.consumer.poll(self.poll_timeout).await? else {
            if self.buffer.interval_elapsed() {
                return self.flush().await;
            }
            return Ok(DeliveryOutcome::Idle);
        };

        match message.decode::<R>() {
            Ok(record) => {
                self.buffer.push(record, message.offset())?;
                if self.buffer.size_trigger() {
                    return self.flush().await;
                }
                Ok(DeliveryOutcome::Buffered)
            }
            Err(e) => {
                metrics::counter!(MALFORMED_MESSAGES, "stage" => "deliver")
                    .increment(1);
                tracing::warn!(error = %e, "Skipping malformed record");
                self.buffer.acknowledge(message.offset())?;
                Ok(DeliveryOutcome::Skipped)
            }
        }
    }

    /// Run until cancelled or a write fails
    ///
    /// Cancellation does not flush: pending records stay uncommitted on the bus
    /// and are redelivered to the next consumer of the group.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DeliveryError> {
        let policy = self.buffer.policy();
        tracing::info!(
            max_size = policy.max_size,
            max_interval_ms = policy.max_interval.as_millis() as u64,
            "Delivery service started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => {
                    outcome?;
                }
            }
        }

        if !self.buffer.is_empty() {
            tracing::warn!(
                pending = self.buffer.len(),
                "Delivery stopped with unflushed records"
            );
        }
        tracing::info!("Delivery service stopped");
        Ok(())
    }
}
