//! Bulk delivery buffer
//!
//! Records accumulate together with the bus acknowledgements that produced
//! them. A flush writes every pending record in one bulk call and hands the
//! acknowledgements back only once that write succeeded, so the caller never
//! commits an offset whose record is not stored.

use super::{BufferState, DeliveryError, DeliveryMode, FlushPolicy};
use crate::store::{FeatureRow, FeatureStoreClient, InsertOptions};
use crate::telemetry::{DELIVERY_BUFFER_LEN, RECORDS_FLUSHED};
use tokio::time::Instant;

/// Pending records plus their acknowledgements
pub struct DeliveryBuffer<R, A> {
    policy: FlushPolicy,
    options: InsertOptions,
    records: Vec<R>,
    acks: Vec<A>,
    last_flush: Instant,
    state: BufferState,
}

impl<R: FeatureRow, A> DeliveryBuffer<R, A> {
    pub fn new(policy: FlushPolicy, mode: DeliveryMode) -> Self {
        Self {
            policy,
            options: mode.insert_options(),
            records: Vec::with_capacity(policy.max_size),
            acks: Vec::with_capacity(policy.max_size),
            last_flush: Instant::now(),
            state: BufferState::Empty,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Pending records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queue a record and the acknowledgement to release once it is stored
    pub fn push(&mut self, record: R, ack: A) -> Result<(), DeliveryError> {
        if self.state == BufferState::Terminated {
            return Err(DeliveryError::Terminated);
        }
        self.records.push(record);
        self.acks.push(ack);
        self.state = BufferState::Accumulating;
        metrics::gauge!(DELIVERY_BUFFER_LEN).set(self.records.len() as f64);
        Ok(())
    }

    /// Queue an acknowledgement with no record, released with the next flush
    pub fn acknowledge(&mut self, ack: A) -> Result<(), DeliveryError> {
        if self.state == BufferState::Terminated {
            return Err(DeliveryError::Terminated);
        }
        self.acks.push(ack);
        Ok(())
    }

    pub fn size_trigger(&self) -> bool {
        self.records.len() >= self.policy.max_size
    }

    pub fn interval_elapsed(&self) -> bool {
        self.last_flush.elapsed() >= self.policy.max_interval
    }

    /// Write all pending records in one call
    ///
    /// Returns the acknowledgements that are now safe to commit. With no
    /// pending records the store is not called and the flush clock keeps
    /// running. A failed write terminates the buffer.
    pub async fn flush<S>(&mut self, store: &S) -> Result<Vec<A>, DeliveryError>
    where
        S: FeatureStoreClient<R> + ?Sized,
    {
        if self.state == BufferState::Terminated {
            return Err(DeliveryError::Terminated);
        }

        if self.records.is_empty() {
            self.state = BufferState::Empty;
            return Ok(std::mem::take(&mut self.acks));
        }

        self.state = BufferState::Flushing;
        let count = self.records.len();

        if let Err(e) = store.insert(&self.records, self.options).await {
            tracing::error!(
                error = %e,
                records = count,
                materialize = self.options.start_offline_materialization,
                "Bulk write failed"
            );
            self.state = BufferState::Terminated;
            return Err(e.into());
        }

        self.records.clear();
        let acks = std::mem::take(&mut self.acks);
        self.last_flush = Instant::now();
        self.state = BufferState::Empty;

        metrics::counter!(RECORDS_FLUSHED).increment(count as u64);
        metrics::gauge!(DELIVERY_BUFFER_LEN).set(0.0);
        tracing::info!(
            records = count,
            materialize = self.options.start_offline_materialization,
            "Flushed records to feature store"
        );

        Ok(acks)
    }
}
