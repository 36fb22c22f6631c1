//! Message bus contract
//!
//! The pipeline only needs three things from its transport: publish a keyed
//! record, poll the next record with a bounded wait, and commit processed
//! offsets. Any partitioned at-least-once log can sit behind these traits;
//! [`MemoryBus`] is the in-process adapter used by the `run` command and tests.

mod memory;
mod types;

pub use memory::{MemoryBus, MemoryConsumer, MemoryProducer};
pub use types::{BusError, BusMessage, MalformedMessage, Offset, OutboundRecord};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Publishing half of the bus
#[async_trait]
pub trait Producer: Send + Sync {
    /// Append a record to its topic, partitioned by key
    async fn produce(&self, record: OutboundRecord) -> Result<(), BusError>;
}

/// Consuming half of the bus, bound to one topic and consumer group
#[async_trait]
pub trait Consumer: Send {
    /// Next record, or `None` if nothing arrived within `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError>;

    /// Mark offsets as processed; replay after restart resumes past them
    async fn commit(&mut self, offsets: &[Offset]) -> Result<(), BusError>;
}

/// Serialize `value` as JSON and publish it
pub async fn produce_json<P, T>(
    producer: &P,
    topic: &str,
    key: &str,
    value: &T,
    timestamp_ms: i64,
) -> Result<(), BusError>
where
    P: Producer + ?Sized,
    T: Serialize + Sync,
{
    let payload = serde_json::to_vec(value)?;
    producer
        .produce(OutboundRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            timestamp_ms,
        })
        .await
}
