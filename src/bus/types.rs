//! Message bus types

use serde::de::DeserializeOwned;
use thiserror::Error;

/// A record read from a topic partition
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Partitioning key (the product id for both pipeline topics)
    pub key: String,
    /// JSON-encoded value
    pub payload: Vec<u8>,
    /// Record timestamp in epoch milliseconds
    pub timestamp_ms: i64,
}

impl BusMessage {
    /// Handle used to acknowledge this message
    pub fn offset(&self) -> Offset {
        Offset {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }

    /// Decode the JSON payload into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MalformedMessage> {
        serde_json::from_slice(&self.payload).map_err(|e| MalformedMessage {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            reason: e.to_string(),
        })
    }
}

/// Position of a consumed message, committed once it has been processed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Offset {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A record to publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub timestamp_ms: i64,
}

/// Payload that could not be decoded or failed validation
#[derive(Debug, Clone, Error)]
#[error("Malformed message at {topic}[{partition}]@{offset}: {reason}")]
pub struct MalformedMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub reason: String,
}

/// Bus transport errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Value could not be serialized for publishing
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    /// Offset does not belong to the consumer's subscription
    #[error("Cannot commit offset for unsubscribed topic {0}")]
    NotSubscribed(String),
}
