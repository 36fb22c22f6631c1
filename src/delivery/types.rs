//! Delivery types

use crate::bus::BusError;
use crate::store::{InsertOptions, StoreWriteError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// When a buffer must be flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush once this many records are pending
    pub max_size: usize,
    /// Flush when this much time passed since the last flush and input is idle
    pub max_interval: Duration,
}

impl FlushPolicy {
    pub fn new(max_size: usize, max_interval: Duration) -> Result<Self, DeliveryError> {
        if max_size == 0 {
            return Err(DeliveryError::InvalidPolicy(
                "max_size must be at least 1".into(),
            ));
        }
        if max_interval.is_zero() {
            return Err(DeliveryError::InvalidPolicy(
                "max_interval must be positive".into(),
            ));
        }
        Ok(Self {
            max_size,
            max_interval,
        })
    }
}

/// Whether the pipeline follows the live stream or backfills history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Live,
    Historical,
}

impl DeliveryMode {
    /// Store options for a bulk write in this mode
    pub fn insert_options(self) -> InsertOptions {
        InsertOptions {
            start_offline_materialization: self == DeliveryMode::Historical,
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Live => write!(f, "live"),
            DeliveryMode::Historical => write!(f, "historical"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(DeliveryMode::Live),
            "historical" => Ok(DeliveryMode::Historical),
            other => Err(DeliveryError::InvalidMode(other.to_string())),
        }
    }
}

/// Buffer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Accumulating,
    Flushing,
    /// A bulk write failed; the buffer accepts nothing further
    Terminated,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid flush policy: {0}")]
    InvalidPolicy(String),
    #[error("Invalid mode '{0}', expected 'live' or 'historical'")]
    InvalidMode(String),
    #[error("Store write failed: {0}")]
    Store(#[from] StoreWriteError),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Delivery buffer terminated after a failed write")]
    Terminated,
}
