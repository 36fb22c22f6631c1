//! Trade feed types

use crate::ws::WsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single executed trade from the exchange
///
/// Serialized as the `trade` topic wire record:
/// `{product_id, price, volume, timestamp_ms}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange product identifier (e.g., "BTC/USD")
    pub product_id: String,
    /// Execution price, strictly positive
    pub price: f64,
    /// Traded volume, non-negative
    pub volume: f64,
    /// Exchange execution time in epoch milliseconds
    pub timestamp_ms: i64,
}

impl Trade {
    /// Build a validated trade
    pub fn new(
        product_id: impl Into<String>,
        price: f64,
        volume: f64,
        timestamp_ms: i64,
    ) -> Result<Self, ValidationError> {
        let trade = Self {
            product_id: product_id.into(),
            price,
            volume,
            timestamp_ms,
        };
        trade.validate()?;
        Ok(trade)
    }

    /// Check field-level invariants
    ///
    /// Deserialized trades bypass `Trade::new`, so consumers call this at the
    /// bus boundary as well.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.product_id.is_empty() {
            return Err(ValidationError::EmptyProductId);
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::InvalidPrice(self.price));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(ValidationError::InvalidVolume(self.volume));
        }
        Ok(())
    }
}

/// Field validation failures at the ingress boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Empty product id")]
    EmptyProductId,
    #[error("Invalid price: {0}")]
    InvalidPrice(f64),
    #[error("Invalid volume: {0}")]
    InvalidVolume(f64),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Trade source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Live connection failure, fatal for the source instance
    #[error("Transport error: {0}")]
    Transport(#[from] WsError),
    /// HTTP request failure against the REST API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server answered with an error payload
    #[error("Rate limited by exchange: {0}")]
    RateLimited(String),
    /// REST response body could not be interpreted
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    /// Consecutive pages did not move the cursor
    #[error("Backfill stalled at cursor {cursor_ms} after {pages} pages")]
    Stalled { cursor_ms: i64, pages: u32 },
    /// Invalid construction parameters
    #[error("Invalid source parameters: {0}")]
    InvalidParameters(String),
}
