//! Feature store sinks
//!
//! The store is an external collaborator reached through
//! [`FeatureStoreClient`]; rows are upserted by primary key so replays after a
//! restart overwrite rather than duplicate.

mod memory;
mod parquet_store;
mod types;

pub use memory::{InsertBatch, MemoryFeatureStore};
pub use parquet_store::{candle_schema, read_candles, OfflineRotation, ParquetFeatureStore};
pub use types::{FeatureGroup, FeatureRow, InsertOptions, RowKey, StoreWriteError};

use async_trait::async_trait;

/// Bulk sink for feature rows
#[async_trait]
pub trait FeatureStoreClient<R: FeatureRow>: Send + Sync {
    /// Write all `records` in one call; any error means none may be assumed stored
    async fn insert(&self, records: &[R], options: InsertOptions) -> Result<(), StoreWriteError>;
}
