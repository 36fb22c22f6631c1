//! Feature store types

use thiserror::Error;

/// Logical primary key of a feature row: `(product_id, timestamp)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub product_id: String,
    pub timestamp_ms: i64,
}

/// A record the store can upsert by primary key
pub trait FeatureRow: Clone + Send + Sync + 'static {
    fn primary_key(&self) -> RowKey;
}

/// Options for a bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Push rows to offline (batch) storage as part of this write
    pub start_offline_materialization: bool,
}

/// Feature group description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    pub name: String,
    pub version: u32,
    pub primary_key: Vec<String>,
    pub event_time: String,
}

impl FeatureGroup {
    /// OHLC feature group keyed by `(product_id, timestamp)`
    pub fn ohlc(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            primary_key: vec!["product_id".to_string(), "timestamp".to_string()],
            event_time: "timestamp".to_string(),
        }
    }

    /// Identifier used for storage artifacts, e.g. `ohlc_feature_group_v1`
    pub fn qualified_name(&self) -> String {
        format!("{}_v{}", self.name, self.version)
    }
}

/// Bulk write failure; callers must assume nothing from the batch was stored
#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("Schema mismatch: {0}")]
    Schema(String),
    #[error("Write rejected: {0}")]
    Rejected(String),
    #[error("Write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
