//! In-memory feature store

use super::{FeatureRow, FeatureStoreClient, InsertOptions, RowKey, StoreWriteError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One recorded bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertBatch {
    pub rows: usize,
    pub options: InsertOptions,
}

/// Online table with last-write-wins upserts and an insert log
pub struct MemoryFeatureStore<R> {
    rows: RwLock<HashMap<RowKey, R>>,
    batches: RwLock<Vec<InsertBatch>>,
}

impl<R: FeatureRow> MemoryFeatureStore<R> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            batches: RwLock::new(Vec::new()),
        }
    }

    /// Latest row stored under `key`
    pub async fn online_row(&self, key: &RowKey) -> Option<R> {
        self.rows.read().await.get(key).cloned()
    }

    /// All rows of a product ordered by timestamp
    pub async fn online_rows(&self, product_id: &str) -> Vec<R> {
        let rows = self.rows.read().await;
        let mut matching: Vec<(&RowKey, &R)> = rows
            .iter()
            .filter(|(k, _)| k.product_id == product_id)
            .collect();
        matching.sort_by_key(|(k, _)| k.timestamp_ms);
        matching.into_iter().map(|(_, r)| r.clone()).collect()
    }

    /// Number of distinct keys stored
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether nothing has been stored
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Every bulk insert received, in order
    pub async fn batches(&self) -> Vec<InsertBatch> {
        self.batches.read().await.clone()
    }
}

impl<R: FeatureRow> Default for MemoryFeatureStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: FeatureRow> FeatureStoreClient<R> for MemoryFeatureStore<R> {
    async fn insert(&self, records: &[R], options: InsertOptions) -> Result<(), StoreWriteError> {
        {
            let mut rows = self.rows.write().await;
            for record in records {
                rows.insert(record.primary_key(), record.clone());
            }
        }

        self.batches.write().await.push(InsertBatch {
            rows: records.len(),
            options,
        });

        tracing::debug!(count = records.len(), ?options, "Inserted rows into memory store");
        Ok(())
    }
}
