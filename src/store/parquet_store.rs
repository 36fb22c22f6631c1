//! Parquet-backed OHLC feature store
//!
//! Every insert upserts into the online table. Rows also queue for offline
//! storage, one pending row per primary key, and are written out as a Snappy
//! Parquet file when the rotation interval has passed on a materializing
//! insert, when the queue reaches its row limit, or on an explicit
//! [`ParquetFeatureStore::materialize`].

use super::{FeatureGroup, FeatureRow, FeatureStoreClient, InsertOptions, RowKey, StoreWriteError};
use crate::ohlc::Candle;
use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// OHLC row schema
pub fn candle_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("product_id", DataType::Utf8, false),
        Field::new("open", DataType::Float64, false),
        Field::new("high", DataType::Float64, false),
        Field::new("low", DataType::Float64, false),
        Field::new("close", DataType::Float64, false),
    ])
}

/// When queued offline rows are written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineRotation {
    /// Minimum time between files written by materializing inserts
    pub interval: Duration,
    /// Distinct pending rows that force a file regardless of mode
    pub max_pending_rows: usize,
}

impl Default for OfflineRotation {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_pending_rows: 100_000,
        }
    }
}

#[derive(Debug)]
struct OfflineQueue {
    rows: HashMap<RowKey, Candle>,
    last_write: Instant,
}

/// Feature store with an in-memory online table and Parquet offline files
pub struct ParquetFeatureStore {
    group: FeatureGroup,
    output_dir: PathBuf,
    rotation: OfflineRotation,
    online: RwLock<HashMap<RowKey, Candle>>,
    offline: Mutex<OfflineQueue>,
    files_written: AtomicU64,
}

impl ParquetFeatureStore {
    /// Create a store writing offline files under `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>, group: FeatureGroup) -> Self {
        Self {
            group,
            output_dir: output_dir.into(),
            rotation: OfflineRotation::default(),
            online: RwLock::new(HashMap::new()),
            offline: Mutex::new(OfflineQueue {
                rows: HashMap::new(),
                last_write: Instant::now(),
            }),
            files_written: AtomicU64::new(0),
        }
    }

    pub fn with_rotation(mut self, rotation: OfflineRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Feature group served by this store
    pub fn group(&self) -> &FeatureGroup {
        &self.group
    }

    /// Output directory for offline files
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Generate the offline file path for a materialization
    pub fn file_path(&self, timestamp: DateTime<Utc>, sequence: u64) -> PathBuf {
        let filename = format!(
            "{}_{}_{:04}.parquet",
            self.group.qualified_name(),
            timestamp.format("%Y%m%d_%H%M%S"),
            sequence
        );
        self.output_dir.join(filename)
    }

    /// Latest online row for `key`
    pub async fn online_row(&self, key: &RowKey) -> Option<Candle> {
        self.online.read().await.get(key).cloned()
    }

    /// Online rows of a product ordered by timestamp
    pub async fn online_rows(&self, product_id: &str) -> Vec<Candle> {
        let online = self.online.read().await;
        let mut rows: Vec<Candle> = online
            .values()
            .filter(|c| c.product_id == product_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.window_end_ms);
        rows
    }

    /// Distinct rows waiting for offline materialization
    pub async fn pending_offline(&self) -> usize {
        self.offline.lock().await.rows.len()
    }

    /// Offline files written so far
    pub fn files_written(&self) -> u64 {
        self.files_written.load(Ordering::Relaxed)
    }

    /// Write queued rows to a new Parquet file
    ///
    /// Returns the file path, or `None` when nothing was queued. The queue is
    /// kept if the write fails.
    pub async fn materialize(&self) -> Result<Option<PathBuf>, StoreWriteError> {
        let mut queue = self.offline.lock().await;
        if queue.rows.is_empty() {
            return Ok(None);
        }

        let mut rows: Vec<(RowKey, Candle)> = queue
            .rows
            .iter()
            .map(|(key, candle)| (key.clone(), candle.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        let rows: Vec<Candle> = rows.into_iter().map(|(_, c)| c).collect();
        let count = rows.len();

        let sequence = self.files_written.load(Ordering::Relaxed);
        let path = self.file_path(Utc::now(), sequence);

        let output_dir = self.output_dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_candles(&output_dir, &target, &rows)).await??;

        self.files_written.fetch_add(1, Ordering::Relaxed);
        queue.rows.clear();
        queue.last_write = Instant::now();

        tracing::info!(
            path = ?path,
            rows = count,
            feature_group = %self.group.qualified_name(),
            "Materialized offline rows"
        );

        Ok(Some(path))
    }
}

fn write_candles(
    output_dir: &Path,
    path: &Path,
    candles: &[Candle],
) -> Result<(), StoreWriteError> {
    fs::create_dir_all(output_dir)?;

    let schema = Arc::new(candle_schema());
    let file = File::create(path)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let timestamps: Vec<i64> = candles.iter().map(|c| c.window_end_ms).collect();
    let products: Vec<&str> = candles.iter().map(|c| c.product_id.as_str()).collect();
    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(TimestampMillisecondArray::from(timestamps).with_timezone("UTC")) as ArrayRef,
            Arc::new(StringArray::from(products)) as ArrayRef,
            Arc::new(Float64Array::from(opens)) as ArrayRef,
            Arc::new(Float64Array::from(highs)) as ArrayRef,
            Arc::new(Float64Array::from(lows)) as ArrayRef,
            Arc::new(Float64Array::from(closes)) as ArrayRef,
        ],
    )?;

    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

#[async_trait]
impl FeatureStoreClient<Candle> for ParquetFeatureStore {
    async fn insert(
        &self,
        records: &[Candle],
        options: InsertOptions,
    ) -> Result<(), StoreWriteError> {
        if records.is_empty() {
            return Ok(());
        }

        {
            let mut online = self.online.write().await;
            for candle in records {
                online.insert(candle.primary_key(), candle.clone());
            }
        }
        let due = {
            let mut queue = self.offline.lock().await;
            for candle in records {
                queue.rows.insert(candle.primary_key(), candle.clone());
            }
            queue.rows.len() >= self.rotation.max_pending_rows
                || (options.start_offline_materialization
                    && queue.last_write.elapsed() >= self.rotation.interval)
        };

        if due {
            self.materialize().await?;
        }

        Ok(())
    }
}

/// Read all candles from an offline file
pub fn read_candles(path: impl AsRef<Path>) -> Result<Vec<Candle>, StoreWriteError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut candles = Vec::new();

    for batch_result in reader {
        let batch = batch_result?;

        let timestamps = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .ok_or_else(|| StoreWriteError::Schema("Invalid timestamp column".into()))?;
        let products = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| StoreWriteError::Schema("Invalid product_id column".into()))?;
        let float_column = |i: usize, name: &str| {
            batch
                .column(i)
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| StoreWriteError::Schema(format!("Invalid {} column", name)))
        };
        let opens = float_column(2, "open")?;
        let highs = float_column(3, "high")?;
        let lows = float_column(4, "low")?;
        let closes = float_column(5, "close")?;

        for i in 0..batch.num_rows() {
            candles.push(Candle {
                window_end_ms: timestamps.value(i),
                open: opens.value(i),
                high: highs.value(i),
                low: lows.value(i),
                close: closes.value(i),
                product_id: products.value(i).to_string(),
            });
        }
    }

    Ok(candles)
}
