//! End-to-end pipeline tests over the in-process bus

use async_trait::async_trait;
use ohlc_pipeline::bus::MemoryBus;
use ohlc_pipeline::cli::run_pipeline;
use ohlc_pipeline::config::Config;
use ohlc_pipeline::delivery::DeliveryMode;
use ohlc_pipeline::feed::{SourceError, Trade, TradeSource};
use ohlc_pipeline::ohlc::Candle;
use ohlc_pipeline::store::{
    read_candles, FeatureGroup, FeatureStoreClient, InsertOptions, MemoryFeatureStore,
    ParquetFeatureStore, RowKey, StoreWriteError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const T0: i64 = 1_704_067_200_000;

/// Hands out fixed batches, then reports done
struct ScriptedSource {
    batches: VecDeque<Vec<Trade>>,
}

impl ScriptedSource {
    fn new(batches: Vec<Vec<Trade>>) -> Box<Self> {
        Box::new(Self {
            batches: batches.into(),
        })
    }
}

#[async_trait]
impl TradeSource for ScriptedSource {
    async fn get_trades(&mut self) -> Result<Vec<Trade>, SourceError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    fn is_done(&self) -> bool {
        self.batches.is_empty()
    }
}

struct RejectingStore;

#[async_trait]
impl FeatureStoreClient<Candle> for RejectingStore {
    async fn insert(
        &self,
        _records: &[Candle],
        _options: InsertOptions,
    ) -> Result<(), StoreWriteError> {
        Err(StoreWriteError::Rejected("feature store offline".into()))
    }
}

fn test_config(buffer_size: usize) -> Config {
    let mut config = Config {
        mode: DeliveryMode::Historical,
        ..Config::default()
    };
    config.aggregator.window_seconds = 60;
    config.delivery.buffer_size = buffer_size;
    config.delivery.max_interval_ms = 50;
    config.bus.poll_timeout_ms = 10;
    config
}

fn trades(prices: &[f64]) -> Vec<Trade> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| Trade::new("BTC/USD", p, 0.1, T0 + 1_000 * i as i64).unwrap())
        .collect()
}

fn window_key() -> RowKey {
    RowKey {
        product_id: "BTC/USD".to_string(),
        timestamp_ms: T0 + 60_000,
    }
}

#[tokio::test]
async fn test_single_window_candle_reaches_store() {
    let config = test_config(2);
    let bus = MemoryBus::new(config.bus.partitions);
    let store = Arc::new(MemoryFeatureStore::<Candle>::new());

    let summary = run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![trades(&[100.0, 105.0, 98.0, 102.0])]),
        store.clone(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.trades_published, 4);
    assert!(summary.drained);

    let candle = store.online_row(&window_key()).await.unwrap();
    assert_eq!(candle.open, 100.0);
    assert_eq!(candle.high, 105.0);
    assert_eq!(candle.low, 98.0);
    assert_eq!(candle.close, 102.0);

    let batches = store.batches().await;
    assert_eq!(batches.iter().map(|b| b.rows).sum::<usize>(), 4);
    assert!(batches
        .iter()
        .all(|b| b.options.start_offline_materialization));
}

#[tokio::test]
async fn test_multiple_windows_and_products() {
    let config = test_config(3);
    let bus = MemoryBus::new(4);
    let store = Arc::new(MemoryFeatureStore::<Candle>::new());

    let batch = vec![
        Trade::new("BTC/USD", 100.0, 1.0, T0).unwrap(),
        Trade::new("ETH/USD", 10.0, 1.0, T0 + 5).unwrap(),
        Trade::new("BTC/USD", 110.0, 1.0, T0 + 61_000).unwrap(),
        Trade::new("ETH/USD", 9.0, 1.0, T0 + 10).unwrap(),
    ];

    run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![batch]),
        store.clone(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let btc = store.online_rows("BTC/USD").await;
    assert_eq!(btc.len(), 2);
    assert_eq!(btc[0].close, 100.0);
    assert_eq!(btc[1].window_end_ms, T0 + 120_000);

    let eth = store.online_rows("ETH/USD").await;
    assert_eq!(eth.len(), 1);
    assert_eq!((eth[0].open, eth[0].low, eth[0].close), (10.0, 9.0, 9.0));
}

#[tokio::test]
async fn test_restart_replays_unacknowledged_candles() {
    let bus = MemoryBus::new(1);

    // Delivery flushes only once all four snapshots are buffered, then fails.
    let config = test_config(4);
    let result = run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![trades(&[100.0, 105.0, 98.0, 102.0])]),
        Arc::new(RejectingStore),
        CancellationToken::new(),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(bus.lag(&config.bus.delivery_group, "ohlc").await, 4);

    let store = Arc::new(MemoryFeatureStore::<Candle>::new());
    let summary = run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![]),
        store.clone(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(summary.drained);
    assert_eq!(summary.trades_published, 0);
    let candle = store.online_row(&window_key()).await.unwrap();
    assert_eq!(
        (candle.open, candle.high, candle.low, candle.close),
        (100.0, 105.0, 98.0, 102.0)
    );
}

#[tokio::test]
async fn test_restart_continues_open_window() {
    let config = test_config(1);
    let bus = MemoryBus::new(1);
    let store = Arc::new(MemoryFeatureStore::<Candle>::new());

    run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![trades(&[100.0, 105.0, 98.0])]),
        store.clone(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let late = Trade::new("BTC/USD", 102.0, 0.1, T0 + 30_000).unwrap();
    run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![vec![late]]),
        store.clone(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let candle = store.online_row(&window_key()).await.unwrap();
    assert_eq!(
        (candle.open, candle.high, candle.low, candle.close),
        (100.0, 105.0, 98.0, 102.0)
    );
}

#[tokio::test]
async fn test_historical_run_writes_offline_files() {
    let dir = TempDir::new().unwrap();
    let config = test_config(2);
    let bus = MemoryBus::new(1);
    let store = Arc::new(ParquetFeatureStore::new(
        dir.path(),
        FeatureGroup::ohlc("ohlc_feature_group", 1),
    ));

    run_pipeline(
        &config,
        &bus,
        ScriptedSource::new(vec![
            trades(&[100.0, 105.0]),
            trades(&[98.0, 102.0])
                .into_iter()
                .map(|mut t| {
                    t.timestamp_ms += 2_000;
                    t
                })
                .collect(),
        ]),
        store.clone(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // Snapshots of one window collapse into a single offline row
    assert_eq!(store.files_written(), 0);
    assert_eq!(store.pending_offline().await, 1);
    assert!(store.materialize().await.unwrap().is_some());
    assert_eq!(store.files_written(), 1);
    assert_eq!(store.pending_offline().await, 0);

    let mut latest: Option<Candle> = None;
    let mut paths: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    paths.sort();
    for path in paths {
        for candle in read_candles(&path).unwrap() {
            assert_eq!(candle.window_end_ms, T0 + 60_000);
            latest = Some(candle);
        }
    }
    let latest = latest.unwrap();
    assert_eq!(latest.close, 102.0);
    assert_eq!(latest.low, 98.0);
    assert_eq!(store.online_row(&window_key()).await, Some(latest));
}

#[tokio::test]
async fn test_cancel_stops_live_pipeline() {
    struct Silent;

    #[async_trait]
    impl TradeSource for Silent {
        async fn get_trades(&mut self) -> Result<Vec<Trade>, SourceError> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(Vec::new())
        }

        fn is_done(&self) -> bool {
            false
        }
    }

    let mut config = test_config(10);
    config.mode = DeliveryMode::Live;
    let bus = MemoryBus::new(1);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = run_pipeline(
        &config,
        &bus,
        Box::new(Silent),
        Arc::new(MemoryFeatureStore::<Candle>::new()),
        cancel,
    )
    .await
    .unwrap();

    assert!(!summary.drained);
    assert_eq!(summary.trades_published, 0);
}
