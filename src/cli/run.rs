//! Run command implementation

use crate::bus::MemoryBus;
use crate::config::Config;
use crate::delivery::{DeliveryMode, DeliveryService};
use crate::feed::{HistoricalTradeSource, IngestionService, LiveTradeSource, TradeSource};
use crate::ohlc::{AggregationService, Candle};
use crate::store::{FeatureStoreClient, ParquetFeatureStore};
use clap::Args;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stream live trades or backfill history
    #[arg(short, long)]
    pub mode: Option<DeliveryMode>,

    /// Days of history to backfill
    #[arg(short, long)]
    pub days: Option<u32>,

    /// Product to subscribe to, e.g. BTC/USD
    #[arg(short, long)]
    pub product: Option<String>,
}

/// What a pipeline run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub trades_published: u64,
    /// The source ran out and every stage caught up before stopping
    pub drained: bool,
}

impl RunArgs {
    /// Overlay command-line flags on the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(days) = self.days {
            config.source.last_n_days = days;
        }
        if let Some(ref product) = self.product {
            config.source.product_id = product.clone();
        }
    }

    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        self.apply(&mut config);
        config.validate()?;

        tracing::info!(
            mode = %config.mode,
            product_id = %config.source.product_id,
            window_seconds = config.aggregator.window_seconds,
            "Starting pipeline"
        );

        let source: Box<dyn TradeSource> = match config.mode {
            DeliveryMode::Live => Box::new(
                LiveTradeSource::connect(&config.source.product_id, config.source.ws_config())
                    .await?,
            ),
            DeliveryMode::Historical => Box::new(HistoricalTradeSource::last_n_days(
                &config.source.product_id,
                config.source.last_n_days,
                config.source.historical_config(),
            )?),
        };

        let store = Arc::new(
            ParquetFeatureStore::new(&config.store.output_dir, config.store.feature_group())
                .with_rotation(config.store.offline_rotation()),
        );

        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                signal_cancel.cancel();
            }
        });

        let bus = MemoryBus::new(config.bus.partitions);
        let result = run_pipeline(&config, &bus, source, store.clone(), cancel).await;

        if let Some(path) = store.materialize().await? {
            tracing::info!(path = ?path, "Wrote remaining offline rows");
        }

        let summary = result?;
        tracing::info!(
            trades = summary.trades_published,
            drained = summary.drained,
            "Pipeline stopped"
        );
        Ok(())
    }
}

/// Run ingestion, aggregation and delivery over `bus` until the source is
/// drained, `cancel` fires, or any stage fails
///
/// Aggregator state is first rebuilt from the candle topic. A failing stage
/// stops the other two. An exhausted source first waits until both consumer
/// groups have committed everything on their topics.
pub async fn run_pipeline<S>(
    config: &Config,
    bus: &MemoryBus,
    source: Box<dyn TradeSource>,
    store: Arc<S>,
    cancel: CancellationToken,
) -> anyhow::Result<PipelineSummary>
where
    S: FeatureStoreClient<Candle> + 'static,
{
    let stop = cancel.child_token();
    let bus_config = &config.bus;

    let mut aggregation = AggregationService::new(
        bus.consumer(&bus_config.aggregator_group, &bus_config.trade_topic)
            .await,
        bus.producer(),
        &bus_config.ohlc_topic,
        config.aggregator.window(),
        bus_config.poll_timeout(),
    );
    let mut changelog = bus
        .consumer(&bus_config.changelog_group(), &bus_config.ohlc_topic)
        .await;
    aggregation.restore(&mut changelog).await?;

    let delivery: DeliveryService<_, S, Candle> = DeliveryService::new(
        bus.consumer(&bus_config.delivery_group, &bus_config.ohlc_topic)
            .await,
        store,
        config.delivery.flush_policy()?,
        config.mode,
        bus_config.poll_timeout(),
    );
    let ingestion = IngestionService::new(source, bus.producer(), &bus_config.trade_topic);

    let aggregation_stop = stop.clone();
    let aggregation_task = tokio::spawn(async move {
        let result = aggregation.run(aggregation_stop.clone()).await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "Aggregation service failed");
            aggregation_stop.cancel();
        }
        result
    });

    let delivery_stop = stop.clone();
    let delivery_task = tokio::spawn(async move {
        let result = delivery.run(delivery_stop.clone()).await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "Delivery service failed");
            delivery_stop.cancel();
        }
        result
    });

    let ingestion_result = ingestion.run(stop.clone()).await;

    let mut drained = false;
    if ingestion_result.is_ok() && !stop.is_cancelled() {
        tracing::info!("Source exhausted, draining pipeline");
        loop {
            let trade_lag = bus
                .lag(&bus_config.aggregator_group, &bus_config.trade_topic)
                .await;
            let ohlc_lag = bus
                .lag(&bus_config.delivery_group, &bus_config.ohlc_topic)
                .await;
            if trade_lag == 0 && ohlc_lag == 0 {
                drained = true;
                break;
            }
            tracing::debug!(trade_lag, ohlc_lag, "Waiting for pipeline to drain");

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(bus_config.poll_timeout()) => {}
            }
        }
    }

    stop.cancel();
    let aggregation_result = aggregation_task.await?;
    let delivery_result = delivery_task.await?;

    let trades_published = ingestion_result?;
    aggregation_result?;
    delivery_result?;

    Ok(PipelineSummary {
        trades_published,
        drained,
    })
}
