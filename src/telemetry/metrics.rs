//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const TRADES_INGESTED: &str = "ohlc_trades_ingested_total";
pub const CANDLES_EMITTED: &str = "ohlc_candles_emitted_total";
pub const RECORDS_FLUSHED: &str = "ohlc_records_flushed_total";
pub const MALFORMED_MESSAGES: &str = "ohlc_malformed_messages_total";
pub const DELIVERY_BUFFER_LEN: &str = "ohlc_delivery_buffer_len";

/// Install the Prometheus recorder with an HTTP scrape endpoint on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;

    describe_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(addr)
}

fn describe_metrics() {
    metrics::describe_counter!(TRADES_INGESTED, "Trades published to the trade topic");
    metrics::describe_counter!(CANDLES_EMITTED, "Candle snapshots published to the ohlc topic");
    metrics::describe_counter!(RECORDS_FLUSHED, "Records written to the feature store");
    metrics::describe_counter!(
        MALFORMED_MESSAGES,
        "Messages skipped because they could not be decoded, by stage"
    );
    metrics::describe_gauge!(DELIVERY_BUFFER_LEN, "Records pending in the delivery buffer");
}
