//! Configuration types for ohlc-pipeline

use crate::delivery::{DeliveryError, DeliveryMode, FlushPolicy};
use crate::feed::{HistoricalConfig, KRAKEN_REST_URL, KRAKEN_WS_URL};
use crate::store::{FeatureGroup, OfflineRotation};
use crate::telemetry::LogFormat;
use crate::ws::WsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {var}: '{value}'")]
    Env { var: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Live streaming or historical backfill
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Trade source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_product_id")]
    pub product_id: String,

    /// Backfill range for historical mode, ending now
    #[serde(default = "default_last_n_days")]
    pub last_n_days: u32,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// Reconnect attempts after a dropped stream (0 = fail fast)
    #[serde(default)]
    pub max_reconnects: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Bounded wait for a live frame before returning an empty batch
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Minimum delay between historical requests
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,

    /// Sleep after a server-side error payload (rate limit)
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Consecutive pages without cursor progress before failing (0 = never)
    #[serde(default = "default_max_stalled_pages")]
    pub max_stalled_pages: u32,
}

fn default_product_id() -> String {
    "BTC/USD".to_string()
}
fn default_last_n_days() -> u32 {
    7
}
fn default_ws_url() -> String {
    KRAKEN_WS_URL.to_string()
}
fn default_rest_url() -> String {
    KRAKEN_REST_URL.to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_max_reconnect_delay_ms() -> u64 {
    60_000
}
fn default_recv_timeout_ms() -> u64 {
    5_000
}
fn default_request_interval_ms() -> u64 {
    1_000
}
fn default_error_cooldown_secs() -> u64 {
    30
}
fn default_http_timeout_secs() -> u64 {
    10
}
fn default_max_stalled_pages() -> u32 {
    5
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            product_id: default_product_id(),
            last_n_days: default_last_n_days(),
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            max_reconnects: 0,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
            request_interval_ms: default_request_interval_ms(),
            error_cooldown_secs: default_error_cooldown_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            max_stalled_pages: default_max_stalled_pages(),
        }
    }
}

impl SourceConfig {
    pub fn ws_config(&self) -> WsConfig {
        WsConfig::new(&self.ws_url)
            .max_reconnects(self.max_reconnects)
            .initial_delay(Duration::from_millis(self.reconnect_delay_ms))
            .max_delay(Duration::from_millis(self.max_reconnect_delay_ms))
            .recv_timeout(Duration::from_millis(self.recv_timeout_ms))
    }

    pub fn historical_config(&self) -> HistoricalConfig {
        HistoricalConfig {
            base_url: self.rest_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            request_interval: Duration::from_millis(self.request_interval_ms),
            error_cooldown: Duration::from_secs(self.error_cooldown_secs),
            max_stalled_pages: self.max_stalled_pages,
            ..HistoricalConfig::default()
        }
    }
}

/// Message bus topics and consumer groups
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_trade_topic")]
    pub trade_topic: String,
    #[serde(default = "default_ohlc_topic")]
    pub ohlc_topic: String,
    #[serde(default = "default_aggregator_group")]
    pub aggregator_group: String,
    #[serde(default = "default_delivery_group")]
    pub delivery_group: String,
    /// Bounded wait for each consumer poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_partitions() -> u32 {
    1
}
fn default_trade_topic() -> String {
    "trade".to_string()
}
fn default_ohlc_topic() -> String {
    "ohlc".to_string()
}
fn default_aggregator_group() -> String {
    "trade_to_ohlc".to_string()
}
fn default_delivery_group() -> String {
    "kafka_to_feature_store".to_string()
}
fn default_poll_timeout_ms() -> u64 {
    1_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            trade_topic: default_trade_topic(),
            ohlc_topic: default_ohlc_topic(),
            aggregator_group: default_aggregator_group(),
            delivery_group: default_delivery_group(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Group that replays the candle topic into aggregator state; it never commits
    pub fn changelog_group(&self) -> String {
        format!("{}_changelog", self.aggregator_group)
    }
}

/// Candle aggregation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_window_seconds() -> u64 {
    60
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
        }
    }
}

impl AggregatorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Delivery buffer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Flush once this many records are buffered
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Flush after this long without a flush once input goes idle
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_buffer_size() -> usize {
    1
}
fn default_max_interval_ms() -> u64 {
    10_000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn flush_policy(&self) -> Result<FlushPolicy, DeliveryError> {
        FlushPolicy::new(self.buffer_size, Duration::from_millis(self.max_interval_ms))
    }
}

/// Feature store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_feature_group_name")]
    pub feature_group_name: String,
    #[serde(default = "default_feature_group_version")]
    pub feature_group_version: u32,
    /// Directory for offline Parquet files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Minimum seconds between offline files in historical mode
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
    /// Pending offline rows that force a file in any mode
    #[serde(default = "default_max_pending_rows")]
    pub max_pending_rows: usize,
}

fn default_feature_group_name() -> String {
    "ohlc_feature_group".to_string()
}
fn default_feature_group_version() -> u32 {
    1
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_rotation_interval_secs() -> u64 {
    3600
}
fn default_max_pending_rows() -> usize {
    100_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            feature_group_name: default_feature_group_name(),
            feature_group_version: default_feature_group_version(),
            output_dir: default_output_dir(),
            rotation_interval_secs: default_rotation_interval_secs(),
            max_pending_rows: default_max_pending_rows(),
        }
    }
}

impl StoreConfig {
    pub fn feature_group(&self) -> FeatureGroup {
        FeatureGroup::ohlc(&self.feature_group_name, self.feature_group_version)
    }

    pub fn offline_rotation(&self) -> OfflineRotation {
        OfflineRotation {
            interval: Duration::from_secs(self.rotation_interval_secs),
            max_pending_rows: self.max_pending_rows,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port (0 = disabled)
    #[serde(default)]
    pub metrics_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: 0,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from process environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`
    ///
    /// Recognized: `PRODUCT_ID`, `LIVE_OR_HISTORICAL`, `LAST_N_DAYS`,
    /// `OHLC_WINDOWS_SECONDS`, `DELIVERY_BUFFER_SIZE`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            })
        }

        if let Some(value) = lookup("PRODUCT_ID") {
            self.source.product_id = value;
        }
        if let Some(value) = lookup("LIVE_OR_HISTORICAL") {
            self.mode = parse("LIVE_OR_HISTORICAL", value)?;
        }
        if let Some(value) = lookup("LAST_N_DAYS") {
            self.source.last_n_days = parse("LAST_N_DAYS", value)?;
        }
        if let Some(value) = lookup("OHLC_WINDOWS_SECONDS") {
            self.aggregator.window_seconds = parse("OHLC_WINDOWS_SECONDS", value)?;
        }
        if let Some(value) = lookup("DELIVERY_BUFFER_SIZE") {
            self.delivery.buffer_size = parse("DELIVERY_BUFFER_SIZE", value)?;
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.product_id.trim().is_empty() {
            return Err(ConfigError::Invalid("source.product_id is empty".into()));
        }
        if self.source.last_n_days == 0 {
            return Err(ConfigError::Invalid(
                "source.last_n_days must be at least 1".into(),
            ));
        }
        if self.aggregator.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.window_seconds must be at least 1".into(),
            ));
        }
        if self.bus.partitions == 0 {
            return Err(ConfigError::Invalid(
                "bus.partitions must be at least 1".into(),
            ));
        }
        if self.bus.trade_topic == self.bus.ohlc_topic {
            return Err(ConfigError::Invalid(
                "bus.trade_topic and bus.ohlc_topic must differ".into(),
            ));
        }
        if self.store.max_pending_rows == 0 {
            return Err(ConfigError::Invalid(
                "store.max_pending_rows must be at least 1".into(),
            ));
        }
        self.delivery
            .flush_policy()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            mode = "historical"

            [source]
            product_id = "ETH/USD"
            last_n_days = 30
            max_reconnects = 3

            [bus]
            partitions = 4

            [aggregator]
            window_seconds = 10

            [delivery]
            buffer_size = 500
            max_interval_ms = 2000

            [store]
            feature_group_name = "ohlc_10s"
            feature_group_version = 2
            output_dir = "/tmp/ohlc"
            rotation_interval_secs = 600

            [telemetry]
            metrics_port = 9090
            log_level = "debug"
            log_format = "json"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.mode, DeliveryMode::Historical);
        assert_eq!(config.source.product_id, "ETH/USD");
        assert_eq!(config.source.last_n_days, 30);
        assert_eq!(config.source.ws_config().max_reconnect_attempts, 3);
        assert_eq!(config.bus.partitions, 4);
        assert_eq!(config.aggregator.window(), Duration::from_secs(10));
        assert_eq!(config.delivery.buffer_size, 500);
        assert_eq!(
            config.store.feature_group().qualified_name(),
            "ohlc_10s_v2"
        );
        assert_eq!(
            config.store.offline_rotation(),
            OfflineRotation {
                interval: Duration::from_secs(600),
                max_pending_rows: 100_000,
            }
        );
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.mode, DeliveryMode::Live);
        assert_eq!(config.source.product_id, "BTC/USD");
        assert_eq!(config.source.last_n_days, 7);
        assert_eq!(config.source.max_reconnects, 0);
        assert_eq!(config.bus.trade_topic, "trade");
        assert_eq!(config.bus.ohlc_topic, "ohlc");
        assert_eq!(config.delivery.buffer_size, 1);
        assert_eq!(config.store.feature_group_name, "ohlc_feature_group");
        assert_eq!(config.telemetry.metrics_port, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_toml(include_str!("../config.toml.example")).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PRODUCT_ID", "ETH/EUR"),
            ("LIVE_OR_HISTORICAL", "historical"),
            ("LAST_N_DAYS", "3"),
            ("OHLC_WINDOWS_SECONDS", "5"),
            ("DELIVERY_BUFFER_SIZE", "250"),
        ]);

        let mut config = Config::default();
        config
            .apply_overrides(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.source.product_id, "ETH/EUR");
        assert_eq!(config.mode, DeliveryMode::Historical);
        assert_eq!(config.source.last_n_days, 3);
        assert_eq!(config.aggregator.window_seconds, 5);
        assert_eq!(config.delivery.buffer_size, 250);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_overrides(|var| {
            (var == "OHLC_WINDOWS_SECONDS").then(|| "sixty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Env { ref var, .. }) if var == "OHLC_WINDOWS_SECONDS"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.delivery.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregator.window_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bus.ohlc_topic = "trade".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.product_id = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.max_pending_rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_historical_config_mapping() {
        let source = SourceConfig {
            request_interval_ms: 250,
            max_stalled_pages: 0,
            ..SourceConfig::default()
        };
        let historical = source.historical_config();
        assert_eq!(historical.request_interval, Duration::from_millis(250));
        assert_eq!(historical.max_stalled_pages, 0);
        assert_eq!(historical.base_url, KRAKEN_REST_URL);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
