//! Kraken WebSocket v2 live trade source

use super::{SourceError, Trade, TradeSource};
use crate::telemetry::MALFORMED_MESSAGES;
use crate::ws::{WsClient, WsConfig, WsError, WsMessage};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio::time::sleep;

/// Kraken WebSocket v2 URL
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Frames sent by the server right after a subscribe request that carry no
/// trades (connection status and subscription acknowledgement)
const HANDSHAKE_FRAMES: usize = 2;

/// Kraken v2 channel message
#[derive(Debug, Deserialize)]
struct KrakenFrame {
    /// Channel name; absent on method responses
    channel: Option<String>,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Kraken v2 trade entry
#[derive(Debug, Deserialize)]
struct KrakenTrade {
    price: f64,
    qty: f64,
    /// RFC3339 with microseconds (e.g., "2023-09-25T07:49:37.708706Z")
    timestamp: String,
}

/// Classified inbound frame
#[derive(Debug, PartialEq)]
enum Frame {
    Heartbeat,
    Trades(Vec<Trade>),
    /// Status or method response, nothing to emit
    Control,
}

/// Streams trades for one product over a persistent connection
pub struct LiveTradeSource {
    product_id: String,
    config: WsConfig,
    client: WsClient,
}

impl LiveTradeSource {
    /// Connect, subscribe to the trade channel and consume the handshake
    pub async fn connect(
        product_id: impl Into<String>,
        config: WsConfig,
    ) -> Result<Self, SourceError> {
        let product_id = product_id.into();
        let client = Self::open(&product_id, &config).await?;

        Ok(Self {
            product_id,
            config,
            client,
        })
    }

    /// Product this source is subscribed to
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    fn subscribe_request(product_id: &str) -> String {
        serde_json::json!({
            "method": "subscribe",
            "params": {
                "channel": "trade",
                "symbol": [product_id],
                "snapshot": false,
            },
        })
        .to_string()
    }

    async fn open(product_id: &str, config: &WsConfig) -> Result<WsClient, WsError> {
        let mut client = WsClient::connect(&config.url).await?;

        tracing::info!(product_id, "Subscribing to Kraken trade channel");
        client.send_text(Self::subscribe_request(product_id)).await?;

        for n in 0..HANDSHAKE_FRAMES {
            match client.recv(config.recv_timeout).await? {
                Some(frame) => tracing::debug!(frame = ?frame, n, "Discarded handshake frame"),
                None => {
                    return Err(WsError::ConnectionFailed(format!(
                        "Timed out waiting for handshake frame {}",
                        n + 1
                    )))
                }
            }
        }

        tracing::info!(product_id, "Subscription established");
        Ok(client)
    }

    /// Replace the connection after a transport error, per the backoff policy
    async fn reconnect(&mut self, cause: WsError) -> Result<(), SourceError> {
        if !self.config.reconnect_enabled() {
            tracing::error!(error = %cause, "Live feed transport error");
            return Err(SourceError::Transport(cause));
        }

        let mut backoff = self.config.backoff();
        loop {
            let Some(delay) = backoff.next_delay() else {
                tracing::error!(attempts = backoff.attempts(), "Max reconnection attempts reached");
                return Err(SourceError::Transport(WsError::MaxReconnectsExceeded));
            };

            tracing::warn!(
                error = %cause,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Live feed reconnecting..."
            );
            sleep(delay).await;

            match Self::open(&self.product_id, &self.config).await {
                Ok(client) => {
                    self.client = client;
                    return Ok(());
                }
                Err(e) => tracing::warn!(error = %e, "Reconnect attempt failed"),
            }
        }
    }

    fn parse_frame(product_id: &str, text: &str) -> Result<Frame, serde_json::Error> {
        let frame: KrakenFrame = serde_json::from_str(text)?;

        match frame.channel.as_deref() {
            Some("heartbeat") => Ok(Frame::Heartbeat),
            Some("trade") => {
                let trades = frame
                    .data
                    .into_iter()
                    .filter_map(|entry| match serde_json::from_value::<KrakenTrade>(entry) {
                        Ok(raw) => Self::convert_trade(product_id, raw),
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed trade entry");
                            None
                        }
                    })
                    .collect();
                Ok(Frame::Trades(trades))
            }
            _ => Ok(Frame::Control),
        }
    }

    fn convert_trade(product_id: &str, raw: KrakenTrade) -> Option<Trade> {
        let timestamp_ms = match DateTime::parse_from_rfc3339(&raw.timestamp) {
            Ok(ts) => ts.timestamp_millis(),
            Err(e) => {
                tracing::warn!(timestamp = %raw.timestamp, error = %e, "Skipping trade with bad timestamp");
                return None;
            }
        };

        match Trade::new(product_id, raw.price, raw.qty, timestamp_ms) {
            Ok(trade) => Some(trade),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping invalid trade");
                None
            }
        }
    }
}

#[async_trait]
impl TradeSource for LiveTradeSource {
    async fn get_trades(&mut self) -> Result<Vec<Trade>, SourceError> {
        let message = match self.client.recv(self.config.recv_timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => {
                self.reconnect(e).await?;
                return Ok(Vec::new());
            }
        };

        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Binary(data) => {
                tracing::warn!(len = data.len(), "Ignoring binary frame");
                return Ok(Vec::new());
            }
        };

        match Self::parse_frame(&self.product_id, &text) {
            Ok(Frame::Trades(trades)) => Ok(trades),
            Ok(Frame::Heartbeat) | Ok(Frame::Control) => Ok(Vec::new()),
            Err(e) => {
                metrics::counter!(MALFORMED_MESSAGES, "stage" => "live").increment(1);
                tracing::warn!(error = %e, frame = %text, "Skipping malformed frame");
                Ok(Vec::new())
            }
        }
    }

    fn is_done(&self) -> bool {
        false
    }
}
