//! Duplex WebSocket connection with bounded receives

use super::types::{WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single open WebSocket connection
///
/// Control frames are handled internally: pings are answered, pongs are
/// ignored, and a close frame surfaces as [`WsError::Closed`].
pub struct WsClient {
    url: String,
    stream: Stream,
}

impl WsClient {
    /// Open a connection to `url`
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        tracing::info!(url = %url, "Connecting to WebSocket");

        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %url, "WebSocket connected");

        Ok(Self {
            url: url.to_string(),
            stream,
        })
    }

    /// Send a text frame
    pub async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    /// Wait for the next data frame
    ///
    /// Returns `Ok(None)` when nothing arrived within `wait`.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<WsMessage>, WsError> {
        let deadline = Instant::now() + wait;

        loop {
            let next = match timeout_at(deadline, self.stream.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(Some(WsMessage::Text(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(WsMessage::Binary(data))),
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| WsError::SendFailed(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(url = %self.url, "Received close frame");
                    return Err(WsError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(WsError::ConnectionFailed(e.to_string())),
                None => {
                    return Err(WsError::ConnectionFailed(
                        "Stream ended unexpectedly".into(),
                    ))
                }
            }
        }
    }
}
