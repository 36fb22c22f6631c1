//! Integration tests for trade sources against local servers

use futures_util::{SinkExt, StreamExt};
use ohlc_pipeline::feed::{
    HistoricalConfig, HistoricalTradeSource, LiveTradeSource, SourceError, TradeSource,
};
use ohlc_pipeline::ws::{WsConfig, WsError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

const D0: i64 = 1_704_067_200_000;
const DAY_MS: i64 = 86_400_000;

const STATUS_FRAME: &str = r#"{"channel":"status","type":"update","data":[{"api_version":"v2","connection_id":1,"system":"online","version":"2.0.0"}]}"#;
const ACK_FRAME: &str = r#"{"method":"subscribe","result":{"channel":"trade","snapshot":false,"symbol":"BTC/USD"},"success":true}"#;
const TRADE_FRAME: &str = r#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD","side":"buy","price":42000.5,"qty":0.25,"ord_type":"market","trade_id":1,"timestamp":"2024-01-01T00:00:01.123456Z"}]}"#;
const HEARTBEAT_FRAME: &str = r#"{"channel":"heartbeat"}"#;

/// Accept websocket connections; each connection is handed the next frame
/// script after its subscribe request, then closed
async fn ws_server(scripts: Vec<Vec<&'static str>>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let subscriptions = Arc::new(Mutex::new(Vec::new()));
    let seen = subscriptions.clone();

    tokio::spawn(async move {
        let total = scripts.len();
        let mut listener = Some(listener);
        for (i, script) in scripts.into_iter().enumerate() {
            let Some(ref open) = listener else { break };
            let (stream, _) = open.accept().await.unwrap();
            if i + 1 == total {
                // Refuse further connections
                listener = None;
            }
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            if let Some(Ok(Message::Text(request))) = ws.next().await {
                seen.lock().unwrap().push(request.to_string());
            }
            for frame in script {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            let _ = ws.close(None).await;
        }
    });

    (url, subscriptions)
}

fn ws_config(url: &str) -> WsConfig {
    WsConfig::new(url)
        .recv_timeout(Duration::from_millis(500))
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(20))
}

#[tokio::test]
async fn test_live_source_streams_trades() {
    let (url, subscriptions) = ws_server(vec![vec![
        STATUS_FRAME,
        ACK_FRAME,
        TRADE_FRAME,
        HEARTBEAT_FRAME,
    ]])
    .await;

    let mut source = LiveTradeSource::connect("BTC/USD", ws_config(&url))
        .await
        .unwrap();

    let trades = source.get_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].product_id, "BTC/USD");
    assert_eq!(trades[0].price, 42000.5);
    assert_eq!(trades[0].volume, 0.25);
    assert_eq!(trades[0].timestamp_ms, D0 + 1_123);

    assert!(source.get_trades().await.unwrap().is_empty());
    assert!(!source.is_done());

    let request: serde_json::Value =
        serde_json::from_str(&subscriptions.lock().unwrap()[0]).unwrap();
    assert_eq!(request["params"]["symbol"][0], "BTC/USD");

    // Server closed the stream; reconnection is disabled by default
    let err = source.get_trades().await.unwrap_err();
    assert!(matches!(err, SourceError::Transport(_)));
}

#[tokio::test]
async fn test_live_source_reconnects_when_enabled() {
    let (url, subscriptions) = ws_server(vec![
        vec![STATUS_FRAME, ACK_FRAME],
        vec![STATUS_FRAME, ACK_FRAME, TRADE_FRAME],
    ])
    .await;

    let mut source = LiveTradeSource::connect("BTC/USD", ws_config(&url).max_reconnects(2))
        .await
        .unwrap();

    // First connection closes; the source reconnects and resubscribes
    let mut trades = Vec::new();
    for _ in 0..5 {
        trades.extend(source.get_trades().await.unwrap());
        if !trades.is_empty() {
            break;
        }
    }

    assert_eq!(trades.len(), 1);
    assert_eq!(subscriptions.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_live_source_gives_up_after_max_reconnects() {
    let (url, _) = ws_server(vec![vec![STATUS_FRAME, ACK_FRAME]]).await;

    let mut source = LiveTradeSource::connect("BTC/USD", ws_config(&url).max_reconnects(1))
        .await
        .unwrap();

    let mut result = Ok(Vec::new());
    for _ in 0..5 {
        result = source.get_trades().await;
        if result.is_err() {
            break;
        }
    }

    assert!(matches!(
        result,
        Err(SourceError::Transport(WsError::MaxReconnectsExceeded))
    ));
}

/// Serve one canned HTTP response per connection, recording request lines
async fn http_server(bodies: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        for (status, body) in bodies {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let request = String::from_utf8_lossy(&buf);
            seen.lock()
                .unwrap()
                .push(request.lines().next().unwrap_or_default().to_string());

            let reason = if status == 200 { "OK" } else { "Too Many Requests" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        }
    });

    (url, requests)
}

fn page(trades_ms: &[(f64, i64)], last_ms: i64) -> String {
    let rows: Vec<serde_json::Value> = trades_ms
        .iter()
        .enumerate()
        .map(|(i, (price, ts))| {
            serde_json::json!([
                price.to_string(),
                "0.01",
                *ts as f64 / 1000.0,
                "b",
                "m",
                "",
                i
            ])
        })
        .collect();
    serde_json::json!({
        "error": [],
        "result": {
            "XXBTZUSD": rows,
            "last": (last_ms * 1_000_000).to_string(),
        }
    })
    .to_string()
}

fn historical_config(base_url: String) -> HistoricalConfig {
    HistoricalConfig {
        base_url,
        request_interval: Duration::ZERO,
        error_cooldown: Duration::from_millis(10),
        ..HistoricalConfig::default()
    }
}

#[tokio::test]
async fn test_backfill_pages_until_range_end() {
    let to_ms = D0 + DAY_MS;
    let (url, requests) = http_server(vec![
        (200, page(&[(100.0, D0 + 1_000), (101.0, D0 + 2_000)], D0 + 2_000)),
        (
            200,
            serde_json::json!({"error": ["EAPI:Rate limit exceeded"]}).to_string(),
        ),
        (429, String::new()),
        (
            200,
            page(
                &[(102.0, D0 + 50_000_000), (103.0, to_ms), (104.0, to_ms + 500)],
                to_ms + 500,
            ),
        ),
    ])
    .await;

    let mut source =
        HistoricalTradeSource::new("BTC/USD", D0, to_ms, historical_config(url)).unwrap();

    let mut all = Vec::new();
    let mut calls = 0;
    let mut streaks = Vec::new();
    while !source.is_done() {
        all.extend(source.get_trades().await.unwrap());
        streaks.push(source.error_streak());
        calls += 1;
        assert!(calls <= 4, "backfill did not terminate");
    }

    assert_eq!(calls, 4);
    assert_eq!(streaks, vec![0, 1, 2, 0]);
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|t| t.timestamp_ms <= to_ms));
    assert_eq!(all.last().unwrap().price, 103.0);

    let requests = requests.lock().unwrap();
    assert!(requests[0].starts_with("GET /0/public/Trades?"));
    assert!(requests[0].contains(&format!("since={}", D0 * 1_000_000)));
    // Rate-limited pages retry the same cursor
    let next_since = format!("since={}", (D0 + 2_001) * 1_000_000);
    assert!(requests[1].contains(&next_since));
    assert!(requests[2].contains(&next_since));
    assert!(requests[3].contains(&next_since));

    assert!(source.get_trades().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backfill_stalls_on_empty_pages() {
    let empty = page(&[], D0);
    let (url, _) = http_server(vec![(200, empty.clone()), (200, empty.clone()), (200, empty)]).await;

    let config = HistoricalConfig {
        max_stalled_pages: 3,
        ..historical_config(url)
    };
    let mut source = HistoricalTradeSource::new("BTC/USD", D0, D0 + DAY_MS, config).unwrap();

    assert!(source.get_trades().await.unwrap().is_empty());
    assert!(source.get_trades().await.unwrap().is_empty());
    assert!(matches!(
        source.get_trades().await,
        Err(SourceError::Stalled { pages: 3, .. })
    ));
}

#[test]
fn test_backfill_rejects_inverted_range() {
    assert!(matches!(
        HistoricalTradeSource::new("BTC/USD", D0, D0, HistoricalConfig::default()),
        Err(SourceError::InvalidParameters(_))
    ));
}
