//! Kraken REST historical trade source
//!
//! Pages through `GET /0/public/Trades` with a monotonically advancing
//! cursor until the server reports a page ending at or beyond `to_ms`.

use super::{SourceError, Trade, TradeSource};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Kraken REST API base URL
pub const KRAKEN_REST_URL: &str = "https://api.kraken.com";

const MS_PER_DAY: i64 = 86_400_000;
const NANOS_PER_MS: i64 = 1_000_000;

/// Configuration for the REST backfill client
#[derive(Debug, Clone)]
pub struct HistoricalConfig {
    /// Base URL for the REST API
    pub base_url: String,
    /// HTTP request timeout
    pub timeout: Duration,
    /// Minimum delay between two page requests
    pub request_interval: Duration,
    /// Sleep after the server reports an error payload
    pub error_cooldown: Duration,
    /// Consecutive non-advancing pages tolerated before failing (0 = never fail)
    pub max_stalled_pages: u32,
    /// Trades requested per page
    pub page_size: u32,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            base_url: KRAKEN_REST_URL.to_string(),
            timeout: Duration::from_secs(10),
            request_interval: Duration::from_secs(1),
            error_cooldown: Duration::from_secs(30),
            max_stalled_pages: 5,
            page_size: 1000,
        }
    }
}

/// Raw response envelope
#[derive(Debug, Deserialize)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: Option<serde_json::Map<String, serde_json::Value>>,
}

/// One successfully fetched page
#[derive(Debug, Clone, PartialEq)]
struct TradesPage {
    /// Trades in server order
    trades: Vec<Trade>,
    /// Server-reported `last` timestamp for the page, in milliseconds
    last_ms: i64,
}

/// Interpreted response body
#[derive(Debug, PartialEq)]
enum PageResponse {
    Page(TradesPage),
    /// Server-side error payload (rate limit and friends)
    Error(Vec<String>),
}

/// Bounded backfill over `[from_ms, to_ms)` for one product
pub struct HistoricalTradeSource {
    product_id: String,
    from_ms: i64,
    to_ms: i64,
    cursor_ms: i64,
    done: bool,
    stalled_pages: u32,
    error_streak: u32,
    last_request: Option<Instant>,
    config: HistoricalConfig,
    client: Client,
}

impl HistoricalTradeSource {
    /// Create a source covering `[from_ms, to_ms)`
    pub fn new(
        product_id: impl Into<String>,
        from_ms: i64,
        to_ms: i64,
        config: HistoricalConfig,
    ) -> Result<Self, SourceError> {
        if from_ms >= to_ms {
            return Err(SourceError::InvalidParameters(format!(
                "from_ms ({}) must be before to_ms ({})",
                from_ms, to_ms
            )));
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            product_id: product_id.into(),
            from_ms,
            to_ms,
            cursor_ms: from_ms,
            done: false,
            stalled_pages: 0,
            error_streak: 0,
            last_request: None,
            config,
            client,
        })
    }

    /// Create a source covering the last `days` days up to now
    pub fn last_n_days(
        product_id: impl Into<String>,
        days: u32,
        config: HistoricalConfig,
    ) -> Result<Self, SourceError> {
        let to_ms = chrono::Utc::now().timestamp_millis();
        let from_ms = to_ms - i64::from(days) * MS_PER_DAY;
        Self::new(product_id, from_ms, to_ms, config)
    }

    /// Current pagination cursor in milliseconds
    pub fn cursor_ms(&self) -> i64 {
        self.cursor_ms
    }

    /// Requested range
    pub fn range(&self) -> (i64, i64) {
        (self.from_ms, self.to_ms)
    }

    /// Error payloads received since the last good page
    pub fn error_streak(&self) -> u32 {
        self.error_streak
    }

    /// Count an error payload, logging the first of a streak at error level
    ///
    /// Permanent failures such as an unknown pair share this path with rate
    /// limits and retry forever.
    fn note_error(&mut self, errors: &[String]) -> SourceError {
        let err = SourceError::RateLimited(errors.join(", "));
        self.error_streak += 1;
        if self.error_streak == 1 {
            tracing::error!(
                error = %err,
                product_id = %self.product_id,
                cooldown_secs = self.config.error_cooldown.as_secs(),
                cursor_ms = self.cursor_ms,
                "Exchange returned an error, retrying after cooldown"
            );
        } else {
            tracing::warn!(
                error = %err,
                streak = self.error_streak,
                cursor_ms = self.cursor_ms,
                "Exchange still returning errors"
            );
        }
        err
    }

    /// Wait out the minimum inter-request delay
    async fn throttle(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.config.request_interval {
                sleep(self.config.request_interval - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    async fn fetch_page(&self) -> Result<PageResponse, SourceError> {
        let url = format!("{}/0/public/Trades", self.config.base_url);
        let since_ns = self.cursor_ms.saturating_mul(NANOS_PER_MS).to_string();
        let count = self.config.page_size.to_string();

        tracing::debug!(
            product_id = %self.product_id,
            cursor_ms = self.cursor_ms,
            "Fetching trades page"
        );

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[
                ("pair", self.product_id.as_str()),
                ("since", since_ns.as_str()),
                ("count", count.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(PageResponse::Error(vec![status.to_string()]));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::UnexpectedResponse(format!(
                "HTTP {} - {}",
                status, body
            )));
        }

        let body = response.text().await?;
        Self::parse_page(&self.product_id, &body)
    }

    fn parse_page(product_id: &str, body: &str) -> Result<PageResponse, SourceError> {
        let response: KrakenResponse = serde_json::from_str(body)
            .map_err(|e| SourceError::UnexpectedResponse(e.to_string()))?;

        if !response.error.is_empty() {
            return Ok(PageResponse::Error(response.error));
        }

        let result = response
            .result
            .ok_or_else(|| SourceError::UnexpectedResponse("Missing result".into()))?;

        let last_ms = result
            .get("last")
            .and_then(parse_nanos)
            .map(|ns| ns / NANOS_PER_MS)
            .ok_or_else(|| SourceError::UnexpectedResponse("Missing last".into()))?;

        // The trades list is keyed by the pair's canonical name, the only
        // other key besides `last`.
        let rows = result
            .iter()
            .find(|(key, _)| key.as_str() != "last")
            .and_then(|(_, value)| value.as_array())
            .cloned()
            .unwrap_or_default();

        let trades = rows
            .iter()
            .filter_map(|row| match parse_row(product_id, row) {
                Some(trade) => Some(trade),
                None => {
                    tracing::warn!(row = %row, "Skipping malformed trade row");
                    None
                }
            })
            .collect();

        Ok(PageResponse::Page(TradesPage { trades, last_ms }))
    }

    /// Advance the cursor from a page and return the in-range trades
    fn apply_page(&mut self, page: TradesPage) -> Result<Vec<Trade>, SourceError> {
        let previous = self.cursor_ms;

        if self.error_streak > 0 {
            tracing::info!(errors = self.error_streak, "Exchange recovered");
            self.error_streak = 0;
        }

        if let Some(last_trade) = page.trades.last() {
            let last_ts = last_trade.timestamp_ms;
            self.cursor_ms = if last_ts > self.cursor_ms {
                last_ts + 1
            } else {
                // Ties with the cursor stay put; never move backwards.
                self.cursor_ms.max(last_ts)
            };
        }

        if page.last_ms >= self.to_ms {
            self.done = true;
        }

        if self.done || self.cursor_ms > previous {
            self.stalled_pages = 0;
        } else {
            self.stalled_pages += 1;
            tracing::warn!(
                cursor_ms = self.cursor_ms,
                stalled_pages = self.stalled_pages,
                "Backfill page did not advance the cursor"
            );
            if self.config.max_stalled_pages > 0
                && self.stalled_pages >= self.config.max_stalled_pages
            {
                return Err(SourceError::Stalled {
                    cursor_ms: self.cursor_ms,
                    pages: self.stalled_pages,
                });
            }
        }

        let to_ms = self.to_ms;
        Ok(page
            .trades
            .into_iter()
            .filter(|t| t.timestamp_ms <= to_ms)
            .collect())
    }
}

/// `last` arrives as a string of nanoseconds, occasionally as a number
fn parse_nanos(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Row layout: `[price, volume, time_seconds, side, type, misc, trade_id]`
fn parse_row(product_id: &str, row: &serde_json::Value) -> Option<Trade> {
    let fields = row.as_array()?;
    let price: f64 = fields.first()?.as_str()?.parse().ok()?;
    let volume: f64 = fields.get(1)?.as_str()?.parse().ok()?;
    let seconds = fields.get(2)?.as_f64()?;
    // Round at microsecond precision first so float noise cannot push a
    // timestamp into the previous millisecond.
    let micros = (seconds * 1_000_000.0).round() as i64;
    Trade::new(product_id, price, volume, micros / 1000).ok()
}

#[async_trait]
impl TradeSource for HistoricalTradeSource {
    async fn get_trades(&mut self) -> Result<Vec<Trade>, SourceError> {
        if self.done {
            return Ok(Vec::new());
        }

        self.throttle().await;

        match self.fetch_page().await? {
            PageResponse::Page(page) => {
                let trades = self.apply_page(page)?;
                tracing::info!(
                    product_id = %self.product_id,
                    count = trades.len(),
                    cursor_ms = self.cursor_ms,
                    done = self.done,
                    "Fetched historical trades"
                );
                Ok(trades)
            }
            PageResponse::Error(errors) => {
                self.note_error(&errors);
                sleep(self.config.error_cooldown).await;
                Ok(Vec::new())
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
