//! ohlc-pipeline: trade ingestion, OHLC aggregation and feature store delivery
//!
//! This library provides the core components for:
//! - Live (WebSocket) and historical (REST) trade sources for Kraken
//! - Tumbling-window candle aggregation with continuous emission
//! - Buffered at-least-once delivery to a feature store
//! - A produce/poll/commit bus contract with an in-process adapter
//! - Online and Parquet-backed offline feature stores
//! - Structured logging and Prometheus metrics

pub mod bus;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod feed;
pub mod ohlc;
pub mod store;
pub mod telemetry;
pub mod ws;
