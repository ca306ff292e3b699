//! trade-capture: durable, resumable market trade capture
//!
//! This library provides the core components for:
//! - Real-time trade feeds from Binance over WebSocket
//! - A bounded, deduplicating ingest buffer with backpressure
//! - Batched Parquet segments committed under a write-ahead ledger
//! - Crash recovery of interrupted writes
//! - At-least-once upload of segments to S3 or a local mirror
//! - Structured logging and Prometheus metrics

pub mod buffer;
pub mod cli;
pub mod config;
pub mod data;
pub mod feed;
pub mod flush;
pub mod ledger;
pub mod pipeline;
pub mod retry;
pub mod telemetry;
pub mod upload;
pub mod ws;
