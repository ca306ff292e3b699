//! Feed record types and errors

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single observed trade event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Producer identity (e.g., "binance:BTCUSDT")
    pub source_id: String,
    /// Exchange event time, millisecond precision
    pub event_time: DateTime<Utc>,
    /// Producer-assigned sequence (aggregate trade id for Binance)
    pub sequence_id: u64,
    /// Trade fields
    pub payload: TradePayload,
}

/// Typed trade fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePayload {
    pub price: Decimal,
    pub quantity: Decimal,
    /// True when the buyer was the resting (maker) side
    pub is_buyer_maker: bool,
}

impl Record {
    /// Calendar date (UTC) used to partition segments
    pub fn partition_key(&self) -> NaiveDate {
        self.event_time.date_naive()
    }

    /// Approximate in-memory footprint, used for the buffer byte cap
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.source_id.len()
    }
}

/// Failure to turn a raw message into a record
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Unexpected event type: {0}")]
    UnexpectedEvent(String),
    #[error("Invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Message source errors
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Transient network failure; the reader reconnects
    #[error("Connection failed: {0}")]
    Connection(String),
    /// No message within the read timeout
    #[error("Read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),
    /// Never managed to connect during startup
    #[error("Could not connect to message source after {attempts} attempts: {last_error}")]
    InitialConnectFailed { attempts: u32, last_error: String },
}
