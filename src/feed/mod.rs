//! Trade feed module
//!
//! Turns a live message source into a stream of `Record`s

mod binance;
mod reader;
mod types;

pub use binance::{aggtrade_stream_url, BinanceAggTradeParser};
pub use reader::{FeedReader, FeedStats};
pub use types::{FeedError, ParseError, Record, TradePayload};

use crate::buffer::{Admission, BufferError};
use async_trait::async_trait;

/// Connects to an upstream endpoint producing raw messages
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Open a new stream
    async fn connect(&self) -> Result<Box<dyn MessageStream>, FeedError>;
}

/// An open connection to a message source
#[async_trait]
pub trait MessageStream: Send {
    /// Next raw message, `Ok(None)` on end-of-stream
    async fn read_next(&mut self) -> Result<Option<String>, FeedError>;
}

/// Parses raw messages into records
pub trait RecordParser: Send + Sync {
    fn parse(&self, source_id: &str, raw: &str) -> Result<Record, ParseError>;
}

/// Destination for parsed records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn accept(&self, record: Record) -> Result<Admission, BufferError>;
}
