//! Binance aggregate trade message parsing

use super::{ParseError, Record, RecordParser, TradePayload};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// Binance WebSocket base URL
const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Build the aggTrade stream URL for a symbol
pub fn aggtrade_stream_url(symbol: &str) -> String {
    format!("{}/{}@aggTrade", BINANCE_WS_URL, symbol.to_lowercase())
}

/// Binance aggTrade message structure
#[derive(Debug, Deserialize)]
struct AggTradeMessage {
    /// Event type
    #[serde(rename = "e")]
    event_type: String,
    /// Event time (milliseconds)
    #[serde(rename = "E")]
    event_time: i64,
    /// Aggregate trade ID
    #[serde(rename = "a")]
    agg_trade_id: u64,
    /// Price
    #[serde(rename = "p")]
    price: String,
    /// Quantity
    #[serde(rename = "q")]
    quantity: String,
    /// Is the buyer the market maker?
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

/// Parser for the `<symbol>@aggTrade` stream
#[derive(Debug, Default, Clone)]
pub struct BinanceAggTradeParser;

impl BinanceAggTradeParser {
    pub fn new() -> Self {
        Self
    }
}

impl RecordParser for BinanceAggTradeParser {
    fn parse(&self, source_id: &str, raw: &str) -> Result<Record, ParseError> {
        let msg: AggTradeMessage =
            serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

        if msg.event_type != "aggTrade" {
            return Err(ParseError::UnexpectedEvent(msg.event_type));
        }

        let price = Decimal::from_str(&msg.price).map_err(|_| ParseError::InvalidField {
            field: "p",
            value: msg.price.clone(),
        })?;
        let quantity = Decimal::from_str(&msg.quantity).map_err(|_| ParseError::InvalidField {
            field: "q",
            value: msg.quantity.clone(),
        })?;
        let event_time = Utc
            .timestamp_millis_opt(msg.event_time)
            .single()
            .ok_or_else(|| ParseError::InvalidField {
                field: "E",
                value: msg.event_time.to_string(),
            })?;

        Ok(Record {
            source_id: source_id.to_string(),
            event_time,
            sequence_id: msg.agg_trade_id,
            payload: TradePayload {
                price,
                quantity,
                is_buyer_maker: msg.is_buyer_maker,
            },
        })
    }
}
