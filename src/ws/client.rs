//! WebSocket connection and frame pump

use super::types::WsConfig;
use crate::feed::{FeedError, MessageSource, MessageStream};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections to a fixed URL
#[derive(Debug, Clone)]
pub struct WsSource {
    config: WsConfig,
}

impl WsSource {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Create a source with just a URL using default config
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WsConfig::new(url))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl MessageSource for WsSource {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, FeedError> {
        tracing::info!(url = %self.config.url, "Connecting to WebSocket");

        let (socket, _response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(&self.config.url))
                .await
                .map_err(|_| FeedError::Connection("connect timed out".into()))?
                .map_err(|e| FeedError::Connection(e.to_string()))?;

        tracing::info!("WebSocket connected");

        let start = Instant::now() + self.config.ping_interval;
        let mut ping = interval_at(start, self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Ok(Box::new(WsStream {
            socket,
            ping,
            pong_timeout: self.config.pong_timeout,
            awaiting_pong: None,
        }))
    }
}

/// One open WebSocket connection
pub struct WsStream {
    socket: Socket,
    ping: Interval,
    pong_timeout: std::time::Duration,
    awaiting_pong: Option<Instant>,
}

enum Event {
    Frame(Option<Result<Message, tungstenite::Error>>),
    PingDue,
}

impl WsStream {
    async fn send(&mut self, message: Message) -> Result<(), FeedError> {
        self.socket
            .send(message)
            .await
            .map_err(|e| FeedError::Connection(format!("send failed: {}", e)))
    }
}

#[async_trait]
impl MessageStream for WsStream {
    async fn read_next(&mut self) -> Result<Option<String>, FeedError> {
        loop {
            let event = tokio::select! {
                frame = self.socket.next() => Event::Frame(frame),
                _ = self.ping.tick() => Event::PingDue,
            };

            match event {
                Event::Frame(Some(Ok(Message::Text(text)))) => return Ok(Some(text)),
                Event::Frame(Some(Ok(Message::Binary(data)))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => tracing::debug!("Ignoring non UTF-8 binary frame"),
                },
                Event::Frame(Some(Ok(Message::Ping(data)))) => {
                    self.send(Message::Pong(data)).await?;
                }
                Event::Frame(Some(Ok(Message::Pong(_)))) => {
                    self.awaiting_pong = None;
                }
                Event::Frame(Some(Ok(Message::Close(frame)))) => {
                    tracing::info!(frame = ?frame, "Received close frame");
                    return Ok(None);
                }
                Event::Frame(Some(Ok(_))) => {}
                Event::Frame(Some(Err(e))) => return Err(FeedError::Connection(e.to_string())),
                Event::Frame(None) => return Ok(None),
                Event::PingDue => {
                    if let Some(sent) = self.awaiting_pong {
                        if sent.elapsed() >= self.pong_timeout {
                            return Err(FeedError::Connection("Pong timeout".into()));
                        }
                        continue;
                    }
                    self.send(Message::Ping(Vec::new())).await?;
                    self.awaiting_pong = Some(Instant::now());
                }
            }
        }
    }
}
