//! Configuration types for trade-capture

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Trade feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Stream URL override (defaults to the Binance aggTrade stream)
    #[serde(default)]
    pub url: Option<String>,

    /// Silence longer than this is treated as a disconnect
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Interval between keepalive pings
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// First reconnect delay ceiling (milliseconds)
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Maximum reconnect delay ceiling (seconds)
    #[serde(default = "default_reconnect_cap_secs")]
    pub reconnect_cap_secs: u64,

    /// Connection attempts allowed before the first successful connect
    #[serde(default = "default_initial_connect_attempts")]
    pub initial_connect_attempts: u32,
}

fn default_exchange() -> String {
    "binance".to_string()
}
fn default_symbol() -> String {
    "btcusdt".to_string()
}
fn default_read_timeout_secs() -> u64 {
    30
}
fn default_ping_interval_secs() -> u64 {
    20
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_cap_secs() -> u64 {
    30
}
fn default_initial_connect_attempts() -> u32 {
    5
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            symbol: default_symbol(),
            url: None,
            read_timeout_secs: default_read_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_secs: default_reconnect_cap_secs(),
            initial_connect_attempts: default_initial_connect_attempts(),
        }
    }
}

impl FeedConfig {
    /// Identity stamped on every record, e.g. "binance:BTCUSDT"
    pub fn source_id(&self) -> String {
        format!(
            "{}:{}",
            self.exchange.to_lowercase(),
            self.symbol.to_uppercase()
        )
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_cap_secs)
    }
}

/// Which record is discarded when the buffer stays full
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered record and admit the new one
    #[default]
    DropOldest,
    /// Reject the incoming record
    DropNewest,
}

/// Ingest buffer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// How long a full buffer blocks the producer before overflowing
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_max_items() -> usize {
    100_000
}
fn default_max_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_enqueue_timeout_ms() -> u64 {
    1000
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_bytes: default_max_bytes(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

impl BufferConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

/// Batch flush policy
#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on how long a partial batch waits
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_batch_size() -> usize {
    10_000
}
fn default_max_wait_secs() -> u64 {
    5
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl FlushConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Remote sink backend
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadBackend {
    #[default]
    S3,
    Local,
}

/// Remote upload configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub backend: UploadBackend,

    /// S3 bucket; uploads are disabled when unset for the s3 backend
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub region: Option<String>,

    /// Target directory for the local backend
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,

    #[serde(default = "default_retry_cap_secs")]
    pub retry_cap_secs: u64,

    /// Concurrent puts
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_prefix() -> String {
    "msa-poc".to_string()
}
fn default_retry_base_secs() -> u64 {
    2
}
fn default_retry_cap_secs() -> u64 {
    120
}
fn default_max_in_flight() -> usize {
    4
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            backend: UploadBackend::S3,
            bucket: None,
            prefix: default_prefix(),
            region: None,
            local_dir: None,
            retry_base_secs: default_retry_base_secs(),
            retry_cap_secs: default_retry_cap_secs(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl UploadConfig {
    /// Whether a remote sink is configured at all
    pub fn enabled(&self) -> bool {
        match self.backend {
            UploadBackend::S3 => self.bucket.is_some(),
            UploadBackend::Local => self.local_dir.is_some(),
        }
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub fn retry_cap(&self) -> Duration {
        Duration::from_secs(self.retry_cap_secs)
    }
}

/// Shutdown protocol configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_grace_period_secs() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
