//! Ingest buffer implementation

use super::{Admission, BufferError};
use crate::config::{BufferConfig, OverflowPolicy};
use crate::feed::{Record, RecordSink};
use crate::telemetry::{increment, set_gauge, CounterMetric, GaugeMetric};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Record>,
    bytes: usize,
    watermarks: HashMap<String, u64>,
    closed: bool,
    /// Item count a waiting drain is blocked on
    drain_target: Option<usize>,
}

impl BufferState {
    fn is_duplicate(&self, record: &Record) -> bool {
        self.watermarks
            .get(&record.source_id)
            .is_some_and(|watermark| record.sequence_id <= *watermark)
    }

    fn has_room(&self, size: usize, config: &BufferConfig) -> bool {
        self.queue.len() < config.max_items && self.bytes + size <= config.max_bytes
    }

    fn push(&mut self, record: Record, size: usize) {
        match self.watermarks.get_mut(&record.source_id) {
            Some(watermark) => *watermark = record.sequence_id,
            None => {
                self.watermarks
                    .insert(record.source_id.clone(), record.sequence_id);
            }
        }
        self.bytes += size;
        self.queue.push_back(record);
    }

    fn pop(&mut self) -> Option<Record> {
        let record = self.queue.pop_front()?;
        self.bytes = self.bytes.saturating_sub(record.estimated_size());
        Some(record)
    }

    fn drain_ready(&self) -> bool {
        self.drain_target
            .is_some_and(|target| self.queue.len() >= target)
    }

    fn publish_gauges(&self) {
        set_gauge(GaugeMetric::BufferItems, self.queue.len() as f64);
        set_gauge(GaugeMetric::BufferBytes, self.bytes as f64);
    }
}

enum Attempt {
    Done(Result<Admission, BufferError>),
    Full(Record),
}

/// Capacity- and time-bounded staging area between reader and flusher
#[derive(Debug)]
pub struct IngestBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
    items_ready: Notify,
    space_freed: Notify,
}

impl IngestBuffer {
    /// Create a new buffer
    pub fn new(mut config: BufferConfig) -> Self {
        config.max_items = config.max_items.max(1);
        Self {
            config,
            state: Mutex::new(BufferState::default()),
            items_ready: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a record, blocking up to the configured timeout while full
    pub async fn enqueue(&self, record: Record) -> Result<Admission, BufferError> {
        let deadline = Instant::now() + self.config.enqueue_timeout();
        let mut record = record;

        loop {
            record = match self.try_admit(record) {
                Attempt::Done(result) => return result,
                Attempt::Full(record) => record,
            };

            let now = Instant::now();
            if now >= deadline {
                return self.overflow(record);
            }
            let _ = tokio::time::timeout(deadline - now, self.space_freed.notified()).await;
        }
    }

    /// Enqueue without waiting; a full buffer overflows immediately
    pub fn try_enqueue(&self, record: Record) -> Result<Admission, BufferError> {
        match self.try_admit(record) {
            Attempt::Done(result) => result,
            Attempt::Full(record) => self.overflow(record),
        }
    }

    fn try_admit(&self, record: Record) -> Attempt {
        let mut state = self.lock();

        if state.closed {
            return Attempt::Done(Err(BufferError::Closed));
        }
        if state.is_duplicate(&record) {
            increment(CounterMetric::RecordsDuplicate, 1);
            return Attempt::Done(Ok(Admission::Duplicate));
        }

        let size = record.estimated_size();
        if size > self.config.max_bytes {
            increment(CounterMetric::RecordsRejected, 1);
            tracing::warn!(size, max_bytes = self.config.max_bytes, "Record exceeds buffer byte cap");
            return Attempt::Done(Err(BufferError::Overflow {
                policy: OverflowPolicy::DropNewest,
                evicted: 0,
            }));
        }
        if !state.has_room(size, &self.config) {
            return Attempt::Full(record);
        }

        state.push(record, size);
        if state.drain_ready() {
            self.items_ready.notify_one();
        }
        state.publish_gauges();
        Attempt::Done(Ok(Admission::Accepted))
    }

    fn overflow(&self, record: Record) -> Result<Admission, BufferError> {
        let mut state = self.lock();

        if state.closed {
            return Err(BufferError::Closed);
        }
        if state.is_duplicate(&record) {
            increment(CounterMetric::RecordsDuplicate, 1);
            return Ok(Admission::Duplicate);
        }

        let size = record.estimated_size();
        if state.has_room(size, &self.config) {
            state.push(record, size);
            state.publish_gauges();
            return Ok(Admission::Accepted);
        }

        match self.config.overflow_policy {
            OverflowPolicy::DropNewest => {
                increment(CounterMetric::RecordsRejected, 1);
                Err(BufferError::Overflow {
                    policy: OverflowPolicy::DropNewest,
                    evicted: 0,
                })
            }
            OverflowPolicy::DropOldest => {
                let mut evicted = 0;
                while !state.has_room(size, &self.config) && state.pop().is_some() {
                    evicted += 1;
                }
                state.push(record, size);
                if state.drain_ready() {
                    self.items_ready.notify_one();
                }
                state.publish_gauges();
                increment(CounterMetric::RecordsEvicted, evicted as u64);
                Err(BufferError::Overflow {
                    policy: OverflowPolicy::DropOldest,
                    evicted,
                })
            }
        }
    }

    /// Take up to `max_items` records in enqueue order.
    ///
    /// Returns once `max_items` are available, the buffer is closed, or
    /// `max_wait` elapses; the result may be empty.
    pub async fn drain(&self, max_items: usize, max_wait: Duration) -> Vec<Record> {
        let max_items = max_items.max(1);
        let deadline = Instant::now() + max_wait;

        loop {
            let now = Instant::now();
            {
                let mut state = self.lock();
                if state.queue.len() >= max_items || state.closed || now >= deadline {
                    state.drain_target = None;
                    let count = state.queue.len().min(max_items);
                    let mut records = Vec::with_capacity(count);
                    for _ in 0..count {
                        if let Some(record) = state.pop() {
                            records.push(record);
                        }
                    }
                    state.publish_gauges();
                    drop(state);

                    if !records.is_empty() {
                        self.space_freed.notify_waiters();
                        self.space_freed.notify_one();
                    }
                    return records;
                }
                state.drain_target = Some(max_items);
            }

            let _ = tokio::time::timeout(deadline - now, self.items_ready.notified()).await;
        }
    }

    /// Stop admitting records and wake any waiters
    pub fn close(&self) {
        self.lock().closed = true;
        self.items_ready.notify_one();
        self.space_freed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Estimated bytes currently buffered
    pub fn byte_size(&self) -> usize {
        self.lock().bytes
    }

    /// Highest sequence admitted for a source
    pub fn watermark(&self, source_id: &str) -> Option<u64> {
        self.lock().watermarks.get(source_id).copied()
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }
}

#[async_trait]
impl RecordSink for IngestBuffer {
    async fn accept(&self, record: Record) -> Result<Admission, BufferError> {
        self.enqueue(record).await
    }
}
