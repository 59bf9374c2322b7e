//! Durable min-priority event queue with dead-lettering.
//!
//! Every published event is appended to a newline-delimited JSON log before
//! `publish` returns. On startup the log is replayed to rebuild the heap, so
//! the log is the source of truth across restarts. Consuming an event does
//! not rewrite the log.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::domain::Event;

/// Errors that can occur with the event queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Event handler failed for {event_id}: {message}")]
    Handler { event_id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Settings for opening an event queue
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Path to the persistence log
    pub log_path: PathBuf,

    /// Keep only the first record per event id during recovery
    pub dedup_on_recovery: bool,
}

impl EventQueueConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            dedup_on_recovery: false,
        }
    }

    pub fn with_dedup_on_recovery(mut self, dedup: bool) -> Self {
        self.dedup_on_recovery = dedup;
        self
    }
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Events handled successfully
    pub processed: u64,

    /// Events routed to the dead-letter list
    pub failed: u64,

    /// Events currently in the live heap
    pub current_queue_length: usize,
}

/// Consumer invoked for each event popped during replay
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Default handler: logs the event and accepts it
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        info!(
            event_id = %event.event_id,
            priority = event.priority,
            "Processed event"
        );
        Ok(())
    }
}

/// Heap entry ordered so that `BinaryHeap` (a max-heap) pops the smallest
/// `(priority, timestamp, seq)` first.
struct QueueEntry {
    seq: u64,
    event: Event,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .order_key_cmp(&self.event)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

/// File-backed priority queue over events
///
/// Single-writer: all mutation goes through `&mut self`.
pub struct EventQueue {
    log_path: PathBuf,
    heap: BinaryHeap<QueueEntry>,
    dead_letters: Vec<Event>,
    metrics: QueueMetrics,
    next_seq: u64,
    handler: Arc<dyn EventHandler>,
}

impl EventQueue {
    /// Open a queue, rebuilding the heap from the persistence log
    pub async fn open(config: EventQueueConfig) -> Result<Self, QueueError> {
        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut queue = Self {
            log_path: config.log_path,
            heap: BinaryHeap::new(),
            dead_letters: Vec::new(),
            metrics: QueueMetrics::default(),
            next_seq: 0,
            handler: Arc::new(LoggingHandler),
        };

        let recovered = queue.recover(config.dedup_on_recovery).await?;
        info!(
            log = %queue.log_path.display(),
            recovered,
            "Event queue opened"
        );

        Ok(queue)
    }

    /// Open the queue at the configured default location
    pub async fn open_default() -> Result<Self> {
        let config = crate::config::config()?;
        let queue = Self::open(
            EventQueueConfig::new(config.event_log.clone())
                .with_dedup_on_recovery(config.queue.dedup_on_recovery),
        )
        .await?;
        Ok(queue)
    }

    /// Replace the handler used by `process_event`
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Path of the persistence log
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Number of events in the live heap
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The event that would be popped next
    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|entry| &entry.event)
    }

    /// Events that failed processing, oldest first
    pub fn dead_letters(&self) -> &[Event] {
        &self.dead_letters
    }

    /// Snapshot of the queue counters
    pub fn get_metrics(&self) -> QueueMetrics {
        self.metrics
    }

    /// Validate, persist, then enqueue an event
    ///
    /// The record is on disk (and synced) before this returns `Ok`. If the
    /// write fails the event is not enqueued.
    pub async fn publish(&mut self, event: Event) -> Result<(), QueueError> {
        if !event.is_valid() {
            return Err(QueueError::Validation(format!(
                "Invalid event structure (event_id: {:?})",
                event.event_id
            )));
        }

        self.append_record(&event).await?;
        debug!(event_id = %event.event_id, priority = event.priority, "Event published");
        self.push(event);

        Ok(())
    }

    /// Pop the most urgent event without processing it
    pub fn pop(&mut self) -> Option<Event> {
        let entry = self.heap.pop()?;
        self.metrics.current_queue_length = self.heap.len();
        Some(entry.event)
    }

    /// Drain the heap in priority order, processing each event
    ///
    /// Returns the consumed events in the order they were popped.
    pub async fn replay_events(&mut self) -> Vec<Event> {
        let mut consumed = Vec::with_capacity(self.heap.len());

        while let Some(event) = self.pop() {
            if let Err(e) = self.process_event(&event).await {
                debug!(event_id = %event.event_id, error = %e, "Event dead-lettered during replay");
            }
            consumed.push(event);
        }

        consumed
    }

    /// Run the handler for one event, dead-lettering it on any failure
    pub async fn process_event(&mut self, event: &Event) -> Result<(), QueueError> {
        let result = if event.is_valid() {
            self.handler
                .handle(event)
                .await
                .map_err(|e| QueueError::Handler {
                    event_id: event.event_id.clone(),
                    message: format!("{:#}", e),
                })
        } else {
            Err(QueueError::Validation(format!(
                "Event validation failed (event_id: {:?})",
                event.event_id
            )))
        };

        match result {
            Ok(()) => {
                self.metrics.processed += 1;
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "Failed to process event");
                self.dead_letters.push(event.clone());
                self.metrics.failed += 1;
                Err(e)
            }
        }
    }

    /// Move every dead letter back into the live heap
    ///
    /// The events are already in the log, so nothing is re-appended.
    pub fn requeue_dead_letters(&mut self) -> usize {
        let letters = std::mem::take(&mut self.dead_letters);
        let count = letters.len();
        for event in letters {
            self.push(event);
        }
        if count > 0 {
            info!(count, "Requeued dead letters");
        }
        count
    }

    fn push(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry { seq, event });
        self.metrics.current_queue_length = self.heap.len();
    }

    /// Append one record under an exclusive file lock and sync it
    async fn append_record(&self, event: &Event) -> Result<(), QueueError> {
        let line = serde_json::to_string(event)?;
        let path = self.log_path.clone();

        tokio::task::spawn_blocking(move || append_line_locked(&path, &line))
            .await
            .map_err(|e| QueueError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        Ok(())
    }

    /// Re-push every record in the log; corrupt lines are skipped
    async fn recover(&mut self, dedup: bool) -> Result<usize, QueueError> {
        if !self.log_path.exists() {
            return Ok(0);
        }

        let file = File::open(&self.log_path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut seen: HashSet<String> = HashSet::new();
        let mut line_no = 0usize;
        let mut recovered = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let event: Event = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping corrupt event record");
                    continue;
                }
            };

            if !event.is_valid() {
                warn!(line = line_no, "Skipping invalid event record");
                continue;
            }

            if dedup && !seen.insert(event.event_id.clone()) {
                debug!(line = line_no, event_id = %event.event_id, "Skipping duplicate event record");
                continue;
            }

            self.push(event);
            recovered += 1;
        }

        Ok(recovered)
    }
}

fn append_line_locked(path: &Path, line: &str) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    file.lock_exclusive()?;
    let written = writeln!(file, "{}", line).and_then(|_| file.sync_data());
    FileExt::unlock(&file)?;

    written
}
