//! Work Queue
//!
//! Single-consumer FIFO buffer between the flood gate and the request orchestrator.
//! At most one entry is `processing` at a time, consecutive dequeues are spaced by a
//! minimum interval measured from the previous completion, and finished entries are
//! retained for a bounded time so late duplicates can still be recognised.

use crate::types::InboundEvent;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Processing status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl EntryStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, EntryStatus::Done | EntryStatus::Error)
    }
}

/// An admitted message waiting for, or undergoing, processing.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub message_id: String,
    pub payload: InboundEvent,
    pub enqueued_at: Instant,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Copy)]
struct EntryRecord {
    status: EntryStatus,
    finished_at: Option<Instant>,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Number of buffered entries
    pub pending: usize,
    /// Number of entries currently being processed (0 or 1)
    pub processing: usize,
    /// Number of entries completed successfully
    pub completed: usize,
    /// Number of entries that ended in error
    pub failed: usize,
    /// Entries still retained for duplicate lookups
    pub retained: usize,
}

#[derive(Debug)]
pub struct WorkQueue {
    buffer: VecDeque<QueueEntry>,
    entries: HashMap<String, EntryRecord>,
    processing: Option<String>,
    last_completed_at: Option<Instant>,
    last_processed_id: Option<String>,
    min_interval: Duration,
    entry_ttl: Duration,
    completed: usize,
    failed: usize,
}

impl WorkQueue {
    pub fn new(min_interval: Duration, entry_ttl: Duration) -> Self {
        Self {
            buffer: VecDeque::new(),
            entries: HashMap::new(),
            processing: None,
            last_completed_at: None,
            last_processed_id: None,
            min_interval,
            entry_ttl,
            completed: 0,
            failed: 0,
        }
    }

    /// True when `message_id` is a live entry or the last processed id.
    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
            || self.last_processed_id.as_deref() == Some(message_id)
    }

    /// Buffer an admitted event. Returns false if the id is already known.
    pub fn push(&mut self, event: InboundEvent, now: Instant) -> bool {
        if self.contains(&event.message_id) {
            return false;
        }
        let message_id = event.message_id.clone();
        self.entries.insert(
            message_id.clone(),
            EntryRecord {
                status: EntryStatus::Pending,
                finished_at: None,
            },
        );
        self.buffer.push_back(QueueEntry {
            message_id,
            payload: event,
            enqueued_at: now,
            status: EntryStatus::Pending,
        });
        true
    }

    /// Take the oldest buffered entry if the queue may start work now.
    ///
    /// Returns `None` while an entry is processing or while the minimum interval
    /// since the last completion has not elapsed.
    pub fn next_ready(&mut self, now: Instant) -> Option<QueueEntry> {
        if self.processing.is_some() {
            return None;
        }
        if let Some(last) = self.last_completed_at {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }

        let mut entry = self.buffer.pop_front()?;
        entry.status = EntryStatus::Processing;
        if let Some(record) = self.entries.get_mut(&entry.message_id) {
            record.status = EntryStatus::Processing;
        }
        self.processing = Some(entry.message_id.clone());

        debug!(
            message_id = %entry.message_id,
            waited_ms = now.duration_since(entry.enqueued_at).as_millis() as u64,
            remaining = self.buffer.len(),
            "Dequeued message for processing"
        );
        Some(entry)
    }

    /// Record the end of processing for `message_id`.
    pub fn complete(&mut self, message_id: &str, status: EntryStatus, now: Instant) {
        if !status.is_finished() {
            warn!(message_id = %message_id, status = ?status, "Ignoring non-terminal completion status");
            return;
        }
        if self.processing.as_deref() != Some(message_id) {
            warn!(message_id = %message_id, "Completion for an entry that is not processing");
        } else {
            self.processing = None;
        }

        if let Some(record) = self.entries.get_mut(message_id) {
            record.status = status;
            record.finished_at = Some(now);
        }
        match status {
            EntryStatus::Done => self.completed += 1,
            _ => self.failed += 1,
        }
        self.last_completed_at = Some(now);
        self.last_processed_id = Some(message_id.to_string());
    }

    /// Drop finished entries older than the retention TTL. Returns how many were evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.entry_ttl;
        let before = self.entries.len();
        self.entries.retain(|_, record| match record.finished_at {
            Some(finished) if record.status.is_finished() => now.duration_since(finished) < ttl,
            _ => true,
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, retained = self.entries.len(), "Evicted expired queue entries");
        }
        evicted
    }

    /// Empty the buffer and the entry map. Returns the number of buffered entries dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.entries.clear();
        self.processing = None;
        dropped
    }

    pub fn status(&self, message_id: &str) -> Option<EntryStatus> {
        self.entries.get(message_id).map(|record| record.status)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.is_some()
    }

    /// Number of buffered (pending) entries.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.buffer.len(),
            processing: usize::from(self.processing.is_some()),
            completed: self.completed,
            failed: self.failed,
            retained: self.entries.len(),
        }
    }
}
