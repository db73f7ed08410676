//! Store instrumentation: per-partition counters and a best-effort event feed.
//!
//! Mutating calls publish a [`StoreEvent`] with non-blocking `try_send`. A
//! subscriber that falls behind loses events; the store never waits on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::ErrorKind;
use crate::object::Uid;

/// Kind of store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Insert.
    Set,
    /// Partial or full update.
    Update,
    /// Removal by uid.
    Delete,
    /// Replace-by-key.
    Replace,
    /// Stored record moved to another version.
    Migrate,
}

/// One completed mutating call.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Partition the call targeted.
    pub partition: String,
    /// Operation performed.
    pub op: StoreOp,
    /// Record touched, when known.
    pub uid: Option<Uid>,
    /// Wall time spent inside the store.
    pub latency: Duration,
    /// Failure kind, `None` on success.
    pub error: Option<ErrorKind>,
    /// Completion time.
    pub at: DateTime<Utc>,
}

/// Atomic counters for one partition.
#[derive(Debug, Default)]
pub struct PartitionStats {
    sets: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    reads: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`PartitionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Successful inserts and replacements.
    pub sets: u64,
    /// Successful updates and record migrations.
    pub updates: u64,
    /// Successful deletes.
    pub deletes: u64,
    /// Successful reads and queries.
    pub reads: u64,
    /// Calls that returned an error.
    pub failures: u64,
}

impl PartitionStats {
    pub(crate) fn record_write(&self, op: StoreOp) {
        let counter = match op {
            StoreOp::Set | StoreOp::Replace => &self.sets,
            StoreOp::Update | StoreOp::Migrate => &self.updates,
            StoreOp::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sets: self.sets.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Fan-out of store events to bounded subscriber queues.
#[derive(Debug)]
pub(crate) struct EventHub {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<StoreEvent>>>,
    dropped: AtomicU64,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = bounded(self.capacity);
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    pub(crate) fn publish(&self, event: StoreEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        if subs.is_empty() {
            return;
        }
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(partition = %event.partition, dropped = total, "store event queue full; event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
