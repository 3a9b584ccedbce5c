//! Status events for long-running operations
//!
//! The lifecycle controller publishes progress on a [`StatusReporter`]
//! (a broadcast channel). Any number of consumers can subscribe; a
//! [`StatusBoard`] keeps the latest event visible and clears it after a
//! per-kind timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use greendata_core::{RecordId, StatusTimeouts};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Monotonic per reporter
    pub seq: u64,
    pub kind: StatusKind,
    pub message: String,
    pub record: Option<RecordId>,
}

/// Publisher side of the status channel
#[derive(Clone)]
pub struct StatusReporter {
    tx: broadcast::Sender<Arc<StatusEvent>>,
    seq: Arc<AtomicU64>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StatusEvent>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn pending(&self, message: impl Into<String>, record: Option<&RecordId>) {
        self.publish(StatusKind::Pending, message.into(), record);
    }

    pub fn success(&self, message: impl Into<String>, record: Option<&RecordId>) {
        self.publish(StatusKind::Success, message.into(), record);
    }

    pub fn error(&self, message: impl Into<String>, record: Option<&RecordId>) {
        self.publish(StatusKind::Error, message.into(), record);
    }

    fn publish(&self, kind: StatusKind, message: String, record: Option<&RecordId>) {
        let event = StatusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            kind,
            message,
            record: record.cloned(),
        };
        tracing::debug!(seq = event.seq, kind = ?event.kind, message = %event.message, "Status");
        // no subscribers is fine
        let _ = self.tx.send(Arc::new(event));
    }
}

/// Latest status event, cleared after its timeout
pub struct StatusBoard {
    current: Arc<ArcSwapOption<StatusEvent>>,
    task: JoinHandle<()>,
}

impl StatusBoard {
    /// Subscribe to `reporter` and track the latest event in a background task
    pub fn spawn(reporter: &StatusReporter, timeouts: StatusTimeouts) -> Self {
        let current = Arc::new(ArcSwapOption::empty());
        let mut rx = reporter.subscribe();
        let slot = current.clone();

        let task = tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => {
                            let ttl = match event.kind {
                                StatusKind::Pending => timeouts.pending_ms,
                                StatusKind::Success => timeouts.success_ms,
                                StatusKind::Error => timeouts.error_ms,
                            };
                            deadline = Some(Instant::now() + Duration::from_millis(ttl));
                            slot.store(Some(event));
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "Status board lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        slot.store(None);
                    }
                }
            }
        });

        Self { current, task }
    }

    pub fn current(&self) -> Option<Arc<StatusEvent>> {
        self.current.load_full()
    }
}

impl Drop for StatusBoard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
