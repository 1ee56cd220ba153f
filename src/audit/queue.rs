//! Bounded audit queue and its background worker

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{AuditEntry, AuditSink};

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AuditStats {
        AuditStats {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Delivery counters of an audit queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Entries persisted by the sink
    pub written: u64,
    /// Entries the sink rejected
    pub failed: u64,
    /// Entries discarded because the queue was full or closed
    pub dropped: u64,
}

/// Producer side of the audit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<AuditEntry>,
    counters: Arc<Counters>,
}

/// Handle to the background writer
#[derive(Debug)]
pub struct AuditWorker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl AuditQueue {
    /// Start a worker draining a queue of `capacity` entries into `sink`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<K: AuditSink>(sink: K, capacity: usize) -> (AuditQueue, AuditWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(run_worker(
            Arc::new(sink),
            rx,
            shutdown_rx,
            Arc::clone(&counters),
        ));

        let queue = AuditQueue {
            tx,
            counters: Arc::clone(&counters),
        };
        let worker = AuditWorker {
            shutdown: shutdown_tx,
            handle,
            counters,
        };

        (queue, worker)
    }

    /// Hand an entry to the worker without waiting.
    ///
    /// Returns `false` when the entry was dropped.
    pub fn enqueue(&self, entry: AuditEntry) -> bool {
        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(entry)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(action = %entry.action, "Audit queue full, entry dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(action = %entry.action, "Audit queue closed, entry dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> AuditStats {
        self.counters.snapshot()
    }
}

impl AuditWorker {
    /// Stop intake, write every buffered entry and wait for the worker.
    ///
    /// Entries still buffered after `timeout` are lost.
    pub async fn shutdown(self, timeout: Duration) -> AuditStats {
        // The worker may already have exited if every queue handle was dropped
        let _ = self.shutdown.send(());

        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "Audit worker terminated abnormally"),
            Err(_) => {
                tracing::warn!(?timeout, "Audit drain timed out, remaining entries lost");
                handle.abort();
            }
        }

        let stats = self.counters.snapshot();
        tracing::info!(
            written = stats.written,
            failed = stats.failed,
            dropped = stats.dropped,
            "Audit worker stopped"
        );
        stats
    }
}

async fn run_worker<K: AuditSink>(
    sink: Arc<K>,
    mut rx: mpsc::Receiver<AuditEntry>,
    mut shutdown: oneshot::Receiver<()>,
    counters: Arc<Counters>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                rx.close();
                while let Some(entry) = rx.recv().await {
                    deliver(sink.as_ref(), &entry, &counters).await;
                }
                break;
            }

            received = rx.recv() => match received {
                Some(entry) => deliver(sink.as_ref(), &entry, &counters).await,
                None => break,
            },
        }
    }
}

async fn deliver<K: AuditSink>(sink: &K, entry: &AuditEntry, counters: &Counters) {
    match sink.write(entry).await {
        Ok(()) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %err,
                action = %entry.action,
                "Failed to write audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, MemoryAuditSink};

    #[tokio::test]
    async fn test_shutdown_drains_buffered_entries() {
        let sink = MemoryAuditSink::new();
        let (queue, worker) = AuditQueue::spawn(sink.clone(), 16);

        for _ in 0..5 {
            assert!(queue.enqueue(AuditEntry::new(AuditAction::ApiRequest)));
        }

        let stats = worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stats.written, 5);
        assert_eq!(sink.entries().len(), 5);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_dropped() {
        let (queue, worker) = AuditQueue::spawn(MemoryAuditSink::new(), 4);
        worker.shutdown(Duration::from_secs(1)).await;

        assert!(!queue.enqueue(AuditEntry::new(AuditAction::Debit)));
        assert_eq!(queue.stats().dropped, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_without_blocking() {
        let (queue, worker) = AuditQueue::spawn(MemoryAuditSink::new(), 1);

        // The worker cannot run until this task yields
        assert!(queue.enqueue(AuditEntry::new(AuditAction::Credit)));
        assert!(!queue.enqueue(AuditEntry::new(AuditAction::Credit)));

        let stats = worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stats.written, 1);
        assert_eq!(stats.dropped, 1);
    }
}
