//! Background attempt recorder.
//!
//! `record` never waits: attempts go onto a bounded queue drained by one
//! worker task. When the queue is full the attempt is dropped and counted.
//! Store failures are logged and counted, never returned.

use super::{Attempt, AttemptStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Counters {
    recorded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Recorder counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecorderStatus {
    /// Attempts the store accepted
    pub recorded: u64,
    /// Attempts the store rejected
    pub failed: u64,
    /// Attempts never queued (queue full or recorder stopped)
    pub dropped: u64,
}

/// Fire-and-forget attempt writer
pub struct AttemptRecorder {
    sender: Mutex<Option<mpsc::Sender<Attempt>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl AttemptRecorder {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn AttemptStore>, queue_capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Attempt>(queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = tokio::spawn(async move {
            while let Some(attempt) = receiver.recv().await {
                match store.insert(&attempt).await {
                    Ok(()) => {
                        worker_counters.recorded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            error = %e,
                            attempt_id = %attempt.id,
                            actor = %attempt.actor,
                            "attempt_record_failed"
                        );
                    }
                }
            }
            debug!("attempt_recorder_stopped");
        });

        AttemptRecorder {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    /// A recorder that drops everything. Used when recording is turned off.
    pub fn disabled() -> Self {
        AttemptRecorder {
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Queue an attempt for persistence. Returns immediately.
    pub fn record(&self, attempt: Attempt) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        match sender.try_send(attempt) {
            Ok(()) => {}
            Err(TrySendError::Full(attempt)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(attempt_id = %attempt.id, "attempt_queue_full");
            }
            Err(TrySendError::Closed(attempt)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(attempt_id = %attempt.id, "attempt_recorder_closed");
            }
        }
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting attempts and wait until the queued ones are written.
    pub async fn shutdown(&self) {
        // Dropping the sender ends the worker loop once the queue is empty
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "attempt_recorder_join_failed");
            }
            let status = self.status();
            info!(
                recorded = status.recorded,
                failed = status.failed,
                dropped = status.dropped,
                "attempt_recorder_drained"
            );
        }
    }
}
