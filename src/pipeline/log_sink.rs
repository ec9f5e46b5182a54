//! Fire-and-forget persistence of step log entries.
//!
//! Agents append through a bounded channel drained by one background task
//! into [`StepRepository::append_log`]. Appending never waits: when the
//! buffer is full the entry is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::storage::{StepLogEntry, StepRepository};

enum LogCommand {
    Append { step_id: Uuid, entry: StepLogEntry },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the log writer task.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogCommand>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl LogSink {
    /// Spawns the writer task on the current tokio runtime.
    ///
    /// The task exits once every handle has been dropped and the buffer is
    /// drained.
    pub fn spawn(steps: Arc<dyn StepRepository>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogCommand>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    LogCommand::Append { step_id, entry } => {
                        if let Err(e) = steps.append_log(step_id, entry).await {
                            tracing::warn!(
                                step_id = %step_id,
                                error = %e,
                                "Failed to persist step log entry"
                            );
                        }
                    }
                    LogCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queues `entry` for `step_id` without waiting.
    pub fn append(&self, step_id: Uuid, entry: StepLogEntry) {
        if let Err(e) = self.tx.try_send(LogCommand::Append { step_id, entry }) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "buffer full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            tracing::debug!(step_id = %step_id, dropped = total, reason, "Dropped step log entry");
        }
    }

    /// Waits until every entry queued before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LogCommand::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Entries discarded so far because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
