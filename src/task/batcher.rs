//! Batching aggregator for bulk link deletion.
//!
//! Many small delete requests arrive on a channel; the batcher merges them
//! per owner and issues far fewer [`LinkStore::batch_delete`] calls,
//! bounding latency with a periodic flush and memory with a size-triggered
//! one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{Task, TaskError, TaskFailures};
use crate::storage::{DeleteBatch, LinkStore};

/// Coalesces owner-keyed delete requests and flushes them in bulk.
///
/// Runs as a [`Task`]: `execute` loops over its input channel until the
/// execution token is cancelled, flushing the buffer on every timer tick,
/// whenever a merge pushes the buffered owner count to `flush_threshold`,
/// and once more on termination. Bulk calls run asynchronously; errors are
/// collected and joined into the `execute` result. Completion of bulk
/// calls issued right before termination is best-effort.
pub struct BatchDeleteTask {
    storage: Arc<dyn LinkStore>,
    flush_threshold: usize,
    interval: Duration,
    buffer: Mutex<DeleteBatch>,
    input: tokio::sync::Mutex<mpsc::Receiver<DeleteBatch>>,
    errors: Arc<Mutex<Vec<TaskError>>>,
}

impl BatchDeleteTask {
    pub fn new(
        input: mpsc::Receiver<DeleteBatch>,
        storage: Arc<dyn LinkStore>,
        flush_threshold: usize,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            flush_threshold,
            interval,
            buffer: Mutex::new(DeleteBatch::new()),
            input: tokio::sync::Mutex::new(input),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut input = self.input.lock().await;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("batch delete cancelled, flushing remainder");
                    self.flush();
                    return;
                }
                _ = ticker.tick() => {
                    self.flush();
                }
                batch = input.recv() => match batch {
                    Some(batch) => {
                        if self.merge(batch) >= self.flush_threshold {
                            self.flush();
                        }
                    }
                    None => {
                        debug!("delete channel closed, flushing remainder");
                        self.flush();
                        return;
                    }
                },
            }
        }
    }

    /// Append the incoming ids per owner (never replacing earlier ones)
    /// and return the number of owners now buffered.
    fn merge(&self, batch: DeleteBatch) -> usize {
        let mut buffer = self.buffer.lock().expect("delete buffer lock");
        for (owner, ids) in batch {
            buffer.entry(owner).or_default().extend(ids);
        }
        buffer.len()
    }

    /// Swap the buffer for an empty one and hand the old contents to an
    /// asynchronous bulk delete. No-op on an empty buffer. The buffer lock
    /// is released before the storage call starts.
    fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().expect("delete buffer lock");
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        debug!(owners = batch.len(), "flushing delete batch");

        let storage = Arc::clone(&self.storage);
        let errors = Arc::clone(&self.errors);
        tokio::spawn(async move {
            if let Err(err) = storage.batch_delete(&batch).await {
                error!(error = %err, ids = ?batch, "bulk delete failed");
                errors
                    .lock()
                    .expect("delete errors lock")
                    .push(err.into());
            }
        });
    }

    fn take_errors(&self) -> Vec<TaskError> {
        std::mem::take(&mut *self.errors.lock().expect("delete errors lock"))
    }
}

#[async_trait]
impl Task for BatchDeleteTask {
    /// Blocks until `cancel` fires, even if the input channel closes
    /// earlier, then reports every bulk-delete error from this run.
    async fn execute(&self, cancel: CancellationToken) -> Result<(), TaskError> {
        tokio::join!(self.run(cancel.clone()), cancel.cancelled());

        let errors = self.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Box::new(TaskFailures::new(errors)))
        }
    }

    fn describe(&self) -> String {
        let pending = self.buffer.lock().expect("delete buffer lock").len();
        format!(
            "BatchDeleteTask{{pending_owners: {pending}, flush_threshold: {}, interval: {:?}}}",
            self.flush_threshold, self.interval
        )
    }
}
