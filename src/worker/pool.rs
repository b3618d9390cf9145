//! Pool lifecycle, queue ownership, and error aggregation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

use super::runner::Worker;
use super::{PoolConfig, PoolError};
use crate::metrics::{MetricsReport, PoolMetrics, WorkerMetrics};
use crate::task::{Task, TaskError, TaskFailures};

/// Bounded buffer of task errors, drained by [`WorkerPool::take_errors`].
/// Once full, further reports are dropped (and logged), never queued.
pub(super) struct ErrorSink {
    errors: Mutex<Vec<TaskError>>,
    capacity: usize,
}

impl ErrorSink {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub(super) fn report(&self, err: TaskError) {
        let mut errors = self.errors.lock().expect("error sink lock");
        if errors.len() >= self.capacity {
            drop(errors);
            warn!(error = %err, "error buffer full, dropping error");
            return;
        }
        errors.push(err);
    }

    fn drain(&self) -> Vec<TaskError> {
        std::mem::take(&mut *self.errors.lock().expect("error sink lock"))
    }
}

/// Fixed-size pool of workers pulling from one bounded FIFO queue.
///
/// Lifecycle: construct, [`start`](Self::start) once, submit tasks, then
/// tear down exactly once with [`drain`](Self::drain) (finish queued work)
/// or [`shutdown`](Self::shutdown) (cancel workers). The close transition
/// happens once no matter how many drain/shutdown calls race: the queue
/// sender lives in an `RwLock<Option<_>>` and the first closer takes it.
pub struct WorkerPool {
    name: String,
    workers: Vec<Arc<Worker>>,
    sender: RwLock<Option<mpsc::Sender<Box<dyn Task>>>>,
    pool_metrics: PoolMetrics,
    errors: Arc<ErrorSink>,
    started: AtomicBool,
    done_tx: Mutex<Option<watch::Sender<bool>>>,
    done_rx: watch::Receiver<bool>,
}

impl WorkerPool {
    /// Build a pool with `config.worker_count` workers (ids starting at 1).
    ///
    /// `worker_metrics` must return a fresh instance on every call; the
    /// pool invokes it once per worker so attribution stays per-worker.
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        pool_metrics: PoolMetrics,
        mut worker_metrics: impl FnMut() -> WorkerMetrics,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let errors = Arc::new(ErrorSink::new(config.max_errors));
        let (done_tx, done_rx) = watch::channel(false);

        let workers = (1..=config.worker_count)
            .map(|id| {
                Arc::new(Worker::new(
                    id,
                    worker_metrics(),
                    Arc::clone(&queue),
                    Arc::clone(&errors),
                ))
            })
            .collect();

        Ok(Self {
            name: name.into(),
            workers,
            sender: RwLock::new(Some(tx)),
            pool_metrics,
            errors,
            started: AtomicBool::new(false),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        })
    }

    /// Spawn every worker against `base` and return immediately. Each
    /// worker runs on a child token of `base`, so cancelling `base`
    /// cancels them all. Calling `start` again is a logged no-op.
    pub fn start(&self, base: &CancellationToken) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(pool = %self.name, "worker pool already started");
            return;
        }

        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            // Bind before spawning so a shutdown racing with a worker
            // that has not been polled yet still cancels it.
            let cancel = worker.bind(base);
            let span = info_span!("worker", pool = %self.name, worker_id = worker.id());
            handles.push(tokio::spawn(
                async move { worker.run(cancel).await }.instrument(span),
            ));
        }

        debug!(pool = %self.name, workers = handles.len(), "worker pool started");

        // Supervisor: flip the done flag once every worker has returned.
        let done_tx = self
            .done_tx
            .lock()
            .expect("pool done lock")
            .take()
            .expect("worker pool started twice");
        let pool_name = self.name.clone();
        tokio::spawn(async move {
            for handle in handles {
                if let Err(err) = handle.await {
                    error!(pool = %pool_name, error = %err, "worker join failed");
                }
            }
            let _ = done_tx.send(true);
        });
    }

    /// Non-blocking enqueue attempt.
    ///
    /// Fails with [`PoolError::Closed`] once the close transition has
    /// begun, [`PoolError::Cancelled`] if `cancel` already fired, and
    /// [`PoolError::QueueFull`] immediately on a saturated queue — the
    /// caller owns backpressure and retries.
    pub fn submit(
        &self,
        cancel: &CancellationToken,
        task: Box<dyn Task>,
    ) -> Result<(), PoolError> {
        let sender = self.sender.read().expect("pool sender lock");
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::Closed);
        };
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        match sender.try_send(task) {
            Ok(()) => {
                self.pool_metrics.task_enqueued();
                debug!(pool = %self.name, "task submitted");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(
                    pool = %self.name,
                    task = %task.describe(),
                    "task queue full, rejecting task"
                );
                Err(PoolError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::Closed),
        }
    }

    /// Close the queue and wait for the workers to finish everything
    /// already enqueued. Blocks until all workers return or `cancel`
    /// fires, whichever happens first.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        if self.close_queue() {
            debug!(pool = %self.name, "task queue closed, draining");
        }
        self.wait_idle(cancel).await
    }

    /// Close the queue and additionally cancel every worker. In-flight
    /// executions are expected to observe cancellation cooperatively;
    /// tasks still queued are abandoned. Blocks like [`drain`](Self::drain).
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        if self.close_queue() {
            debug!(pool = %self.name, "task queue closed, shutting down");
        }
        for worker in &self.workers {
            worker.stop();
        }
        self.wait_idle(cancel).await
    }

    /// Snapshot of the pool counter plus every worker's counters.
    /// Never blocks on lifecycle state.
    pub fn metrics(&self) -> MetricsReport {
        MetricsReport {
            pool: self.pool_metrics.snapshot(),
            workers: self
                .workers
                .iter()
                .map(|worker| (worker.id(), worker.metrics().snapshot()))
                .collect::<HashMap<_, _>>(),
        }
    }

    /// Drain all accumulated task errors, clearing the buffer.
    /// Read-and-clear: a second call returns `None` until new failures
    /// arrive.
    pub fn take_errors(&self) -> Option<TaskFailures> {
        let errors = self.errors.drain();
        if errors.is_empty() {
            None
        } else {
            Some(TaskFailures::new(errors))
        }
    }

    /// One-shot close: the first caller takes the sender and thereby
    /// closes the channel; everyone else sees it already gone.
    fn close_queue(&self) -> bool {
        self.sender
            .write()
            .expect("pool sender lock")
            .take()
            .is_some()
    }

    async fn wait_idle(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        // Nothing was spawned, nothing to wait for.
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut done = self.done_rx.clone();
        tokio::select! {
            result = done.wait_for(|done| *done) => match result {
                Ok(_) => Ok(()),
                // Supervisor always sends before exiting; a closed channel
                // here still means the workers are gone.
                Err(_) => Ok(()),
            },
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
        }
    }
}
