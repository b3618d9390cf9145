//! Per-worker pull loop over the shared task queue.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::pool::ErrorSink;
use crate::metrics::WorkerMetrics;
use crate::task::Task;

/// Shared consumer end of the pool's task queue.
pub(super) type TaskQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<Box<dyn Task>>>>;

/// One long-running worker. Pulls tasks until its token is cancelled or
/// the queue is closed and empty; a failing or panicking task never stops
/// the loop.
pub(super) struct Worker {
    id: usize,
    metrics: Arc<WorkerMetrics>,
    queue: TaskQueue,
    errors: Arc<ErrorSink>,
    // Set by `bind` before the worker is spawned; `stop` is a no-op
    // only on a pool that was never started.
    cancel: Mutex<Option<CancellationToken>>,
}

impl Worker {
    pub(super) fn new(
        id: usize,
        metrics: WorkerMetrics,
        queue: TaskQueue,
        errors: Arc<ErrorSink>,
    ) -> Self {
        Self {
            id,
            metrics: Arc::new(metrics),
            queue,
            errors,
            cancel: Mutex::new(None),
        }
    }

    pub(super) fn id(&self) -> usize {
        self.id
    }

    pub(super) fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Request cancellation of this worker only. Idempotent; used by
    /// abrupt shutdown.
    pub(super) fn stop(&self) {
        if let Some(token) = self.cancel.lock().expect("worker cancel lock").as_ref() {
            token.cancel();
        }
    }

    /// Mint this worker's child token off the pool's base context. Must
    /// happen before the worker task is spawned: a `stop` racing with a
    /// not-yet-polled worker still has a token to cancel.
    pub(super) fn bind(&self, base: &CancellationToken) -> CancellationToken {
        let cancel = base.child_token();
        *self.cancel.lock().expect("worker cancel lock") = Some(cancel.clone());
        cancel
    }

    pub(super) async fn run(&self, cancel: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker_id = self.id, "worker cancelled");
                    return;
                }
                task = Self::next_task(&self.queue) => match task {
                    Some(task) => task,
                    None => {
                        debug!(worker_id = self.id, "task queue closed, worker exiting");
                        return;
                    }
                },
            };

            self.run_task(task, &cancel).await;
        }
    }

    async fn next_task(queue: &TaskQueue) -> Option<Box<dyn Task>> {
        queue.lock().await.recv().await
    }

    /// Execute one task with full failure isolation: a returned error or a
    /// panic is counted, logged, and reported, then the loop continues.
    async fn run_task(&self, task: Box<dyn Task>, cancel: &CancellationToken) {
        self.metrics.task_started();
        debug!(worker_id = self.id, task = %task.describe(), "task started");

        let started_at = Instant::now();
        let outcome = AssertUnwindSafe(task.execute(cancel.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.metrics.task_failed();
                error!(
                    worker_id = self.id,
                    task = %task.describe(),
                    error = %err,
                    "task failed"
                );
                self.errors.report(err);
            }
            Err(panic) => {
                self.metrics.task_failed();
                let message = panic_message(panic.as_ref());
                error!(
                    worker_id = self.id,
                    task = %task.describe(),
                    panic = %message,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "task panicked"
                );
                self.errors
                    .report(format!("task panicked: {message}").into());
            }
        }

        self.metrics.task_completed();
        debug!(
            worker_id = self.id,
            elapsed = ?started_at.elapsed(),
            "task completed"
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedTask {
        result: Option<&'static str>,
    }

    #[async_trait]
    impl Task for FixedTask {
        async fn execute(&self, _cancel: CancellationToken) -> Result<(), TaskError> {
            match self.result {
                None => Ok(()),
                Some(message) => Err(message.into()),
            }
        }

        fn describe(&self) -> String {
            "FixedTask".to_string()
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl Task for PanickingTask {
        async fn execute(&self, _cancel: CancellationToken) -> Result<(), TaskError> {
            panic!("broken invariant");
        }

        fn describe(&self) -> String {
            "PanickingTask".to_string()
        }
    }

    fn test_worker(queue_capacity: usize) -> (Worker, mpsc::Sender<Box<dyn Task>>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let worker = Worker::new(
            1,
            WorkerMetrics::new(),
            Arc::new(tokio::sync::Mutex::new(rx)),
            Arc::new(ErrorSink::new(16)),
        );
        (worker, tx)
    }

    #[tokio::test]
    async fn worker_survives_failing_and_panicking_tasks() {
        let (worker, tx) = test_worker(8);

        tx.send(Box::new(PanickingTask)).await.unwrap();
        tx.send(Box::new(FixedTask { result: Some("boom") }))
            .await
            .unwrap();
        tx.send(Box::new(FixedTask { result: None })).await.unwrap();
        drop(tx);

        let cancel = worker.bind(&CancellationToken::new());
        worker.run(cancel).await;

        assert_eq!(worker.metrics().tasks_started(), 3);
        assert_eq!(worker.metrics().tasks_completed(), 3);
        assert_eq!(worker.metrics().tasks_failed(), 2);
    }

    #[tokio::test]
    async fn stop_before_bind_is_a_no_op() {
        let (worker, tx) = test_worker(1);
        worker.stop();

        tx.send(Box::new(FixedTask { result: None })).await.unwrap();
        drop(tx);
        let cancel = worker.bind(&CancellationToken::new());
        worker.run(cancel).await;

        assert_eq!(worker.metrics().tasks_completed(), 1);
    }

    #[tokio::test]
    async fn stop_after_bind_cancels_an_unpolled_worker() {
        let (worker, tx) = test_worker(1);
        let cancel = worker.bind(&CancellationToken::new());

        // Stop lands before the worker future is ever polled. The sender
        // stays open, so only the cancellation can end the loop.
        worker.stop();
        tx.send(Box::new(FixedTask { result: None })).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), worker.run(cancel))
            .await
            .expect("stopped worker must exit instead of draining");
    }

    #[tokio::test]
    async fn cancelled_base_token_stops_the_loop() {
        let (worker, _tx) = test_worker(1);
        let base = CancellationToken::new();
        base.cancel();

        // Returns instead of blocking on an empty queue.
        let cancel = worker.bind(&base);
        worker.run(cancel).await;
        assert_eq!(worker.metrics().tasks_started(), 0);
    }
}
