//! Throughput and failure counters for the worker pool.
//!
//! Counters are plain atomics so workers never contend while reporting.
//! Every pool gets its own [`PoolMetrics`] and every worker its own
//! [`WorkerMetrics`]; sharing one instance across workers would corrupt
//! per-worker attribution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-worker task lifecycle counters.
///
/// `completed` fires after every execution, success or failure, so it is
/// a superset of `failed`.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn task_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn tasks_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            tasks_started: self.tasks_started(),
            tasks_completed: self.tasks_completed(),
            tasks_failed: self.tasks_failed(),
        }
    }
}

/// Point-in-time view of one worker's counters.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetricsSnapshot {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Pool-wide counters, incremented once per successful submission.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    enqueued: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn task_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            tasks_enqueued: self.tasks_enqueued(),
        }
    }
}

/// Point-in-time view of the pool-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    pub tasks_enqueued: u64,
}

/// Combined snapshot returned by [`crate::worker::WorkerPool::metrics`],
/// keyed by worker id.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub pool: PoolMetricsSnapshot,
    pub workers: HashMap<usize, WorkerMetricsSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_counters_increment_independently() {
        let metrics = WorkerMetrics::new();
        metrics.task_started();
        metrics.task_started();
        metrics.task_completed();
        metrics.task_failed();

        assert_eq!(metrics.tasks_started(), 2);
        assert_eq!(metrics.tasks_completed(), 1);
        assert_eq!(metrics.tasks_failed(), 1);
    }

    #[test]
    fn snapshot_serializes_with_stable_keys() {
        let metrics = WorkerMetrics::new();
        metrics.task_started();
        metrics.task_completed();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["tasks_started"], 1);
        assert_eq!(json["tasks_completed"], 1);
        assert_eq!(json["tasks_failed"], 0);
    }

    #[test]
    fn pool_counter_snapshot() {
        let metrics = PoolMetrics::new();
        metrics.task_enqueued();
        metrics.task_enqueued();
        metrics.task_enqueued();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["tasks_enqueued"], 3);
    }
}
