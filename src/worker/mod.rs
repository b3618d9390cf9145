//! Bounded-concurrency worker pool.
//!
//! [`WorkerPool`] owns a fixed-capacity FIFO task queue and a fixed set of
//! workers that pull from it. Submission never blocks: a saturated queue is
//! reported back to the caller, which owns its retry policy.

mod pool;
mod runner;

pub use pool::WorkerPool;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has begun its close transition (drain or shutdown).
    #[error("worker pool closed")]
    Closed,

    /// The task queue is saturated; the caller must back off or drop.
    #[error("worker queue full")]
    QueueFull,

    /// The caller's cancellation token fired before the operation ran.
    #[error("operation cancelled by caller")]
    Cancelled,

    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),
}

/// Construction parameters for [`WorkerPool`]. All values must be
/// strictly positive.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of long-running workers, fixed for the pool's lifetime.
    pub worker_count: usize,
    /// Capacity of the task queue; also a natural flush threshold for
    /// batching tasks fed by the same configuration.
    pub queue_capacity: usize,
    /// Maximum task errors retained for [`WorkerPool::take_errors`];
    /// further reports are dropped with a warning.
    pub max_errors: usize,
}

impl PoolConfig {
    pub(crate) fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::InvalidConfig(
                "worker_count must be greater than 0".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        if self.max_errors == 0 {
            return Err(PoolError::InvalidConfig(
                "max_errors must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
