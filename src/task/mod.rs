//! Schedulable units of work.

mod batcher;

pub use batcher::BatchDeleteTask;

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Opaque error produced by a task execution.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A schedulable unit of work.
///
/// Implementations should watch `cancel` and return promptly once it
/// fires; the pool cannot interrupt an execution forcibly.
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, cancel: CancellationToken) -> Result<(), TaskError>;

    /// Log-safe description of the task. Must not expose sensitive data.
    fn describe(&self) -> String;
}

/// Several task errors joined into one, in report order.
///
/// Returned by [`crate::worker::WorkerPool::take_errors`] and by
/// [`BatchDeleteTask`] when bulk deletes failed during its run.
#[derive(Debug)]
pub struct TaskFailures(Vec<TaskError>);

impl TaskFailures {
    pub(crate) fn new(errors: Vec<TaskError>) -> Self {
        Self(errors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[TaskError] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<TaskError> {
        self.0
    }
}

impl fmt::Display for TaskFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskFailures {}
