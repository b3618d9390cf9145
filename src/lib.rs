//! Bounded task execution for the shortlink service.
//!
//! A fixed set of workers pulls opaque [`task::Task`]s from a
//! fixed-capacity FIFO queue owned by [`worker::WorkerPool`]. The pool
//! exposes non-blocking submission, per-worker and pool-wide counters,
//! and two shutdown modes: `drain` (finish queued work) and `shutdown`
//! (cancel workers cooperatively).
//!
//! [`task::BatchDeleteTask`] is the main production task: it coalesces
//! owner-keyed delete requests and flushes them to a [`storage::LinkStore`]
//! in bulk, periodically or when the buffer grows past a threshold.

pub mod metrics;
pub mod storage;
pub mod task;
pub mod worker;
