//! Work Executor — abstraction for how units of work are run off the caller's thread.
//!
//! Separates *where work runs* from *how outcomes are gated and delivered*.
//! Default: [`SequentialExecutor`](crate::sequential_executor::SequentialExecutor),
//! a single FIFO worker.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::cancellation::CancellationToken;
use crate::error::TaskError;
use crate::task::TaskId;

/// Opaque handle returned when work is submitted.
pub trait WorkHandle: Send + Sync {
    /// Cancel the submitted work.
    ///
    /// Work that has not started yet will never start. When `may_interrupt`
    /// is set, the work's [`CancellationToken`] is also fired so running work
    /// can stop early; it is never forcibly preempted.
    fn cancel(&self, may_interrupt: bool);

    /// Check if cancellation has been requested.
    fn is_cancelled(&self) -> bool;
}

/// Boxed unit of work as seen by an executor. It receives the cancellation
/// token and resolves once the work, including outcome hand-off, is done.
pub type BoxedWork = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Jobs accepted by `submit`
    pub submitted: u64,
    /// Jobs the worker began running
    pub started: u64,
    /// Jobs that ran to completion (including panics)
    pub finished: u64,
    /// Jobs cancelled before they started
    pub skipped: u64,
    /// Jobs currently waiting to start
    pub queued: usize,
}

/// Trait for running units of work and managing executor lifecycle.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    /// Queue `work` for execution. Never blocks and never runs `work` inline.
    ///
    /// Fails with `ExecutorShutdown` after [`shutdown`](Self::shutdown), or with
    /// `QueueFull` when a configured queue limit is reached.
    fn submit(&self, task_id: TaskId, work: BoxedWork) -> Result<Box<dyn WorkHandle>, TaskError>;

    /// Stop accepting work, let already-queued work finish, and wait for the
    /// worker to exit. Idempotent.
    async fn shutdown(&self);

    /// Whether `shutdown` has been requested.
    fn is_shutdown(&self) -> bool;

    fn stats(&self) -> ExecutorStats;
}
