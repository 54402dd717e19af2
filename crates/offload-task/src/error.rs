//! Error types for task lifecycle and unit-of-work failures.
//!
//! Two channels, never conflated:
//! - [`TaskError`] is returned synchronously from `run` / `submit` for misuse
//!   and resource limits.
//! - [`WorkError`] is what a unit of work fails with; it only ever reaches the
//!   caller asynchronously through `ResultCallback::on_error`.

use crate::state_machine::TaskStatus;

/// Result type for synchronous task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Synchronous errors surfaced by task and executor operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task already running")]
    AlreadyExecuted,

    #[error("Task already cancelled")]
    AlreadyCancelled,

    #[error("Invalid state transition: {current:?} -> {requested:?}")]
    InvalidTransition {
        current: TaskStatus,
        requested: TaskStatus,
    },

    #[error("Task is in terminal state: {0:?}")]
    TerminalState(TaskStatus),

    #[error("Executor has been shut down")]
    ExecutorShutdown,

    #[error("Executor queue is full: {0} jobs waiting")]
    QueueFull(usize),

    #[error("Delivery context has shut down")]
    DispatcherClosed,
}

impl TaskError {
    /// Create an invalid argument error naming the offending parameter
    pub fn invalid_argument(name: impl AsRef<str>) -> Self {
        Self::InvalidArgument(format!("{} cannot be empty", name.as_ref()))
    }

    /// Programmer misuse of the run/cancel lifecycle. Never worth retrying.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExecuted
                | Self::AlreadyCancelled
                | Self::InvalidTransition { .. }
                | Self::TerminalState(_)
        )
    }
}

/// Failure raised by a unit of work, delivered through `on_error`.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Source(Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The unit of work observed its cancellation token and stopped early.
    #[error("Unit of work interrupted")]
    Interrupted,

    #[error("Unit of work panicked: {0}")]
    Panicked(String),
}

impl WorkError {
    /// Create a message-only failure
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wrap any error value raised by the unit of work
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source(Box::new(err))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Build a `Panicked` error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

impl From<std::io::Error> for WorkError {
    fn from(err: std::io::Error) -> Self {
        WorkError::new(err)
    }
}
