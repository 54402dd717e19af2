//! Result callbacks: the consumer side of a task.
//!
//! A task invokes at most one of `on_result` / `on_error`, at most once, on the
//! dispatcher's delivery context.

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::WorkError;

/// Receives the outcome of a task.
pub trait ResultCallback<T>: Send + 'static {
    /// The unit of work produced a value.
    fn on_result(&mut self, value: T);

    /// The unit of work failed.
    fn on_error(&mut self, error: WorkError);
}

/// Type-erased callback as stored by a task
pub type BoxedCallback<T> = Box<dyn ResultCallback<T>>;

type ResultFn<T> = Box<dyn FnOnce(T) + Send>;
type ErrorFn = Box<dyn FnOnce(WorkError) + Send>;

/// Closure-based callback builder.
///
/// ```rust
/// use offload_task::TaskCallbacks;
///
/// let callbacks = TaskCallbacks::<u32>::new()
///     .with_result(|value| println!("got {value}"))
///     .with_error(|err| eprintln!("failed: {err}"));
/// ```
pub struct TaskCallbacks<T> {
    result: Option<ResultFn<T>>,
    error: Option<ErrorFn>,
}

impl<T> TaskCallbacks<T> {
    pub fn new() -> Self {
        Self {
            result: None,
            error: None,
        }
    }

    /// Set the success handler
    pub fn with_result<F>(mut self, f: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.result = Some(Box::new(f));
        self
    }

    /// Set the failure handler
    pub fn with_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(WorkError) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

impl<T> Default for TaskCallbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TaskCallbacks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCallbacks")
            .field("on_result", &self.result.as_ref().map(|_| "function"))
            .field("on_error", &self.error.as_ref().map(|_| "function"))
            .finish()
    }
}

impl<T: Send + 'static> ResultCallback<T> for TaskCallbacks<T> {
    fn on_result(&mut self, value: T) {
        match self.result.take() {
            Some(f) => f(value),
            None => debug!("No result handler configured, dropping value"),
        }
    }

    fn on_error(&mut self, error: WorkError) {
        match self.error.take() {
            Some(f) => f(error),
            None => debug!(error = %error, "No error handler configured, dropping error"),
        }
    }
}

/// Callback that forwards the outcome into a oneshot channel.
///
/// Lets async callers await a task while the task itself stays callback-driven.
#[derive(Debug)]
pub struct OutcomeSender<T> {
    tx: Option<oneshot::Sender<Result<T, WorkError>>>,
}

/// Create a callback/receiver pair. The receiver errors if the task is
/// cancelled, since the callback is then dropped without being invoked.
pub fn outcome_channel<T>() -> (OutcomeSender<T>, oneshot::Receiver<Result<T, WorkError>>) {
    let (tx, rx) = oneshot::channel();
    (OutcomeSender { tx: Some(tx) }, rx)
}

impl<T: Send + 'static> OutcomeSender<T> {
    fn send(&mut self, outcome: Result<T, WorkError>) {
        if let Some(tx) = self.tx.take() {
            // Receiver may have been dropped; nothing to do then.
            let _ = tx.send(outcome);
        }
    }
}

impl<T: Send + 'static> ResultCallback<T> for OutcomeSender<T> {
    fn on_result(&mut self, value: T) {
        self.send(Ok(value));
    }

    fn on_error(&mut self, error: WorkError) {
        self.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_closure_callbacks_fire_once() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = Arc::clone(&hits);
        let mut cb = TaskCallbacks::<u32>::new().with_result(move |v| {
            hits_clone.fetch_add(v, Ordering::SeqCst);
        });

        cb.on_result(5);
        // handler already consumed
        cb.on_result(7);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_missing_handler_is_ignored() {
        let mut cb = TaskCallbacks::<u32>::new();
        cb.on_error(WorkError::msg("ignored"));
        cb.on_result(1);
    }

    #[test]
    fn test_debug_hides_closures() {
        let cb = TaskCallbacks::<u32>::new().with_result(|_| {});
        let rendered = format!("{:?}", cb);
        assert!(rendered.contains("Some(\"function\")"));
        assert!(rendered.contains("on_error: None"));
    }

    #[tokio::test]
    async fn test_outcome_channel_forwards_result() {
        let (mut tx, rx) = outcome_channel::<String>();
        tx.on_result("done".to_string());
        assert_eq!(rx.await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_outcome_channel_forwards_error() {
        let (mut tx, rx) = outcome_channel::<String>();
        tx.on_error(WorkError::msg("bad input"));
        tx.on_result("late".to_string());
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[tokio::test]
    async fn test_outcome_channel_closed_when_dropped() {
        let (tx, rx) = outcome_channel::<u8>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
