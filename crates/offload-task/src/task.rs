//! Per-instance lifecycle state that gates every delivery.
//!
//! `TaskCore` holds the lock-guarded state of one request: its status, the
//! callback, and the handle to in-flight work. Concrete task variants (see
//! [`FutureTask`](crate::future_task::FutureTask)) decide *what* gets
//! submitted; the core decides whether and when an outcome may reach the
//! callback.
//!
//! Race resolution: cancellation always wins over an outcome that has not
//! been posted to the dispatcher yet. A posted delivery is discarded if
//! `cancel_all_pending` intercepts it or if it observes the cancelled status
//! when it runs. Only a delivery that already took the callback before
//! `cancel` acquired the lock can still fire.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::callback::BoxedCallback;
use crate::dispatcher::Dispatcher;
use crate::error::{TaskError, TaskResult, WorkError};
use crate::executor::WorkHandle;
use crate::state_machine::{self, TaskStatus};

/// Unique task identifier (UUID v7 for temporal ordering).
///
/// Doubles as the owner token for dispatcher deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct TaskState<T> {
    status: TaskStatus,
    executed: bool,
    outcome_posted: bool,
    callback: Option<BoxedCallback<T>>,
    pending: Option<Box<dyn WorkHandle>>,
}

/// Lifecycle state machine for one task instance.
///
/// Cheap to clone; clones share state. All reads and writes go through one
/// per-instance mutex, so `run`, `cancel` and outcome hand-off never
/// interleave.
pub struct TaskCore<T> {
    id: TaskId,
    dispatcher: Arc<dyn Dispatcher>,
    state: Arc<Mutex<TaskState<T>>>,
}

impl<T> Clone for TaskCore<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            dispatcher: Arc::clone(&self.dispatcher),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for TaskCore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("status", &self.state.lock().status)
            .finish()
    }
}

impl<T: Send + 'static> TaskCore<T> {
    /// Create an idle task whose outcome will be delivered through `dispatcher`.
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            id: TaskId::new(),
            dispatcher,
            state: Arc::new(Mutex::new(TaskState {
                status: TaskStatus::Idle,
                executed: false,
                outcome_posted: false,
                callback: None,
                pending: None,
            })),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }

    /// Accept a run request and submit its work.
    ///
    /// Validation, submission and the Idle → Running flip happen under the
    /// instance lock. `submit` must only enqueue work, never run it inline.
    /// If `submit` fails the task stays Idle and the callback is dropped, so
    /// a later `run` may be attempted again.
    pub fn start<F>(&self, callback: Option<BoxedCallback<T>>, submit: F) -> TaskResult<()>
    where
        F: FnOnce() -> TaskResult<Box<dyn WorkHandle>>,
    {
        let mut state = self.state.lock();

        let Some(callback) = callback else {
            return Err(TaskError::invalid_argument("callback"));
        };
        state_machine::validate_run(state.status, state.executed)?;

        let handle = submit()?;

        state.callback = Some(callback);
        state.pending = Some(handle);
        state.executed = true;
        state.status = TaskStatus::Running;

        debug!(task_id = %self.id, "Task running");
        Ok(())
    }

    /// Hand the outcome of the unit of work to the task.
    ///
    /// Called by the executing worker. Dropped if the task was cancelled;
    /// otherwise exactly one delivery is posted to the dispatcher. If the
    /// dispatcher has shut down, the task ends Cancelled and its callback is
    /// dropped here without being invoked.
    pub fn deliver(&self, outcome: Result<T, WorkError>) {
        let orphaned = {
            let mut state = self.state.lock();
            state.pending = None;

            if state.status == TaskStatus::Cancelled {
                debug!(task_id = %self.id, "Task cancelled, dropping outcome");
                return;
            }
            if state.status != TaskStatus::Running || state.outcome_posted {
                debug!(
                    task_id = %self.id,
                    status = ?state.status,
                    "Ignoring unexpected outcome"
                );
                return;
            }
            state.outcome_posted = true;

            let id = self.id;
            let shared = Arc::clone(&self.state);
            let action = Box::new(move || complete_on_context(id, shared, outcome));
            if let Err(e) = self.dispatcher.post(id, action) {
                warn!(task_id = %id, error = %e, "Outcome dropped, no delivery context");
                state.status = TaskStatus::Cancelled;
                state.callback.take()
            } else {
                None
            }
        };
        // callback drop may re-enter this task, so it happens unlocked
        drop(orphaned);
    }

    /// Hand a successful value to the task
    pub fn deliver_result(&self, value: T) {
        self.deliver(Ok(value));
    }

    /// Hand a failure to the task
    pub fn deliver_error(&self, error: WorkError) {
        self.deliver(Err(error));
    }

    /// Cancel the task. Idempotent; a no-op once the task is terminal.
    ///
    /// Marks the task cancelled before anything else, so outcomes arriving
    /// later are dropped. Then discards deliveries already posted, cancels the
    /// in-flight work (interrupting it if `may_interrupt` and it cooperates),
    /// and finally clears the callback on the delivery context, or right away
    /// if that context has shut down.
    pub fn cancel(&self, may_interrupt: bool) {
        let orphaned = {
            let mut state = self.state.lock();

            if state_machine::is_terminal(state.status) {
                debug!(
                    task_id = %self.id,
                    status = ?state.status,
                    "Cancel ignored, task already terminal"
                );
                return;
            }
            state.status = TaskStatus::Cancelled;

            let discarded = self.dispatcher.cancel_all_pending(self.id);

            if let Some(handle) = state.pending.take() {
                handle.cancel(may_interrupt);
            }
            debug!(task_id = %self.id, discarded, may_interrupt, "Task cancelled");

            if state.callback.is_none() {
                return;
            }
            let shared = Arc::clone(&self.state);
            let clear = Box::new(move || {
                let callback = shared.lock().callback.take();
                drop(callback);
            });
            match self.dispatcher.post(self.id, clear) {
                Ok(()) => None,
                Err(_) => state.callback.take(),
            }
        };
        drop(orphaned);
    }
}

/// Runs on the delivery context: take the callback under the lock, invoke it outside.
fn complete_on_context<T: Send + 'static>(
    id: TaskId,
    state: Arc<Mutex<TaskState<T>>>,
    outcome: Result<T, WorkError>,
) {
    let callback = {
        let mut state = state.lock();
        if state_machine::validate_transition(state.status, TaskStatus::Completed).is_err() {
            debug!(task_id = %id, status = ?state.status, "Delivery suppressed");
            return;
        }
        state.status = TaskStatus::Completed;
        state.callback.take()
    };

    let Some(mut callback) = callback else {
        return;
    };
    match outcome {
        Ok(value) => callback.on_result(value),
        Err(error) => callback.on_error(error),
    }
    debug!(task_id = %id, "Task completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{TaskCallbacks, outcome_channel};
    use crate::dispatcher::DeliveryQueue;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot::error::TryRecvError;

    #[derive(Default)]
    struct FakeHandle {
        cancelled: Arc<AtomicBool>,
        interrupted: Arc<AtomicBool>,
    }

    impl WorkHandle for FakeHandle {
        fn cancel(&self, may_interrupt: bool) {
            self.cancelled.store(true, Ordering::SeqCst);
            if may_interrupt {
                self.interrupted.store(true, Ordering::SeqCst);
            }
        }
        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        queue: Arc<DeliveryQueue>,
        core: TaskCore<u32>,
        results: Arc<Mutex<Vec<u32>>>,
        errors: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let queue = Arc::new(DeliveryQueue::new());
            let core = TaskCore::new(queue.clone() as Arc<dyn Dispatcher>);
            Self {
                queue,
                core,
                results: Arc::new(Mutex::new(Vec::new())),
                errors: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn callback(&self) -> Option<BoxedCallback<u32>> {
            let results = Arc::clone(&self.results);
            let errors = Arc::clone(&self.errors);
            Some(Box::new(
                TaskCallbacks::new()
                    .with_result(move |v| results.lock().push(v))
                    .with_error(move |_| {
                        errors.fetch_add(1, Ordering::SeqCst);
                    }),
            ))
        }

        fn start(&self) -> (Arc<AtomicBool>, Arc<AtomicBool>) {
            let handle = FakeHandle::default();
            let flags = (Arc::clone(&handle.cancelled), Arc::clone(&handle.interrupted));
            self.core
                .start(self.callback(), || Ok(Box::new(handle) as Box<dyn WorkHandle>))
                .unwrap();
            flags
        }
    }

    #[test]
    fn test_start_moves_to_running() {
        let f = Fixture::new();
        assert_eq!(f.core.status(), TaskStatus::Idle);
        f.start();
        assert_eq!(f.core.status(), TaskStatus::Running);
    }

    #[test]
    fn test_missing_callback_leaves_task_idle() {
        let f = Fixture::new();
        let submitted = AtomicBool::new(false);
        let err = f
            .core
            .start(None, || {
                submitted.store(true, Ordering::SeqCst);
                Ok(Box::new(FakeHandle::default()) as Box<dyn WorkHandle>)
            })
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
        assert!(!submitted.load(Ordering::SeqCst));
        assert_eq!(f.core.status(), TaskStatus::Idle);
        f.start();
    }

    #[test]
    fn test_failed_submit_leaves_task_idle() {
        let f = Fixture::new();
        let err = f
            .core
            .start(f.callback(), || Err(TaskError::ExecutorShutdown))
            .unwrap_err();
        assert_eq!(err, TaskError::ExecutorShutdown);
        assert_eq!(f.core.status(), TaskStatus::Idle);
        f.start();
    }

    #[test]
    fn test_second_start_rejected_without_submitting() {
        let f = Fixture::new();
        f.start();
        let err = f
            .core
            .start(f.callback(), || panic!("must not submit twice"))
            .unwrap_err();
        assert_eq!(err, TaskError::AlreadyExecuted);
    }

    #[test]
    fn test_result_delivered_once_on_drain() {
        let f = Fixture::new();
        f.start();
        f.core.deliver_result(7);
        // nothing reaches the callback until the delivery context drains
        assert!(f.results.lock().is_empty());
        assert_eq!(f.queue.pending_for(f.core.id()), 1);

        f.core.deliver_result(8);
        assert_eq!(f.queue.pending_for(f.core.id()), 1);

        f.queue.drain();
        assert_eq!(*f.results.lock(), vec![7]);
        assert_eq!(f.core.status(), TaskStatus::Completed);
    }

    #[test]
    fn test_error_delivered() {
        let f = Fixture::new();
        f.start();
        f.core.deliver_error(WorkError::msg("nope"));
        f.queue.drain();
        assert_eq!(f.errors.load(Ordering::SeqCst), 1);
        assert!(f.results.lock().is_empty());
    }

    #[test]
    fn test_cancel_intercepts_posted_delivery() {
        let f = Fixture::new();
        let (handle_cancelled, interrupted) = f.start();
        f.core.deliver_result(1);

        f.core.cancel(false);
        assert!(f.core.is_cancelled());
        // the result delivery is gone; only the clear action remains
        assert_eq!(f.queue.pending_for(f.core.id()), 1);
        // outcome already arrived, so the handle was cleared before cancel
        assert!(!handle_cancelled.load(Ordering::SeqCst));
        assert!(!interrupted.load(Ordering::SeqCst));

        f.queue.drain();
        assert!(f.results.lock().is_empty());
        assert_eq!(f.errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_while_running_forwards_to_handle() {
        let f = Fixture::new();
        let (handle_cancelled, interrupted) = f.start();

        f.core.cancel(true);
        assert!(handle_cancelled.load(Ordering::SeqCst));
        assert!(interrupted.load(Ordering::SeqCst));

        // late outcome from the worker is dropped
        f.core.deliver_result(3);
        assert_eq!(f.queue.pending_for(f.core.id()), 1);
        f.queue.drain();
        assert!(f.results.lock().is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let f = Fixture::new();
        f.start();
        f.core.cancel(false);
        f.core.cancel(true);
        assert_eq!(f.queue.pending_for(f.core.id()), 1);
        assert_eq!(f.core.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancel_before_start_then_run_fails() {
        let f = Fixture::new();
        f.core.cancel(false);
        assert_eq!(f.queue.pending_count(), 0);
        let err = f
            .core
            .start(f.callback(), || panic!("must not submit after cancel"))
            .unwrap_err();
        assert_eq!(err, TaskError::AlreadyCancelled);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let f = Fixture::new();
        f.start();
        f.core.deliver_result(5);
        f.queue.drain();

        f.core.cancel(false);
        assert_eq!(f.core.status(), TaskStatus::Completed);
        assert_eq!(f.queue.pending_count(), 0);
    }

    #[test]
    fn test_callback_may_cancel_its_own_task() {
        let queue = Arc::new(DeliveryQueue::new());
        let core = TaskCore::<u32>::new(queue.clone() as Arc<dyn Dispatcher>);
        let inner = core.clone();
        core.start(
            Some(Box::new(TaskCallbacks::new().with_result(move |_| inner.cancel(false)))),
            || Ok(Box::new(FakeHandle::default()) as Box<dyn WorkHandle>),
        )
        .unwrap();

        core.deliver_result(1);
        queue.drain();
        assert_eq!(core.status(), TaskStatus::Completed);
    }

    fn start_with_channel(
        core: &TaskCore<u32>,
    ) -> tokio::sync::oneshot::Receiver<Result<u32, WorkError>> {
        let (tx, rx) = outcome_channel();
        core.start(Some(Box::new(tx)), || {
            Ok(Box::new(FakeHandle::default()) as Box<dyn WorkHandle>)
        })
        .unwrap();
        rx
    }

    #[test]
    fn test_outcome_after_dispatcher_closed_drops_callback() {
        let f = Fixture::new();
        let mut rx = start_with_channel(&f.core);
        f.queue.close();

        f.core.deliver_result(4);

        assert_eq!(f.core.status(), TaskStatus::Cancelled);
        assert_eq!(f.queue.pending_count(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn test_cancel_after_dispatcher_closed_drops_callback() {
        let f = Fixture::new();
        let mut rx = start_with_channel(&f.core);
        f.queue.close();

        f.core.cancel(false);

        assert!(f.core.is_cancelled());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
