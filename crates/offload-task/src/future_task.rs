//! A [`TaskCore`] bound to a unit of work and an executor.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::callback::{BoxedCallback, ResultCallback};
use crate::cancellation::CancellationToken;
use crate::dispatcher::Dispatcher;
use crate::error::{TaskResult, WorkError};
use crate::executor::{BoxedWork, WorkExecutor};
use crate::state_machine::TaskStatus;
use crate::task::{TaskCore, TaskId};

/// Boxed unit of work producing a `T` or failing with a [`WorkError`].
pub type UnitOfWork<T> =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, WorkError>> + Send>;

/// A request that runs its unit of work once on an executor and reports the
/// outcome through a [`ResultCallback`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use offload_task::prelude::*;
///
/// # async fn example() -> Result<(), TaskError> {
/// let executor: Arc<dyn WorkExecutor> = Arc::new(SequentialExecutor::new());
/// let queue = Arc::new(DeliveryQueue::new());
///
/// let task = FutureTask::new(executor, queue.clone(), |_token| async { Ok(6 * 7) });
/// task.run(TaskCallbacks::new().with_result(|answer: u32| println!("{answer}")))?;
/// # Ok(())
/// # }
/// ```
pub struct FutureTask<T> {
    core: TaskCore<T>,
    executor: Arc<dyn WorkExecutor>,
    work: Arc<Mutex<Option<UnitOfWork<T>>>>,
}

impl<T: Send + 'static> FutureTask<T> {
    /// Create a task from an async unit of work.
    pub fn new<F, Fut>(
        executor: Arc<dyn WorkExecutor>,
        dispatcher: Arc<dyn Dispatcher>,
        work: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
    {
        let work: UnitOfWork<T> = Box::new(move |token| work(token).boxed());
        Self {
            core: TaskCore::new(dispatcher),
            executor,
            work: Arc::new(Mutex::new(Some(work))),
        }
    }

    /// Create a task from a synchronous, possibly blocking unit of work.
    ///
    /// The closure runs on tokio's blocking pool, but the executor's worker
    /// still waits for it, so it never overlaps other units of work.
    pub fn blocking<F>(
        executor: Arc<dyn WorkExecutor>,
        dispatcher: Arc<dyn Dispatcher>,
        work: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Result<T, WorkError> + Send + 'static,
    {
        Self::new(executor, dispatcher, move |token| async move {
            match tokio::task::spawn_blocking(move || work(token)).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(WorkError::from_panic(e.into_panic())),
                Err(e) => Err(WorkError::new(e)),
            }
        })
    }

    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    pub fn status(&self) -> TaskStatus {
        self.core.status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Run the task, delivering its outcome to `callback`.
    ///
    /// Returns immediately; the callback fires later on the dispatcher's
    /// delivery context. Fails with `AlreadyExecuted` / `AlreadyCancelled` on
    /// lifecycle misuse, or with the executor's error if submission is refused.
    pub fn run<C>(&self, callback: C) -> TaskResult<()>
    where
        C: ResultCallback<T>,
    {
        self.run_with(Some(Box::new(callback)))
    }

    /// Like [`run`](Self::run), for a callback that may be absent.
    ///
    /// `None` fails with `InvalidArgument` and leaves the task idle.
    pub fn run_with(&self, callback: Option<BoxedCallback<T>>) -> TaskResult<()> {
        self.core.start(callback, || {
            let wrapper = self.wrap_work();
            self.executor.submit(self.core.id(), wrapper)
        })
    }

    /// Cancel the task. Idempotent, never fails.
    ///
    /// Work that has not started never will. `may_interrupt_if_running` fires
    /// the unit of work's cancellation token; running work only stops early if
    /// it observes that token. Either way no outcome is delivered.
    pub fn cancel(&self, may_interrupt_if_running: bool) {
        self.core.cancel(may_interrupt_if_running);
    }

    /// The work is taken out of its slot only when the worker runs it, so a
    /// refused submission leaves it in place for a later `run`.
    fn wrap_work(&self) -> BoxedWork {
        let slot = Arc::clone(&self.work);
        let core = self.core.clone();

        Box::new(move |token| {
            async move {
                let work = slot.lock().take();
                let Some(work) = work else {
                    return;
                };

                let outcome = match AssertUnwindSafe(async move { work(token).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Err(err)) if err.is_interrupted() => {
                        debug!(task_id = %core.id(), "Unit of work stopped on interruption");
                        Err(err)
                    }
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let err = WorkError::from_panic(payload);
                        warn!(task_id = %core.id(), error = %err, "Unit of work panicked");
                        Err(err)
                    }
                };
                core.deliver(outcome);
            }
            .boxed()
        })
    }
}

impl<T> std::fmt::Debug for FutureTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureTask").field("core", &self.core).finish()
    }
}
