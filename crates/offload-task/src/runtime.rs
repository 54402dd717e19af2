//! Task Runtime — composition root owning the executor and the delivery loop.
//!
//! `TaskRuntime` replaces a process-wide worker with an explicitly constructed
//! resource: build one at startup, hand out tasks bound to it, and call
//! [`TaskRuntime::shutdown`] on the way out.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::cancellation::CancellationToken;
use crate::config::RuntimeConfig;
use crate::dispatcher::{DeliveryLoop, DeliveryQueue, Dispatcher};
use crate::error::WorkError;
use crate::executor::WorkExecutor;
use crate::future_task::FutureTask;
use crate::sequential_executor::SequentialExecutor;

/// Owns one executor and one dispatcher and builds tasks bound to both.
pub struct TaskRuntime {
    /// Where units of work run
    executor: Arc<dyn WorkExecutor>,
    /// Where outcomes are delivered
    dispatcher: Arc<dyn Dispatcher>,
    /// Drain loop, when this runtime started its own
    delivery_loop: Option<DeliveryLoop>,
}

impl TaskRuntime {
    /// Start a sequential executor and a delivery loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RuntimeConfig) -> Self {
        let executor = Arc::new(SequentialExecutor::with_config(config.executor));
        let queue = Arc::new(DeliveryQueue::new());
        let delivery_loop = queue.spawn_loop(&config.dispatcher);

        info!("Task runtime started");

        Self {
            executor,
            dispatcher: queue,
            delivery_loop: Some(delivery_loop),
        }
    }

    /// Start with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RuntimeConfig::default())
    }

    /// Start with configuration read from the environment.
    pub fn from_env() -> Self {
        Self::new(RuntimeConfig::from_env())
    }

    /// Assemble a runtime from existing parts.
    ///
    /// The caller stays responsible for draining `dispatcher`; `shutdown` only
    /// shuts down the executor.
    pub fn with_parts(executor: Arc<dyn WorkExecutor>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            executor,
            dispatcher,
            delivery_loop: None,
        }
    }

    pub fn executor(&self) -> &dyn WorkExecutor {
        self.executor.as_ref()
    }

    pub fn dispatcher(&self) -> &dyn Dispatcher {
        self.dispatcher.as_ref()
    }

    /// Build a task from an async unit of work.
    pub fn task<T, F, Fut>(&self, work: F) -> FutureTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
    {
        FutureTask::new(Arc::clone(&self.executor), Arc::clone(&self.dispatcher), work)
    }

    /// Build a task from a synchronous, possibly blocking unit of work.
    pub fn blocking_task<T, F>(&self, work: F) -> FutureTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, WorkError> + Send + 'static,
    {
        FutureTask::blocking(Arc::clone(&self.executor), Arc::clone(&self.dispatcher), work)
    }

    /// Shut down the executor, letting queued work finish, then stop the
    /// delivery loop after a final drain so those outcomes still arrive.
    ///
    /// Work still running when the executor's shutdown timeout elapses keeps
    /// running detached. Its outcome has nowhere to go, so its task ends
    /// Cancelled and the callback is dropped without being invoked.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        if let Some(delivery_loop) = &self.delivery_loop {
            delivery_loop.shutdown().await;
        }
        info!(stats = ?self.executor.stats(), "Task runtime stopped");
    }
}
