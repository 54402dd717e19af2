//! # Offload Task
//!
//! **Run a unit of work off the caller's thread, exactly once, and deliver its
//! outcome to a callback on a designated context, with cancellation.**
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offload_task::prelude::*;
//!
//! # async fn example() -> Result<(), TaskError> {
//! let runtime = TaskRuntime::with_defaults();
//!
//! let task = runtime.task(|token: CancellationToken| async move {
//!     token.check()?;
//!     Ok::<_, WorkError>(2 + 2)
//! });
//!
//! task.run(
//!     TaskCallbacks::new()
//!         .with_result(|sum| println!("sum = {sum}"))
//!         .with_error(|err| eprintln!("failed: {err}")),
//! )?;
//!
//! // Changed our mind: no callback will fire after this.
//! task.cancel(true);
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`TaskCore`**: per-instance state machine (`Idle → Running →
//!   Completed | Cancelled`) gating every delivery under one lock
//! - **`FutureTask`**: binds a unit of work to a `TaskCore` and an executor
//! - **`WorkExecutor` / `SequentialExecutor`**: single FIFO worker with
//!   explicit shutdown
//! - **`Dispatcher` / `DeliveryQueue`**: runs deliveries on one logical
//!   context and can discard a task's pending deliveries
//! - **`TaskRuntime`**: composition root owning executor and delivery loop

pub mod callback;
pub mod cancellation;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod future_task;
pub mod prelude;
pub mod runtime;
pub mod sequential_executor;
pub mod state_machine;
pub mod task;

// Re-exports for convenience
pub use callback::{BoxedCallback, OutcomeSender, ResultCallback, TaskCallbacks, outcome_channel};
pub use cancellation::CancellationToken;
pub use config::{DispatcherConfig, ExecutorConfig, RuntimeConfig};
pub use dispatcher::{DeliveryAction, DeliveryLoop, DeliveryQueue, Dispatcher};
pub use error::{TaskError, TaskResult, WorkError};
pub use executor::{BoxedWork, ExecutorStats, WorkExecutor, WorkHandle};
pub use future_task::{FutureTask, UnitOfWork};
pub use runtime::TaskRuntime;
pub use sequential_executor::SequentialExecutor;
pub use state_machine::{TaskStatus, is_terminal, validate_transition};
pub use task::{TaskCore, TaskId};
