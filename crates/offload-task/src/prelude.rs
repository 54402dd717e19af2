//! Prelude module for convenient imports.
//!
//! ```rust,no_run
//! use offload_task::prelude::*;
//! ```

pub use crate::callback::{BoxedCallback, ResultCallback, TaskCallbacks, outcome_channel};
pub use crate::cancellation::CancellationToken;
pub use crate::config::{DispatcherConfig, ExecutorConfig, RuntimeConfig};
pub use crate::dispatcher::{DeliveryQueue, Dispatcher};
pub use crate::error::{TaskError, TaskResult, WorkError};
pub use crate::executor::{WorkExecutor, WorkHandle};
pub use crate::future_task::FutureTask;
pub use crate::runtime::TaskRuntime;
pub use crate::sequential_executor::SequentialExecutor;
pub use crate::state_machine::TaskStatus;
pub use crate::task::TaskId;
