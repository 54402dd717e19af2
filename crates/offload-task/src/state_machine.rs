//! Task state machine enforcement.
//!
//! Validates transitions of a single task instance:
//!
//! ```text
//! Idle    -> Running | Cancelled
//! Running -> Completed | Cancelled
//! Completed/Cancelled -> ERROR (terminal, no further transitions)
//! ```

use crate::error::TaskError;

/// Lifecycle status of one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Constructed, `run` not yet accepted
    Idle,
    /// Work submitted, outcome not yet delivered
    Running,
    /// Outcome handed to the callback
    Completed,
    /// Outcome suppressed
    Cancelled,
}

/// Validate a task status transition.
///
/// Returns `Ok(())` if the transition is valid, or `Err(TaskError)` if not.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<(), TaskError> {
    match from {
        TaskStatus::Idle => match to {
            TaskStatus::Running | TaskStatus::Cancelled => Ok(()),
            TaskStatus::Idle | TaskStatus::Completed => Err(TaskError::InvalidTransition {
                current: from,
                requested: to,
            }),
        },
        TaskStatus::Running => match to {
            TaskStatus::Completed | TaskStatus::Cancelled => Ok(()),
            TaskStatus::Idle | TaskStatus::Running => Err(TaskError::InvalidTransition {
                current: from,
                requested: to,
            }),
        },
        TaskStatus::Completed | TaskStatus::Cancelled => Err(TaskError::TerminalState(from)),
    }
}

/// Check whether `run` may be accepted.
///
/// Misuse is reported in a fixed order: an already-executed task reports
/// `AlreadyExecuted` even if it was cancelled afterwards.
pub fn validate_run(status: TaskStatus, executed: bool) -> Result<(), TaskError> {
    if executed {
        return Err(TaskError::AlreadyExecuted);
    }
    if status == TaskStatus::Cancelled {
        return Err(TaskError::AlreadyCancelled);
    }
    validate_transition(status, TaskStatus::Running)
}

/// Returns `true` if the status is a terminal state (no further transitions allowed).
pub fn is_terminal(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Completed | TaskStatus::Cancelled)
}
