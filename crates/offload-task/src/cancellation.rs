//! Cancellation token handed to every unit of work.
//!
//! Interruption is cooperative: the executor never preempts a running unit of
//! work, it only flips this token. Work that wants to stop early polls
//! [`CancellationToken::is_cancelled`], calls [`CancellationToken::check`], or
//! races its own futures against [`CancellationToken::cancelled`].

use tokio::sync::watch;

use crate::error::WorkError;

/// Cooperative interruption signal shared between a work handle and the unit of work.
///
/// Backed by a `tokio::sync::watch` channel. Clones share state.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Request interruption. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(WorkError::Interrupted)` once cancellation has been requested.
    ///
    /// Meant for `?` at checkpoints inside a unit of work.
    pub fn check(&self) -> Result<(), WorkError> {
        if self.is_cancelled() {
            Err(WorkError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested. Returns immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for checks the current value first; the sender lives in self so
        // the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
