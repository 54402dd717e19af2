//! Single-worker FIFO executor — default in-process execution on one tokio task.
//!
//! Every submitted unit of work is awaited to completion before the next one
//! starts, so work from all tasks sharing an executor is strictly serialized
//! in submission order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::ExecutorConfig;
use crate::error::{TaskError, WorkError};
use crate::executor::{BoxedWork, ExecutorStats, WorkExecutor, WorkHandle};
use crate::task::TaskId;

struct Job {
    task_id: TaskId,
    abandoned: Arc<AtomicBool>,
    token: CancellationToken,
    work: BoxedWork,
}

struct SequentialHandle {
    abandoned: Arc<AtomicBool>,
    token: CancellationToken,
}

impl WorkHandle for SequentialHandle {
    fn cancel(&self, may_interrupt: bool) {
        self.abandoned.store(true, Ordering::Release);
        if may_interrupt {
            self.token.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    started: AtomicU64,
    finished: AtomicU64,
    skipped: AtomicU64,
    queued: AtomicUsize,
}

/// In-process executor with exactly one worker.
///
/// Must be constructed inside a tokio runtime; the worker is a spawned task.
/// Dropping the executor without calling `shutdown` closes its queue and lets
/// the worker finish queued work in the background.
pub struct SequentialExecutor {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    config: ExecutorConfig,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(rx, Arc::clone(&counters)));

        info!(max_queued = config.max_queued, "Sequential executor started");

        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters,
            config,
        }
    }
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, counters: Arc<Counters>) {
    while let Some(job) = rx.recv().await {
        counters.queued.fetch_sub(1, Ordering::AcqRel);

        if job.abandoned.load(Ordering::Acquire) {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(task_id = %job.task_id, "Skipping cancelled job before start");
            continue;
        }

        counters.started.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %job.task_id, "Starting unit of work");

        let Job {
            task_id,
            token,
            work,
            ..
        } = job;
        if let Err(payload) = AssertUnwindSafe(async move { work(token).await })
            .catch_unwind()
            .await
        {
            let reason = WorkError::from_panic(payload);
            warn!(task_id = %task_id, error = %reason, "Job panicked on worker");
        }

        counters.finished.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %task_id, "Unit of work finished");
    }

    info!("Sequential executor worker stopped");
}

#[async_trait]
impl WorkExecutor for SequentialExecutor {
    fn submit(&self, task_id: TaskId, work: BoxedWork) -> Result<Box<dyn WorkHandle>, TaskError> {
        // Holding the sender lock serializes submitters, so channel order is
        // submission order and the queue limit check cannot be raced.
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            warn!(task_id = %task_id, "Rejected submission: executor shut down");
            return Err(TaskError::ExecutorShutdown);
        };

        let limit = self.config.max_queued;
        if limit > 0 && self.counters.queued.load(Ordering::Acquire) >= limit {
            warn!(task_id = %task_id, limit, "Rejected submission: queue full");
            return Err(TaskError::QueueFull(limit));
        }

        let abandoned = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let job = Job {
            task_id,
            abandoned: Arc::clone(&abandoned),
            token: token.clone(),
            work,
        };

        self.counters.queued.fetch_add(1, Ordering::AcqRel);
        if tx.send(job).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(TaskError::ExecutorShutdown);
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %task_id, "Submitted unit of work");

        Ok(Box::new(SequentialHandle { abandoned, token }))
    }

    async fn shutdown(&self) {
        // Dropping the sender closes the channel; the worker drains what is
        // already queued and then exits.
        let sender = self.sender.lock().take();
        drop(sender);

        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };

        info!(
            queued = self.counters.queued.load(Ordering::Acquire),
            "Shutting down sequential executor"
        );
        match tokio::time::timeout(self.config.shutdown_timeout, worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Executor worker terminated abnormally"),
            Err(_) => warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Executor worker did not drain within timeout"
            ),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            started: self.counters.started.load(Ordering::Relaxed),
            finished: self.counters.finished.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Acquire),
        }
    }
}
