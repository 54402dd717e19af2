//! Delivers task outcomes on a single logical execution context.
//!
//! Tasks never invoke callbacks from the worker that ran their unit of work.
//! Instead they [`Dispatcher::post`] a delivery action tagged with their
//! [`TaskId`]; the dispatcher runs actions later, in FIFO order, on whatever
//! context drains it. Cancelling a task calls
//! [`Dispatcher::cancel_all_pending`] to discard deliveries not yet run.
//!
//! [`DeliveryQueue`] is the default implementation: a mutex-guarded queue
//! drained either manually ([`DeliveryQueue::drain`]) or by a background
//! tokio task ([`DeliveryQueue::spawn_loop`]). Once closed, it refuses new
//! actions so callers can release what they would have delivered.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::DispatcherConfig;
use crate::error::{TaskError, TaskResult, WorkError};
use crate::task::TaskId;

/// A deferred delivery, run exactly once on the delivery context (unless discarded).
pub type DeliveryAction = Box<dyn FnOnce() + Send + 'static>;

/// Schedules deliveries onto a single logical execution context.
pub trait Dispatcher: Send + Sync {
    /// Enqueue `action` to run later on the delivery context.
    ///
    /// Actions posted under the same owner run in the order posted. Fails
    /// with `DispatcherClosed` once the context has shut down; the action is
    /// dropped without running.
    fn post(&self, owner: TaskId, action: DeliveryAction) -> TaskResult<()>;

    /// Discard every not-yet-run action posted under `owner`.
    ///
    /// Returns the number of actions discarded. Once this returns, none of
    /// those actions will run.
    fn cancel_all_pending(&self, owner: TaskId) -> usize;
}

struct PendingDelivery {
    owner: TaskId,
    action: DeliveryAction,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingDelivery>,
    closed: bool,
}

/// FIFO delivery queue with a single consumer.
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    draining: AtomicBool,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            draining: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Run queued actions on the calling thread until the queue is empty.
    ///
    /// The calling thread becomes the delivery context for the duration of
    /// the call. Only one drain runs at a time: a drain started while another
    /// is in progress, including one called from inside an action, returns 0
    /// without running anything.
    ///
    /// Actions posted while draining (e.g. by a callback cancelling another
    /// task) are run in the same pass. Each action runs outside the queue
    /// lock, and a panicking action is logged and does not stop the drain.
    /// Returns the number of actions run.
    pub fn drain(&self) -> usize {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress");
            return 0;
        }

        let mut ran = 0;
        loop {
            let next = self.state.lock().pending.pop_front();
            let Some(delivery) = next else {
                break;
            };
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(delivery.action)) {
                let reason = WorkError::from_panic(payload);
                warn!(task_id = %delivery.owner, error = %reason, "Delivery action panicked");
            }
            ran += 1;
        }
        self.draining.store(false, Ordering::Release);

        // A post that lost the race with the flag reset must not wait for
        // the next unrelated notification.
        if self.pending_count() > 0 {
            self.notify.notify_one();
        }
        ran
    }

    /// Number of actions waiting to run
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of actions waiting to run for one owner
    pub fn pending_for(&self, owner: TaskId) -> usize {
        self.state
            .lock()
            .pending
            .iter()
            .filter(|d| d.owner == owner)
            .count()
    }

    /// Refuse all further posts. Actions already queued can still be drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Start a tokio task that drains the queue whenever an action is posted.
    ///
    /// Must be called from within a tokio runtime. Callbacks run on that task,
    /// so they should not block. When the loop stops, through
    /// [`DeliveryLoop::shutdown`] or by dropping the handle, it closes the
    /// queue and runs a final drain.
    pub fn spawn_loop(self: &Arc<Self>, config: &DispatcherConfig) -> DeliveryLoop {
        let queue = Arc::clone(self);
        let stop = CancellationToken::new();
        let stop_signal = stop.clone();

        let handle = tokio::spawn(async move {
            info!("Delivery loop started");
            loop {
                queue.drain();
                tokio::select! {
                    _ = queue.notify.notified() => {}
                    _ = stop_signal.cancelled() => break,
                }
            }
            queue.close();
            let ran = queue.drain();
            info!(final_drain = ran, "Delivery loop stopped");
        });

        DeliveryLoop {
            stop,
            handle: Mutex::new(Some(handle)),
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeliveryQueue")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Dispatcher for DeliveryQueue {
    fn post(&self, owner: TaskId, action: DeliveryAction) -> TaskResult<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                debug!(task_id = %owner, "Delivery refused, queue closed");
                return Err(TaskError::DispatcherClosed);
            }
            state.pending.push_back(PendingDelivery { owner, action });
        }
        self.notify.notify_one();
        Ok(())
    }

    fn cancel_all_pending(&self, owner: TaskId) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|d| d.owner != owner);
        let removed = before - state.pending.len();
        if removed > 0 {
            debug!(task_id = %owner, removed, "Discarded pending deliveries");
        }
        removed
    }
}

/// Handle to a running delivery loop.
///
/// Dropping the handle stops the loop the same way `shutdown` does, without
/// waiting for it.
#[derive(Debug)]
pub struct DeliveryLoop {
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl DeliveryLoop {
    /// Stop the loop after a final drain and wait for it to exit.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        match tokio::time::timeout(self.shutdown_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Delivery loop terminated abnormally"),
            Err(_) => warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Delivery loop did not stop within timeout"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DeliveryLoop {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recorder() -> (Log, impl Fn(&'static str) -> DeliveryAction) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |label: &'static str| -> DeliveryAction {
            let log = Arc::clone(&log_clone);
            Box::new(move || log.lock().push(label))
        };
        (log, make)
    }

    fn counting_action(counter: &Arc<AtomicUsize>) -> DeliveryAction {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_drain_runs_in_fifo_order() {
        let queue = DeliveryQueue::new();
        let (log, action) = recorder();
        let a = TaskId::new();
        let b = TaskId::new();

        queue.post(a, action("a1")).unwrap();
        queue.post(b, action("b1")).unwrap();
        queue.post(a, action("a2")).unwrap();
        assert_eq!(queue.pending_count(), 3);

        assert_eq!(queue.drain(), 3);
        assert_eq!(*log.lock(), vec!["a1", "b1", "a2"]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_cancel_all_pending_only_removes_owner() {
        let queue = DeliveryQueue::new();
        let (log, action) = recorder();
        let a = TaskId::new();
        let b = TaskId::new();

        queue.post(a, action("a1")).unwrap();
        queue.post(b, action("b1")).unwrap();
        queue.post(a, action("a2")).unwrap();

        assert_eq!(queue.pending_for(a), 2);
        assert_eq!(queue.cancel_all_pending(a), 2);
        assert_eq!(queue.cancel_all_pending(a), 0);
        assert_eq!(queue.pending_for(a), 0);

        queue.drain();
        assert_eq!(*log.lock(), vec!["b1"]);
    }

    #[test]
    fn test_actions_posted_during_drain_run_in_same_pass() {
        let queue = Arc::new(DeliveryQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let owner = TaskId::new();

        let inner_queue = Arc::clone(&queue);
        let inner_action = counting_action(&counter);
        let outer: DeliveryAction =
            Box::new(move || inner_queue.post(owner, inner_action).unwrap());
        queue.post(owner, outer).unwrap();

        assert_eq!(queue.drain(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_drain_is_refused() {
        let queue = Arc::new(DeliveryQueue::new());
        let nested_ran = Arc::new(AtomicUsize::new(usize::MAX));
        let counter = Arc::new(AtomicUsize::new(0));
        let owner = TaskId::new();

        let inner_queue = Arc::clone(&queue);
        let inner_ran = Arc::clone(&nested_ran);
        let nested: DeliveryAction =
            Box::new(move || inner_ran.store(inner_queue.drain(), Ordering::SeqCst));
        queue.post(owner, nested).unwrap();
        queue.post(owner, counting_action(&counter)).unwrap();

        // the second action still runs, once, in the outer pass
        assert_eq!(queue.drain(), 2);
        assert_eq!(nested_ran.load(Ordering::SeqCst), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // the guard is released afterwards
        queue.post(owner, counting_action(&counter)).unwrap();
        assert_eq!(queue.drain(), 1);
    }

    #[test]
    fn test_panicking_action_does_not_stop_drain() {
        let queue = DeliveryQueue::new();
        let (log, action) = recorder();
        let owner = TaskId::new();

        queue.post(owner, Box::new(|| panic!("callback exploded"))).unwrap();
        queue.post(owner, action("after")).unwrap();

        assert_eq!(queue.drain(), 2);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn test_closed_queue_refuses_posts_but_drains_backlog() {
        let queue = DeliveryQueue::new();
        let (log, action) = recorder();
        let owner = TaskId::new();

        queue.post(owner, action("before")).unwrap();
        queue.close();
        assert!(queue.is_closed());

        let refused = queue.post(owner, action("after"));
        assert_eq!(refused, Err(TaskError::DispatcherClosed));

        assert_eq!(queue.drain(), 1);
        assert_eq!(*log.lock(), vec!["before"]);
    }

    #[tokio::test]
    async fn test_loop_delivers_and_shuts_down() {
        let queue = Arc::new(DeliveryQueue::new());
        let delivery_loop = queue.spawn_loop(&DispatcherConfig::default());
        let (tx, rx) = tokio::sync::oneshot::channel();

        let action: DeliveryAction = Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        });
        queue.post(TaskId::new(), action).unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("delivery should run")
            .unwrap();

        assert!(delivery_loop.is_running());
        delivery_loop.shutdown().await;
        assert!(!delivery_loop.is_running());
        assert!(queue.is_closed());
        // second shutdown is a no-op
        delivery_loop.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_performs_final_drain() {
        let queue = Arc::new(DeliveryQueue::new());
        let delivery_loop = queue.spawn_loop(&DispatcherConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            queue.post(TaskId::new(), counting_action(&counter)).unwrap();
        }
        delivery_loop.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_loop_handle_stops_loop() {
        let queue = Arc::new(DeliveryQueue::new());
        let delivery_loop = queue.spawn_loop(&DispatcherConfig::default());
        assert_eq!(Arc::strong_count(&queue), 2);

        drop(delivery_loop);

        tokio::time::timeout(Duration::from_secs(1), async {
            while Arc::strong_count(&queue) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop task should release the queue");
        assert!(queue.is_closed());
    }
}
