//! Cross-thread execution bridge.
//!
//! A [`Dispatcher`] is bound to the thread that created it (the designated
//! thread). Any thread may submit work; only the designated thread runs it,
//! in FIFO order, when it drains the queue.
//!
//! `send` from a foreign thread blocks until the designated thread drains.
//! That is only safe while the designated thread is guaranteed to drain in
//! bounded time, and never from a thread the designated thread is itself
//! waiting on. This is a caller contract, not something the dispatcher can
//! detect; native callback entry points therefore only ever `post`.

mod work;

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{BridgeError, Result};
use work::{Outcome, Signal, WorkItem};

const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// Host-level reporter for panics raised by drained work items.
pub type PanicHook = Arc<dyn Fn(&str) + Send + Sync>;

thread_local! {
    static CURRENT: RefCell<Option<Dispatcher>> = const { RefCell::new(None) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

struct QueueState {
    items: Vec<WorkItem>,
    closed: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    pending: AtomicUsize,
    owner: ThreadId,
    wake: Notify,
    drain_interval: Duration,
    panic_hook: Mutex<Option<PanicHook>>,
}

/// Handle to the designated thread's work queue.
///
/// Clones are *linked* dispatchers: same queue, same pending counter, same
/// thread identity.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Bind a new dispatcher to the calling thread and install it as that
    /// thread's current dispatcher.
    pub fn new() -> Self {
        Self::with_drain_interval(DEFAULT_DRAIN_INTERVAL)
    }

    pub fn with_drain_interval(drain_interval: Duration) -> Self {
        let dispatcher = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    items: Vec::new(),
                    closed: false,
                }),
                pending: AtomicUsize::new(0),
                owner: thread::current().id(),
                wake: Notify::new(),
                drain_interval,
                panic_hook: Mutex::new(None),
            }),
        };
        CURRENT.with(|current| {
            if current.borrow_mut().replace(dispatcher.linked()).is_some() {
                tracing::debug!("replacing this thread's current dispatcher");
            }
        });
        dispatcher
    }

    /// The dispatcher installed on the calling thread, if any.
    pub fn current() -> Option<Dispatcher> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// A dispatcher sharing this one's queue, skipping the thread hookup.
    pub fn linked(&self) -> Dispatcher {
        self.clone()
    }

    pub fn same_queue(&self, other: &Dispatcher) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn designated_thread(&self) -> ThreadId {
        self.shared.owner
    }

    pub fn is_designated_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Report panics from drained work items to the host as well as to
    /// `tracing`. A panic inside the hook is logged and does not stop the drain.
    pub fn set_panic_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.panic_hook.lock() = Some(Arc::new(hook));
    }

    /// Enqueue `work` and return immediately. FIFO relative to other submissions.
    ///
    /// Work posted after [`shutdown`](Self::shutdown) is dropped.
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.enqueue(WorkItem::new(Box::new(work), None)) {
            tracing::debug!("dispatcher shut down, dropping posted work");
        }
    }

    /// Run `work` on the designated thread and return its result.
    ///
    /// Runs inline when called on the designated thread. From any other
    /// thread, blocks until a drain has executed it. See the module docs for
    /// the liveness precondition.
    pub fn send<F, R>(&self, work: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.send_inner(work, None)
    }

    /// Like [`send`](Self::send), but gives up with `Timeout` after `timeout`.
    /// The item stays queued and still runs on a later drain.
    pub fn send_timeout<F, R>(&self, work: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.send_inner(work, Some(timeout))
    }

    fn send_inner<F, R>(&self, work: F, timeout: Option<Duration>) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_designated_thread() {
            return Ok(work());
        }

        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let signal = Arc::new(Signal::new());
        let job = Box::new(move || {
            let value = work();
            *out.lock() = Some(value);
        });

        if !self.enqueue(WorkItem::new(job, Some(Arc::clone(&signal)))) {
            return Err(BridgeError::ContextDisposed);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        match signal.wait(deadline) {
            None => Err(BridgeError::Timeout),
            Some(Outcome::Done) => slot.lock().take().ok_or(BridgeError::ContextDisposed),
            Some(Outcome::Panicked(msg)) => Err(BridgeError::CallbackPanicked(msg)),
            Some(Outcome::Dropped) => Err(BridgeError::ContextDisposed),
        }
    }

    fn enqueue(&self, item: WorkItem) -> bool {
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return false;
            }
            queue.items.push(item);
        }
        self.shared.wake.notify_one();
        true
    }

    /// Run everything queued right now, in order. Designated thread only.
    ///
    /// The queue is swapped out under the lock and run after releasing it, so
    /// work posted while draining waits for the next tick. A panicking item
    /// is reported and the batch continues. A drain issued from inside a work
    /// item is refused (returns 0) to keep FIFO order.
    pub fn drain(&self) -> Result<usize> {
        if !self.is_designated_thread() {
            return Err(BridgeError::WrongThread);
        }
        if DRAINING.with(Cell::get) {
            tracing::warn!("re-entrant drain from inside a work item refused");
            return Ok(0);
        }

        let batch = std::mem::take(&mut self.shared.queue.lock().items);
        if batch.is_empty() {
            return Ok(0);
        }

        let _draining = DrainScope::enter();
        let count = batch.len();
        for item in batch {
            if let Err(msg) = item.run() {
                tracing::error!("work item panicked on the designated thread: {msg}");
                let hook = self.shared.panic_hook.lock().clone();
                if let Some(hook) = hook {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(&msg))) {
                        tracing::error!("panic hook panicked: {}", work::panic_message(&*payload));
                    }
                }
            }
        }
        Ok(count)
    }

    /// Tick [`drain`](Self::drain) until the queue is empty and no operation
    /// is pending, or until `timeout` elapses. Returns whether it fully drained.
    pub fn execute_pending_tasks(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain()?;
            if self.is_idle() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(self.shared.drain_interval);
        }
    }

    /// Mark one logical operation as in flight until the guard is dropped.
    pub fn begin_operation(&self) -> PendingGuard {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        PendingGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pending_operations(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queued() == 0 && self.pending_operations() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().closed
    }

    /// Close the queue. Later posts are dropped, later sends fail with
    /// `ContextDisposed`, and items still queued are discarded, releasing
    /// their blocked submitters.
    pub fn shutdown(&self) {
        let leftover = {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            std::mem::take(&mut queue.items)
        };
        if !leftover.is_empty() {
            tracing::debug!(count = leftover.len(), "discarding work queued at shutdown");
        }
        drop(leftover);

        if self.is_designated_thread() {
            CURRENT.with(|current| {
                let mut current = current.borrow_mut();
                if current.as_ref().is_some_and(|d| d.same_queue(self)) {
                    current.take();
                }
            });
        }
        self.shared.wake.notify_one();
    }

    /// Resolves after the next submission (or shutdown).
    pub async fn notified(&self) {
        self.shared.wake.notified().await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the dispatcher's pending-operation count raised while alive.
pub struct PendingGuard {
    shared: Arc<Shared>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

struct DrainScope;

impl DrainScope {
    fn enter() -> Self {
        DRAINING.with(|d| d.set(true));
        DrainScope
    }
}

impl Drop for DrainScope {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
    }
}
