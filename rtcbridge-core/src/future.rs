//! Single-assignment futures for native asynchronous calls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Pending,
    Completed,
    Failed,
}

enum OpState<T> {
    Pending,
    Completed(T),
    Failed(BridgeError),
}

struct OpInner<T> {
    state: OpState<T>,
    wakers: Vec<Waker>,
}

/// The pending result of one native asynchronous call.
///
/// Settles exactly once, through [`complete`](Self::complete) or
/// [`fail`](Self::fail). Settling always happens inside a work item drained
/// on the designated thread, so awaiters on that thread observe the result
/// without further synchronization. Clones share the same state; each clone
/// can be awaited independently.
pub struct AsyncOp<T> {
    inner: Arc<Mutex<OpInner<T>>>,
}

impl<T> Clone for AsyncOp<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for AsyncOp<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncOp<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OpInner {
                state: OpState::Pending,
                wakers: Vec::new(),
            })),
        }
    }

    /// An operation that failed before reaching the native side.
    pub fn failed(error: BridgeError) -> Self {
        let op = Self::new();
        op.fail(error);
        op
    }

    pub fn status(&self) -> OpStatus {
        match self.inner.lock().state {
            OpState::Pending => OpStatus::Pending,
            OpState::Completed(_) => OpStatus::Completed,
            OpState::Failed(_) => OpStatus::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == OpStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status() == OpStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status() == OpStatus::Failed
    }

    /// Publish the result. Returns `false`, leaving the published state
    /// untouched, if the operation already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(OpState::Completed(value))
    }

    /// Publish a failure. Same single-assignment rule as [`complete`](Self::complete).
    pub fn fail(&self, error: BridgeError) -> bool {
        self.settle(OpState::Failed(error))
    }

    fn settle(&self, next: OpState<T>) -> bool {
        let wakers = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, OpState::Pending) {
                tracing::warn!("async operation already settled, ignoring second result");
                return false;
            }
            inner.state = next;
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn error(&self) -> Option<BridgeError> {
        match &self.inner.lock().state {
            OpState::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }
}

impl<T: Clone> AsyncOp<T> {
    /// The result, if settled.
    pub fn try_result(&self) -> Option<Result<T>> {
        match &self.inner.lock().state {
            OpState::Pending => None,
            OpState::Completed(v) => Some(Ok(v.clone())),
            OpState::Failed(e) => Some(Err(e.clone())),
        }
    }
}

impl<T: Clone> Future for AsyncOp<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        match &inner.state {
            OpState::Completed(v) => Poll::Ready(Ok(v.clone())),
            OpState::Failed(e) => Poll::Ready(Err(e.clone())),
            OpState::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for AsyncOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOp").field("status", &self.status()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<T: Clone>(op: &mut AsyncOp<T>, waker: &Waker) -> Poll<Result<T>> {
        let mut cx = Context::from_waker(waker);
        Pin::new(op).poll(&mut cx)
    }

    #[test]
    fn test_complete_wakes_awaiter() {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let mut op = AsyncOp::<u32>::new();

        assert!(poll_once(&mut op, &waker).is_pending());
        // Re-polling with the same waker does not register it twice.
        assert!(poll_once(&mut op, &waker).is_pending());

        assert!(op.complete(7));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(poll_once(&mut op, &waker), Poll::Ready(Ok(7)));
        assert_eq!(op.status(), OpStatus::Completed);
    }

    #[test]
    fn test_second_settle_is_ignored() {
        let op = AsyncOp::new();
        assert!(op.complete("first".to_string()));
        assert!(!op.complete("second".to_string()));
        assert!(!op.fail(BridgeError::Cancelled));
        assert_eq!(op.try_result(), Some(Ok("first".to_string())));
        assert_eq!(op.error(), None);
    }

    #[test]
    fn test_fail() {
        let op = AsyncOp::<()>::new();
        assert!(op.is_pending());
        assert_eq!(op.try_result(), None);
        assert!(op.fail(BridgeError::Cancelled));
        assert_eq!(op.status(), OpStatus::Failed);
        assert_eq!(op.error(), Some(BridgeError::Cancelled));
        assert_eq!(op.try_result(), Some(Err(BridgeError::Cancelled)));
    }

    #[test]
    fn test_failed_constructor() {
        let op = AsyncOp::<i64>::failed(BridgeError::ContextDisposed);
        assert_eq!(op.try_result(), Some(Err(BridgeError::ContextDisposed)));
    }

    #[test]
    fn test_multiple_awaiters() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let op = AsyncOp::<u8>::new();
        let (a, b) = (op.clone(), op.clone());
        let result = rt.block_on(async move {
            let first = tokio::spawn(a);
            let second = tokio::spawn(b);
            tokio::task::yield_now().await;
            op.complete(3);
            (first.await.unwrap(), second.await.unwrap())
        });
        assert_eq!(result, (Ok(3), Ok(3)));
    }
}
