//! Async continuations on the designated thread.
//!
//! A [`Scheduler`] owns a current-thread tokio runtime plus a `LocalSet`,
//! and keeps a pump task on it that drains the dispatcher whenever work is
//! submitted. Awaiting an [`AsyncOp`](crate::AsyncOp) inside
//! [`block_on`](Scheduler::block_on) therefore resumes on the designated
//! thread, after the callback that settled it ran there.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::{JoinHandle, LocalSet};

use crate::context::EngineContext;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};

pub struct Scheduler {
    runtime: Runtime,
    local: LocalSet,
    dispatcher: Dispatcher,
}

impl Scheduler {
    /// Build a scheduler for `dispatcher`. Must be called on its designated
    /// thread.
    pub fn new(dispatcher: Dispatcher) -> Result<Self> {
        if !dispatcher.is_designated_thread() {
            return Err(BridgeError::WrongThread);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Runtime(format!("tokio runtime init failed: {e}")))?;
        let local = LocalSet::new();
        local.spawn_local(pump(dispatcher.linked()));
        Ok(Self {
            runtime,
            local,
            dispatcher,
        })
    }

    pub fn for_context(context: &EngineContext) -> Result<Self> {
        Self::new(context.dispatcher())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run `future` to completion on this thread, draining submitted work
    /// while it waits.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.local.block_on(&self.runtime, future)
    }

    /// Like [`block_on`](Self::block_on), giving up with `Timeout`.
    pub fn block_on_timeout<F: Future>(&self, future: F, timeout: Duration) -> Result<F::Output> {
        self.block_on(async move {
            tokio::time::timeout(timeout, future)
                .await
                .map_err(|_| BridgeError::Timeout)
        })
    }

    /// Spawn a task that runs whenever this scheduler is driven.
    pub fn spawn_local<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }

    /// Drain once, then give spawned tasks one turn.
    pub fn tick(&self) -> Result<usize> {
        let ran = self.dispatcher.drain()?;
        self.block_on(tokio::task::yield_now());
        Ok(ran)
    }
}

pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

async fn pump(dispatcher: Dispatcher) {
    loop {
        if let Err(e) = dispatcher.drain() {
            tracing::error!("dispatcher pump stopped: {e}");
            break;
        }
        if dispatcher.is_shut_down() {
            tracing::debug!("dispatcher shut down, pump exiting");
            break;
        }
        dispatcher.notified().await;
    }
}
