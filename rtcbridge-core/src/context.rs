//! The engine context: root owner of every native handle in a session.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::DataChannel;
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::handle::Handle;
use crate::marshal::{NativeString, ptr_to_map};
use crate::native::NativeEngine;
use crate::peer::PeerConnection;
use crate::registry::{HandleRegistry, NativeWrapper};
use crate::trampoline::TRAMPOLINES;
use crate::types::{MediaKind, RtcConfiguration};

/// State reachable from callbacks and wrappers.
///
/// A raw strong reference to it is the engine's `user_data`.
pub(crate) struct ContextShared {
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) registry: HandleRegistry,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: BridgeConfig,
}

impl ContextShared {
    /// Post `apply` to the designated thread, to run against the wrapper
    /// registered under `handle` at that time. If the handle is gone by then
    /// the callback is dropped.
    pub(crate) fn deliver<W, F>(self: Arc<Self>, handle: Handle, event: &'static str, apply: F)
    where
        W: NativeWrapper,
        F: FnOnce(&W) + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        dispatcher.post(move || match self.registry.resolve_as::<W>(handle) {
            Ok(wrapper) => apply(&wrapper),
            Err(e) => tracing::debug!(%handle, event, "dropping callback: {e}"),
        });
    }
}

/// Owns one native engine context and, through its registry, every
/// wrapper created under it.
///
/// Lives on the designated thread (it is neither `Send` nor `Sync`).
/// Disposal is explicit through [`dispose`](Self::dispose) and also runs on
/// drop.
pub struct EngineContext {
    shared: Arc<ContextShared>,
    native: Handle,
    user_data: Cell<*const ContextShared>,
    disposed: Cell<bool>,
}

impl EngineContext {
    /// Create the dispatcher for the calling thread, then the native context.
    pub fn new(engine: Arc<dyn NativeEngine>, config: BridgeConfig) -> Result<Self> {
        let dispatcher = Dispatcher::with_drain_interval(config.drain_interval());
        let shared = Arc::new(ContextShared {
            engine: Arc::clone(&engine),
            registry: HandleRegistry::new(),
            dispatcher: dispatcher.linked(),
            config,
        });

        let user_data = Arc::into_raw(Arc::clone(&shared));
        let native = match unsafe { engine.context_create(&TRAMPOLINES, user_data.cast_mut().cast::<c_void>()) } {
            Ok(native) => native,
            Err(e) => {
                // The engine never saw a valid context; nothing can call back.
                unsafe { drop(Arc::from_raw(user_data)) };
                dispatcher.shutdown();
                return Err(e);
            }
        };
        tracing::info!(engine = engine.name(), context = %native, "engine context created");

        Ok(Self {
            shared,
            native,
            user_data: Cell::new(user_data),
            disposed: Cell::new(false),
        })
    }

    pub fn native_handle(&self) -> Handle {
        self.native
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.get() {
            return Err(BridgeError::ContextDisposed);
        }
        Ok(())
    }

    /// Create a peer connection. The configuration reaches the engine as JSON.
    pub fn create_peer_connection(&self, config: &RtcConfiguration) -> Result<Arc<PeerConnection>> {
        self.ensure_live()?;
        let json = serde_json::to_string(config).map_err(|e| BridgeError::Config(e.to_string()))?;
        let json = NativeString::new(&json)?;

        let engine = &self.shared.engine;
        let handle = engine.peer_connection_create(self.native, json.as_c_str())?;
        let pc = Arc::new(PeerConnection::new(handle, &self.shared));
        if let Err(e) = self.shared.registry.register(handle, pc.clone()) {
            tracing::error!(pc = %handle, "could not register peer connection: {e}");
            engine.peer_connection_close(handle);
            engine.peer_connection_delete(handle);
            return Err(e);
        }
        tracing::debug!(pc = %handle, "peer connection created");
        Ok(pc)
    }

    /// Codecs the engine supports for `kind`, as MIME type -> fmtp line.
    pub fn codec_capabilities(&self, kind: MediaKind) -> Result<HashMap<String, String>> {
        self.ensure_live()?;
        let raw = self.shared.engine.codec_capabilities(self.native, kind)?;
        unsafe { ptr_to_map(raw.mime_types, raw.fmtp_lines, raw.count, true, true) }
    }

    pub fn resolve(&self, handle: Handle) -> Result<Arc<dyn NativeWrapper>> {
        self.shared.registry.resolve(handle)
    }

    pub fn peer_connection(&self, handle: Handle) -> Result<Arc<PeerConnection>> {
        self.shared.registry.resolve_as(handle)
    }

    pub fn data_channel(&self, handle: Handle) -> Result<Arc<DataChannel>> {
        self.shared.registry.resolve_as(handle)
    }

    /// Handles currently registered, in no particular order.
    pub fn live_handles(&self) -> Vec<Handle> {
        self.shared.registry.handles()
    }

    pub fn wrapper_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// A dispatcher linked to this context's queue, for use on other threads.
    pub fn dispatcher(&self) -> Dispatcher {
        self.shared.dispatcher.linked()
    }

    /// A `Send` handle for submitting work from other threads, honouring the
    /// configured send timeout.
    pub fn remote(&self) -> ContextRemote {
        ContextRemote {
            dispatcher: self.shared.dispatcher.linked(),
            send_timeout: self.shared.config.send_timeout(),
        }
    }

    /// Run one drain tick.
    pub fn drain(&self) -> Result<usize> {
        self.shared.dispatcher.drain()
    }

    pub fn execute_pending_tasks(&self, timeout: Duration) -> Result<bool> {
        self.shared.dispatcher.execute_pending_tasks(timeout)
    }

    /// Tear the session down. Idempotent.
    ///
    /// Flushes pending work (bounded by the teardown timeout), disposes every
    /// wrapper with dependents first, destroys the native context so no more
    /// callbacks arrive, drops whatever those last callbacks queued, then
    /// shuts the dispatcher down.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let dispatcher = &self.shared.dispatcher;

        match dispatcher.execute_pending_tasks(self.shared.config.teardown_timeout()) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                pending = dispatcher.pending_operations(),
                queued = dispatcher.queued(),
                "teardown flush timed out, cancelling remaining operations"
            ),
            Err(e) => tracing::warn!("teardown flush failed: {e}"),
        }

        let wrappers = self.shared.registry.dispose_all();
        self.shared.engine.context_destroy(self.native);

        let user_data = self.user_data.replace(std::ptr::null());
        if !user_data.is_null() {
            // context_destroy returned: the engine holds no copy any more.
            unsafe { drop(Arc::from_raw(user_data)) };
        }

        match dispatcher.drain() {
            Ok(0) => {}
            Ok(late) => tracing::debug!(late, "ran callbacks queued during teardown"),
            Err(e) => tracing::warn!("final drain failed: {e}"),
        }
        dispatcher.shutdown();
        tracing::info!(context = %self.native, wrappers, "engine context disposed");
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Submits work to a context's designated thread from any thread.
#[derive(Clone)]
pub struct ContextRemote {
    dispatcher: Dispatcher,
    send_timeout: Option<Duration>,
}

impl ContextRemote {
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.post(work)
    }

    /// Blocking submission, bounded by the configured send timeout when set.
    pub fn send<F, R>(&self, work: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match self.send_timeout {
            Some(timeout) => self.dispatcher.send_timeout(work, timeout),
            None => self.dispatcher.send(work),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
