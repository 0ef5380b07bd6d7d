//! Data channel wrapper: a secondary handle owned by a peer connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context::ContextShared;
use crate::error::{BridgeError, Result};
use crate::handle::Handle;
use crate::native::NativeEngine;
use crate::peer::PeerConnection;
use crate::registry::NativeWrapper;
use crate::types::{DataChannelMessage, DataChannelState};

type EventHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(&DataChannelMessage) + Send + Sync>;

#[derive(Default)]
struct ChannelHandlers {
    open: Option<EventHandler>,
    close: Option<EventHandler>,
    message: Option<MessageHandler>,
}

pub struct DataChannel {
    handle: Handle,
    /// The owning peer connection, resolved through the registry when needed.
    owner: Handle,
    label: String,
    engine: Arc<dyn NativeEngine>,
    context: Weak<ContextShared>,
    state: Mutex<DataChannelState>,
    handlers: Mutex<ChannelHandlers>,
    disposed: AtomicBool,
}

impl DataChannel {
    pub(crate) fn new(handle: Handle, owner: Handle, label: String, context: &Arc<ContextShared>) -> Self {
        Self {
            handle,
            owner,
            label,
            engine: Arc::clone(&context.engine),
            context: Arc::downgrade(context),
            state: Mutex::new(DataChannelState::Connecting),
            handlers: Mutex::default(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn owner_handle(&self) -> Handle {
        self.owner
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ready_state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(BridgeError::UnknownHandle(self.handle));
        }
        let shared = self.context.upgrade().ok_or(BridgeError::ContextDisposed)?;
        if !shared.dispatcher.is_designated_thread() {
            return Err(BridgeError::WrongThread);
        }
        Ok(())
    }

    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        self.engine.data_channel_send(self.handle, data, true)
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.ensure_live()?;
        self.engine.data_channel_send(self.handle, text.as_bytes(), false)
    }

    pub fn close(&self) -> Result<()> {
        self.ensure_live()?;
        self.engine.data_channel_close(self.handle);
        Ok(())
    }

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.handlers.lock().open = Some(Arc::new(handler));
    }

    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.handlers.lock().close = Some(Arc::new(handler));
    }

    pub fn on_message(&self, handler: impl Fn(&DataChannelMessage) + Send + Sync + 'static) {
        self.handlers.lock().message = Some(Arc::new(handler));
    }

    pub(crate) fn state_changed(&self, state: DataChannelState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous == state {
            return;
        }
        tracing::debug!(dc = %self.handle, label = %self.label, ?state, "data channel state changed");
        let handler = match state {
            DataChannelState::Open => self.handlers.lock().open.clone(),
            DataChannelState::Closed => self.handlers.lock().close.clone(),
            _ => None,
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    pub(crate) fn message_received(&self, message: DataChannelMessage) {
        let handler = self.handlers.lock().message.clone();
        match handler {
            Some(handler) => handler(&message),
            None => tracing::trace!(dc = %self.handle, "message with no handler, dropping"),
        }
    }
}

impl NativeWrapper for DataChannel {
    fn handle(&self) -> Handle {
        self.handle
    }

    /// Unregister, detach from the owner, then delete natively. Off the
    /// designated thread the disposal is posted there instead.
    fn dispose(&self) {
        if let Some(shared) = self.context.upgrade().filter(|s| !s.dispatcher.is_designated_thread()) {
            tracing::debug!(dc = %self.handle, "dispose off the designated thread, posting");
            shared.deliver::<DataChannel, _>(self.handle, "dispose", |dc| dc.dispose());
            return;
        }
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.context.upgrade() {
            shared.registry.unregister(self.handle);
            // The owner may already be gone during context teardown.
            if let Ok(owner) = shared.registry.resolve_as::<PeerConnection>(self.owner) {
                owner.detach_channel(self.handle);
            }
        }
        self.engine.data_channel_delete(self.handle);
        *self.handlers.lock() = ChannelHandlers::default();
        tracing::debug!(dc = %self.handle, label = %self.label, "data channel disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn owner(&self) -> Option<Handle> {
        Some(self.owner)
    }

    fn kind(&self) -> &'static str {
        "data_channel"
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
