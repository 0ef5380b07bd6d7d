//! Native handle registry: the single source of truth for "is this handle
//! still alive".
//!
//! Maps each registered handle to the wrapper that owns it. Wrappers that
//! own secondary handles (a peer connection's data channels) refer to them,
//! and are referred back to, by key only; resolution always goes through
//! this table.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{BridgeError, Result};
use crate::handle::Handle;

/// A Rust object owning exactly one native handle.
pub trait NativeWrapper: Any + Send + Sync {
    fn handle(&self) -> Handle;

    /// Release the native resource. Idempotent; must not assume the handle
    /// is still registered.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    /// Handle of the wrapper this one depends on, for secondary handles.
    fn owner(&self) -> Option<Handle> {
        None
    }

    fn kind(&self) -> &'static str;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Handle -> wrapper table.
///
/// Only mutated from the designated thread; native threads reach it through
/// posted work, never directly.
#[derive(Default)]
pub struct HandleRegistry {
    table: DashMap<Handle, Arc<dyn NativeWrapper>>,
    closed: AtomicBool,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Handle, wrapper: Arc<dyn NativeWrapper>) -> Result<()> {
        if handle.is_null() {
            return Err(BridgeError::InvalidArgument("null handle"));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::ContextDisposed);
        }
        match self.table.entry(handle) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateHandle(handle)),
            Entry::Vacant(slot) => {
                tracing::trace!(%handle, kind = wrapper.kind(), "registered handle");
                slot.insert(wrapper);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, handle: Handle) -> Result<Arc<dyn NativeWrapper>> {
        self.table
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    /// Resolve and downcast. A wrapper of another type counts as unknown.
    pub fn resolve_as<W: NativeWrapper>(&self, handle: Handle) -> Result<Arc<W>> {
        self.resolve(handle)?
            .into_any()
            .downcast::<W>()
            .map_err(|_| BridgeError::UnknownHandle(handle))
    }

    /// Remove `handle`. Removing an absent handle is a no-op.
    pub fn unregister(&self, handle: Handle) -> bool {
        let removed = self.table.remove(&handle).is_some();
        if removed {
            tracing::trace!(%handle, "unregistered handle");
        }
        removed
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.table.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.table.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the registry and dispose every remaining wrapper.
    ///
    /// Entries are taken out of the table before any wrapper is disposed, so
    /// a wrapper unregistering itself (or a sibling) never re-enters the
    /// iteration. Dependents (wrappers with an owner) go first. Returns the
    /// number of wrappers disposed.
    pub fn dispose_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);

        let mut wrappers: Vec<Arc<dyn NativeWrapper>> = self
            .handles()
            .into_iter()
            .filter_map(|handle| self.table.remove(&handle).map(|(_, w)| w))
            .collect();
        wrappers.sort_by_key(|w| w.owner().is_none());

        for wrapper in &wrappers {
            tracing::debug!(handle = %wrapper.handle(), kind = wrapper.kind(), "disposing on teardown");
            wrapper.dispose();
        }
        wrappers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Probe {
        handle: Handle,
        owner: Option<Handle>,
        disposed: AtomicBool,
        registry: Option<Arc<HandleRegistry>>,
        log: Arc<Mutex<Vec<Handle>>>,
    }

    impl Probe {
        fn new(raw: usize) -> Arc<Self> {
            Arc::new(Self {
                handle: Handle::from_raw(raw),
                owner: None,
                disposed: AtomicBool::new(false),
                registry: None,
                log: Arc::default(),
            })
        }
    }

    impl NativeWrapper for Probe {
        fn handle(&self) -> Handle {
            self.handle
        }

        fn dispose(&self) {
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(registry) = &self.registry {
                registry.unregister(self.handle);
            }
            self.log.lock().push(self.handle);
        }

        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }

        fn owner(&self) -> Option<Handle> {
            self.owner
        }

        fn kind(&self) -> &'static str {
            "probe"
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct Other(Handle);

    impl NativeWrapper for Other {
        fn handle(&self) -> Handle {
            self.0
        }
        fn dispose(&self) {}
        fn is_disposed(&self) -> bool {
            false
        }
        fn kind(&self) -> &'static str {
            "other"
        }
        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn test_register_resolve_round_trip() {
        let registry = HandleRegistry::new();
        let probe = Probe::new(0x100);
        registry.register(probe.handle, probe.clone()).unwrap();

        let resolved = registry.resolve_as::<Probe>(probe.handle).unwrap();
        assert!(Arc::ptr_eq(&resolved, &probe));
        assert!(registry.contains(probe.handle));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_handle() {
        let registry = HandleRegistry::new();
        let h = Handle::from_raw(0x200);
        registry.register(h, Probe::new(0x200)).unwrap();
        assert_eq!(
            registry.register(h, Probe::new(0x200)).unwrap_err(),
            BridgeError::DuplicateHandle(h)
        );
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = HandleRegistry::new();
        let h = Handle::from_raw(0x300);
        registry.register(h, Probe::new(0x300)).unwrap();

        assert!(registry.unregister(h));
        assert_eq!(registry.resolve(h).err(), Some(BridgeError::UnknownHandle(h)));
        assert!(!registry.unregister(h));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_null_handle_rejected() {
        let registry = HandleRegistry::new();
        let err = registry.register(Handle::NULL, Probe::new(0)).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_resolve_as_wrong_type_is_unknown() {
        let registry = HandleRegistry::new();
        let h = Handle::from_raw(0x400);
        registry.register(h, Arc::new(Other(h))).unwrap();
        assert_eq!(
            registry.resolve_as::<Probe>(h).err(),
            Some(BridgeError::UnknownHandle(h))
        );
        assert!(registry.resolve_as::<Other>(h).is_ok());
    }

    #[test]
    fn test_dispose_all_cascades_and_closes() {
        let registry = Arc::new(HandleRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let make = |raw: usize, owner: Option<usize>| {
            Arc::new(Probe {
                handle: Handle::from_raw(raw),
                owner: owner.map(Handle::from_raw),
                disposed: AtomicBool::new(false),
                // Self-unregistering wrappers must not upset the teardown iteration.
                registry: Some(registry.clone()),
                log: log.clone(),
            })
        };
        let parent = make(0x10, None);
        let children = [make(0x20, Some(0x10)), make(0x30, Some(0x10))];
        registry.register(parent.handle, parent.clone()).unwrap();
        for child in &children {
            registry.register(child.handle, child.clone()).unwrap();
        }

        assert_eq!(registry.dispose_all(), 3);
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert!(parent.is_disposed() && children.iter().all(|c| c.is_disposed()));

        let order = log.lock().clone();
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], parent.handle, "dependents are disposed first");

        assert_eq!(
            registry.resolve(parent.handle).err(),
            Some(BridgeError::UnknownHandle(parent.handle))
        );
        assert_eq!(
            registry.register(Handle::from_raw(0x40), Probe::new(0x40)).unwrap_err(),
            BridgeError::ContextDisposed
        );
    }
}
