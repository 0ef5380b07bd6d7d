//! Opaque native handles.

use std::ffi::c_void;
use std::fmt;

/// An address-sized identifier naming a native-owned resource.
///
/// The engine hands these out as raw pointers. The core never dereferences
/// them; it only hashes, compares and passes them back across the C ABI.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(usize);

impl Handle {
    /// The null handle. Never registered; native constructors return it on failure.
    pub const NULL: Handle = Handle(0);

    pub const fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Handle(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(Handle::NULL.is_null());
        assert!(Handle::default().is_null());
        assert!(!Handle::from_raw(0x10).is_null());
    }

    #[test]
    fn test_pointer_round_trip() {
        let h = Handle::from_raw(0xdead_0000);
        assert_eq!(Handle::from_ptr(h.as_ptr()), h);
        assert_eq!(h.to_string(), "0xdead0000");
        assert_eq!(format!("{h:?}"), "Handle(0xdead0000)");
    }
}
