//! The C allocator shared with the native engine.

use std::alloc::{Layout, handle_alloc_error};
use std::ffi::c_void;

/// Allocate `bytes` with the C allocator, the allocator the native engine
/// frees with. Never returns null: zero-byte requests get one byte, and
/// allocation failure aborts through [`handle_alloc_error`].
///
/// `malloc` alignment covers every [`Blittable`](super::Blittable) type.
pub fn native_alloc(bytes: usize) -> *mut u8 {
    let size = bytes.max(1);
    let ptr = unsafe { libc::malloc(size) }.cast::<u8>();
    if ptr.is_null() {
        let layout = Layout::array::<u8>(size).unwrap_or(Layout::new::<u8>());
        handle_alloc_error(layout);
    }
    ptr
}

/// Release memory obtained from [`native_alloc`] or from the native engine.
/// Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live C-allocator pointer not freed before.
pub unsafe fn native_free(ptr: *mut c_void) {
    if !ptr.is_null() {
        unsafe { libc::free(ptr) };
    }
}
