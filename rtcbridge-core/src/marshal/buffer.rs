//! Owning outbound buffers allocated with the C allocator.

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use super::{Blittable, native_alloc, native_free};
use crate::error::{BridgeError, Result};

/// A tightly packed native array of `T`.
pub struct NativeBuffer<T: Blittable> {
    ptr: NonNull<T>,
    len: usize,
}

// The buffer is plain owned memory.
unsafe impl<T: Blittable + Send> Send for NativeBuffer<T> {}

impl<T: Blittable> NativeBuffer<T> {
    /// Copy `items` into a new native allocation. Never null, even when empty.
    pub fn from_slice(items: &[T]) -> Self {
        let ptr = native_alloc(std::mem::size_of_val(items)).cast::<T>();
        unsafe { std::ptr::copy_nonoverlapping(items.as_ptr(), ptr, items.len()) };
        Self {
            // native_alloc never returns null.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            len: items.len(),
        }
    }

    /// Take ownership of a native array.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` initialized `T`s in a C-allocator block
    /// nobody else will free.
    pub unsafe fn from_raw(ptr: *mut T, len: usize) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or(BridgeError::InvalidArgument("null array pointer"))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Hand the allocation across the boundary; the receiver frees it.
    pub fn into_raw(self) -> (*mut T, usize) {
        let this = ManuallyDrop::new(self);
        (this.ptr.as_ptr(), this.len)
    }
}

impl<T: Blittable> Drop for NativeBuffer<T> {
    fn drop(&mut self) {
        unsafe { native_free(self.ptr.as_ptr().cast()) };
    }
}

/// A NUL-terminated native string.
pub struct NativeString {
    ptr: NonNull<c_char>,
}

unsafe impl Send for NativeString {}

impl NativeString {
    /// Copy `s` into a new native allocation. Fails on interior NUL bytes,
    /// which the native side would silently truncate at.
    pub fn new(s: &str) -> Result<Self> {
        if s.as_bytes().contains(&0) {
            return Err(BridgeError::InvalidArgument("string contains an interior NUL byte"));
        }
        let ptr = native_alloc(s.len() + 1);
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), ptr, s.len());
            *ptr.add(s.len()) = 0;
        }
        Ok(Self {
            ptr: unsafe { NonNull::new_unchecked(ptr.cast()) },
        })
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.ptr.as_ptr()
    }

    pub fn as_c_str(&self) -> &CStr {
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Hand the string across the boundary; the receiver frees it.
    pub fn into_raw(self) -> *mut c_char {
        ManuallyDrop::new(self).ptr.as_ptr()
    }
}

impl Drop for NativeString {
    fn drop(&mut self) {
        unsafe { native_free(self.ptr.as_ptr().cast()) };
    }
}

/// A native array of individually allocated native strings.
pub struct NativeStringArray {
    ptr: NonNull<*mut c_char>,
    len: usize,
}

unsafe impl Send for NativeStringArray {}

impl NativeStringArray {
    pub fn new<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        // Build every element first so a bad one frees the others on the way out.
        let strings = items
            .iter()
            .map(|s| NativeString::new(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let ptr = native_alloc(std::mem::size_of::<*mut c_char>() * strings.len()).cast::<*mut c_char>();
        for (i, s) in strings.into_iter().enumerate() {
            unsafe { ptr.add(i).write(s.into_raw()) };
        }
        Ok(Self {
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            len: items.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const *mut c_char {
        self.ptr.as_ptr()
    }

    /// Hand the array and its elements across the boundary.
    pub fn into_raw(self) -> (*mut *mut c_char, usize) {
        let this = ManuallyDrop::new(self);
        (this.ptr.as_ptr(), this.len)
    }
}

impl Drop for NativeStringArray {
    fn drop(&mut self) {
        for i in 0..self.len {
            unsafe { native_free((*self.ptr.as_ptr().add(i)).cast()) };
        }
        unsafe { native_free(self.ptr.as_ptr().cast()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_string_is_nul_terminated() {
        let s = NativeString::new("hello").unwrap();
        assert_eq!(s.as_c_str().to_bytes_with_nul(), b"hello\0");
    }

    #[test]
    fn test_empty_string() {
        let s = NativeString::new("").unwrap();
        assert!(!s.as_ptr().is_null());
        assert_eq!(s.as_c_str().to_bytes(), b"");
    }

    #[test]
    fn test_interior_nul_rejected() {
        let err = NativeString::new("a\0b").err().unwrap();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));

        let err = NativeStringArray::new(&["fine", "bro\0ken"]).err().unwrap();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_string_array_elements() {
        let array = NativeStringArray::new(&["a", "bc"]).unwrap();
        assert_eq!(array.len(), 2);
        let second = unsafe { CStr::from_ptr(*array.as_ptr().add(1)) };
        assert_eq!(second.to_str().unwrap(), "bc");
    }

    #[test]
    fn test_buffer_from_raw_rejects_null() {
        let err = unsafe { NativeBuffer::<u32>::from_raw(std::ptr::null_mut(), 4) }.err().unwrap();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_buffer_from_raw_takes_ownership() {
        let (ptr, len) = NativeBuffer::from_slice(&[3u16, 4]).into_raw();
        let buffer = unsafe { NativeBuffer::from_raw(ptr, len) }.unwrap();
        assert_eq!(buffer.as_slice(), &[3, 4]);
        assert!(!buffer.is_empty());
    }
}
