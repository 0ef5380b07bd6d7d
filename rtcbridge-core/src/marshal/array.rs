//! Native buffer -> Rust container conversions.

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};

use super::{Blittable, native_free};
use crate::error::{BridgeError, Result};

/// Copy `count` elements out of a native array.
///
/// # Safety
///
/// `ptr` must be null or point to `count` initialized, aligned `T`s. When
/// `free_source` is set it must also be a C-allocator pointer this call may free.
pub unsafe fn ptr_to_vec<T: Blittable>(ptr: *const T, count: usize, free_source: bool) -> Result<Vec<T>> {
    if ptr.is_null() {
        return Err(BridgeError::InvalidArgument("null array pointer"));
    }
    let out = unsafe { std::slice::from_raw_parts(ptr, count) }.to_vec();
    if free_source {
        unsafe { native_free(ptr as *mut c_void) };
    }
    Ok(out)
}

/// Copy a native numeric array and map each element to `element != 0`.
///
/// # Safety
///
/// Same contract as [`ptr_to_vec`].
pub unsafe fn ptr_to_bool_vec<T>(ptr: *const T, count: usize, free_source: bool) -> Result<Vec<bool>>
where
    T: Blittable + PartialEq + Default,
{
    let raw = unsafe { ptr_to_vec(ptr, count, free_source) }?;
    let zero = T::default();
    Ok(raw.into_iter().map(|v| v != zero).collect())
}

/// Copy one NUL-terminated native string. Invalid UTF-8 is replaced lossily.
///
/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string; when `free_source`
/// is set, a C-allocator pointer this call may free.
pub unsafe fn ptr_to_string(ptr: *const c_char, free_source: bool) -> Result<String> {
    if ptr.is_null() {
        return Err(BridgeError::InvalidArgument("null string pointer"));
    }
    let out = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    if free_source {
        unsafe { native_free(ptr as *mut c_void) };
    }
    Ok(out)
}

/// Copy an array of `count` native string pointers.
///
/// `free_elements` releases each element string after it is copied;
/// `free_source` releases the pointer array itself. Both are honoured even
/// when a null element makes the conversion fail, so a bad array never leaks.
///
/// # Safety
///
/// `ptr` must be null or point to `count` string pointers, each null or a
/// valid NUL-terminated string. Freed pointers must come from the C allocator.
pub unsafe fn ptr_to_string_vec(
    ptr: *const *mut c_char,
    count: usize,
    free_elements: bool,
    free_source: bool,
) -> Result<Vec<String>> {
    let elements = unsafe { ptr_to_vec(ptr as *const usize, count, free_source) }?;

    let mut out = Ok(Vec::with_capacity(count));
    for element in elements {
        let element = element as *mut c_char;
        if element.is_null() {
            out = Err(BridgeError::InvalidArgument("null string element"));
            continue;
        }
        if let Ok(strings) = out.as_mut() {
            strings.push(unsafe { CStr::from_ptr(element) }.to_string_lossy().into_owned());
        }
        if free_elements {
            unsafe { native_free(element.cast()) };
        }
    }
    out
}

/// Zip parallel key and value string arrays into a map.
///
/// Keys are unique in the result; a repeated key keeps the later value.
/// Ownership flags apply to both arrays as in [`ptr_to_string_vec`].
///
/// # Safety
///
/// Same contract as [`ptr_to_string_vec`], for both `keys` and `values`.
pub unsafe fn ptr_to_map(
    keys: *const *mut c_char,
    values: *const *mut c_char,
    count: usize,
    free_elements: bool,
    free_source: bool,
) -> Result<HashMap<String, String>> {
    let keys = unsafe { ptr_to_string_vec(keys, count, free_elements, free_source) };
    let values = unsafe { ptr_to_string_vec(values, count, free_elements, free_source) };
    let (keys, values) = (keys?, values?);

    let mut map = HashMap::with_capacity(count);
    for (key, value) in keys.into_iter().zip(values) {
        if let Some(previous) = map.insert(key, value) {
            tracing::warn!("duplicate key in native map, dropping earlier value {previous:?}");
        }
    }
    Ok(map)
}
