//! Conversions between native flat memory and Rust containers.
//!
//! Inbound functions (`ptr_to_*`) copy out of native memory and take an
//! explicit `free_source` flag: when set, the source buffer is released with
//! [`native_free`] right after the copy; when clear, the caller (usually the
//! native engine, for views into longer-lived structures) keeps ownership.
//!
//! Outbound types ([`NativeString`], [`NativeStringArray`], [`NativeBuffer`])
//! own C-allocator memory and free it on drop unless ownership is handed
//! across the boundary with `into_raw`. Who frees a buffer after that is a
//! per-call-site contract of the native API.
//!
//! Nothing here holds shared state.

mod alloc;
mod array;
mod buffer;
mod optional;

pub use alloc::{native_alloc, native_free};
pub use array::{ptr_to_bool_vec, ptr_to_map, ptr_to_string, ptr_to_string_vec, ptr_to_vec};
pub use buffer::{NativeBuffer, NativeString, NativeStringArray};
pub use optional::OptionalRaw;

use crate::handle::Handle;

/// Fixed-layout plain data that can be bulk-copied to and from native memory.
///
/// # Safety
///
/// Implementors must be primitives or `#[repr(C)]` aggregates of other
/// `Blittable` types, own no memory, and accept every bit pattern the native
/// side may write (so `bool` and enums are excluded; use `u8`/`i32`).
pub unsafe trait Blittable: Copy + 'static {}

macro_rules! blittable {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl Blittable for $ty {})*
    };
}

blittable!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize, f32, f64, Handle);
