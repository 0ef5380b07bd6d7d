//! The seam between the bridge and the native WebRTC engine.
//!
//! [`NativeEngine`] mirrors the engine's C ABI one call per method. Calls are
//! issued from the designated thread; the engine answers asynchronous ones
//! later, from its own threads, through the [`CallbackTable`] registered at
//! context creation.

pub mod loopback;

#[cfg(feature = "linked")]
pub mod ffi;

use std::ffi::{CStr, c_char, c_void};

use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::{Blittable, OptionalRaw};
use crate::types::MediaKind;

pub type CreateSdpSuccessFn = unsafe extern "C" fn(user_data: *mut c_void, pc: Handle, sdp_type: i32, sdp: *const c_char);
pub type CreateSdpFailureFn =
    unsafe extern "C" fn(user_data: *mut c_void, pc: Handle, requested_type: i32, error: i32, message: *const c_char);
pub type SetSdpSuccessFn = unsafe extern "C" fn(user_data: *mut c_void, pc: Handle, remote: u8);
pub type SetSdpFailureFn =
    unsafe extern "C" fn(user_data: *mut c_void, pc: Handle, remote: u8, error: i32, message: *const c_char);
pub type IceCandidateFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    pc: Handle,
    candidate: *const c_char,
    sdp_mid: *const c_char,
    sdp_mline_index: i32,
);
pub type StateChangeFn = unsafe extern "C" fn(user_data: *mut c_void, handle: Handle, state: i32);
pub type NegotiationNeededFn = unsafe extern "C" fn(user_data: *mut c_void, pc: Handle);
pub type DataChannelFn = unsafe extern "C" fn(user_data: *mut c_void, pc: Handle, dc: Handle, label: *const c_char);
pub type DataChannelMessageFn =
    unsafe extern "C" fn(user_data: *mut c_void, dc: Handle, data: *const u8, len: usize, binary: u8);
pub type StatsDeliveredFn = unsafe extern "C" fn(user_data: *mut c_void, pc: Handle, json: *mut c_char);
pub type LogFn = unsafe extern "C" fn(user_data: *mut c_void, severity: i32, message: *const c_char);

/// Entry points the engine calls back into.
///
/// Pointer arguments are views owned by the engine for the duration of the
/// call, except `on_stats_delivered`'s `json`, whose ownership passes to the
/// callee (C allocator).
#[repr(C)]
pub struct CallbackTable {
    pub on_create_sdp_success: CreateSdpSuccessFn,
    pub on_create_sdp_failure: CreateSdpFailureFn,
    pub on_set_sdp_success: SetSdpSuccessFn,
    pub on_set_sdp_failure: SetSdpFailureFn,
    pub on_ice_candidate: IceCandidateFn,
    pub on_connection_state_change: StateChangeFn,
    pub on_ice_connection_state_change: StateChangeFn,
    pub on_negotiation_needed: NegotiationNeededFn,
    pub on_data_channel: DataChannelFn,
    pub on_data_channel_state_change: StateChangeFn,
    pub on_data_channel_message: DataChannelMessageFn,
    pub on_stats_delivered: StatsDeliveredFn,
    pub on_log: LogFn,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptionsRaw {
    pub ice_restart: u8,
    pub voice_activity_detection: u8,
}

unsafe impl Blittable for OfferOptionsRaw {}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SessionDescriptionRaw {
    pub sdp_type: i32,
    pub sdp: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IceCandidateRaw {
    pub candidate: *const c_char,
    pub sdp_mid: *const c_char,
    pub sdp_mline_index: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DataChannelInitRaw {
    pub ordered: OptionalRaw<u8>,
    pub max_packet_life_time: OptionalRaw<i32>,
    pub max_retransmits: OptionalRaw<i32>,
    pub negotiated_id: OptionalRaw<i32>,
    pub protocol: *const c_char,
}

/// Parallel codec arrays, ownership transferred to the caller: both pointer
/// arrays and every element string are C-allocator blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CodecCapabilitiesRaw {
    pub mime_types: *mut *mut c_char,
    pub fmtp_lines: *mut *mut c_char,
    pub count: usize,
}

/// The native engine's C ABI, one method per entry point.
///
/// Synchronous rejections come back as `Err`; asynchronous results arrive
/// through the callback table. Close and delete calls cannot fail.
pub trait NativeEngine: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Create an engine context that reports through `callbacks`.
    ///
    /// # Safety
    ///
    /// `user_data` is handed back verbatim to every callback and must stay
    /// valid until [`context_destroy`](Self::context_destroy) returns.
    unsafe fn context_create(&self, callbacks: &'static CallbackTable, user_data: *mut c_void) -> Result<Handle>;

    /// Destroy the context. No callback for it or its objects runs after
    /// this returns.
    fn context_destroy(&self, context: Handle);

    fn codec_capabilities(&self, context: Handle, kind: MediaKind) -> Result<CodecCapabilitiesRaw>;

    fn peer_connection_create(&self, context: Handle, config_json: &CStr) -> Result<Handle>;

    fn peer_connection_close(&self, pc: Handle);

    fn peer_connection_delete(&self, pc: Handle);

    fn create_offer(&self, pc: Handle, options: OfferOptionsRaw) -> Result<()>;

    fn create_answer(&self, pc: Handle, options: OfferOptionsRaw) -> Result<()>;

    /// # Safety
    ///
    /// `desc.sdp` must be a valid NUL-terminated string for the call.
    unsafe fn set_local_description(&self, pc: Handle, desc: &SessionDescriptionRaw) -> Result<()>;

    /// # Safety
    ///
    /// Same as [`set_local_description`](Self::set_local_description).
    unsafe fn set_remote_description(&self, pc: Handle, desc: &SessionDescriptionRaw) -> Result<()>;

    /// # Safety
    ///
    /// Both strings in `candidate` must be valid for the call.
    unsafe fn add_ice_candidate(&self, pc: Handle, candidate: &IceCandidateRaw) -> Result<()>;

    fn get_stats(&self, pc: Handle) -> Result<()>;

    /// # Safety
    ///
    /// `label` and `init.protocol` must be valid NUL-terminated strings for the call.
    unsafe fn data_channel_create(&self, pc: Handle, label: *const c_char, init: &DataChannelInitRaw) -> Result<Handle>;

    fn data_channel_send(&self, dc: Handle, data: &[u8], binary: bool) -> Result<()>;

    fn data_channel_close(&self, dc: Handle);

    fn data_channel_delete(&self, dc: Handle);
}
