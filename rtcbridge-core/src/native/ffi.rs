//! The real engine, linked as `librtcnative`.
//!
//! Every fallible entry point returns a [`NativeErrorKind`] code and writes
//! results through out-parameters. Messages for failed calls are fetched
//! with `rtc_last_error`, which returns an engine-owned thread-local string.

use std::ffi::{CStr, c_char, c_void};

use super::{
    CallbackTable, CodecCapabilitiesRaw, DataChannelInitRaw, IceCandidateRaw, NativeEngine, OfferOptionsRaw,
    SessionDescriptionRaw,
};
use crate::error::{BridgeError, NativeErrorKind, Result};
use crate::handle::Handle;
use crate::marshal::ptr_to_string;
use crate::types::MediaKind;

#[link(name = "rtcnative")]
unsafe extern "C" {
    fn rtc_last_error() -> *const c_char;

    fn rtc_context_create(callbacks: *const CallbackTable, user_data: *mut c_void, out: *mut Handle) -> i32;
    fn rtc_context_destroy(context: Handle);
    fn rtc_codec_capabilities(context: Handle, kind: i32, out: *mut CodecCapabilitiesRaw) -> i32;

    fn rtc_peer_connection_create(context: Handle, config_json: *const c_char, out: *mut Handle) -> i32;
    fn rtc_peer_connection_close(pc: Handle);
    fn rtc_peer_connection_delete(pc: Handle);
    fn rtc_create_offer(pc: Handle, options: *const OfferOptionsRaw) -> i32;
    fn rtc_create_answer(pc: Handle, options: *const OfferOptionsRaw) -> i32;
    fn rtc_set_local_description(pc: Handle, desc: *const SessionDescriptionRaw) -> i32;
    fn rtc_set_remote_description(pc: Handle, desc: *const SessionDescriptionRaw) -> i32;
    fn rtc_add_ice_candidate(pc: Handle, candidate: *const IceCandidateRaw) -> i32;
    fn rtc_get_stats(pc: Handle) -> i32;

    fn rtc_data_channel_create(
        pc: Handle,
        label: *const c_char,
        init: *const DataChannelInitRaw,
        out: *mut Handle,
    ) -> i32;
    fn rtc_data_channel_send(dc: Handle, data: *const u8, len: usize, binary: u8) -> i32;
    fn rtc_data_channel_close(dc: Handle);
    fn rtc_data_channel_delete(dc: Handle);
}

fn check(code: i32, call: &'static str) -> Result<()> {
    let kind = NativeErrorKind::from_code(code);
    if kind.is_ok() {
        return Ok(());
    }
    let detail = unsafe { ptr_to_string(rtc_last_error(), false) }.unwrap_or_default();
    tracing::error!(call, %kind, "native call failed: {detail}");
    Err(BridgeError::native(kind, format!("{call}: {detail}")))
}

fn non_null(handle: Handle, call: &'static str) -> Result<Handle> {
    if handle.is_null() {
        return Err(BridgeError::native(
            NativeErrorKind::InternalError,
            format!("{call} returned a null handle"),
        ));
    }
    Ok(handle)
}

/// [`NativeEngine`] over the linked C library.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedEngine;

impl NativeEngine for LinkedEngine {
    fn name(&self) -> &'static str {
        "rtcnative"
    }

    unsafe fn context_create(&self, callbacks: &'static CallbackTable, user_data: *mut c_void) -> Result<Handle> {
        let mut out = Handle::NULL;
        check(unsafe { rtc_context_create(callbacks, user_data, &mut out) }, "rtc_context_create")?;
        non_null(out, "rtc_context_create")
    }

    fn context_destroy(&self, context: Handle) {
        unsafe { rtc_context_destroy(context) }
    }

    fn codec_capabilities(&self, context: Handle, kind: MediaKind) -> Result<CodecCapabilitiesRaw> {
        let mut out = CodecCapabilitiesRaw {
            mime_types: std::ptr::null_mut(),
            fmtp_lines: std::ptr::null_mut(),
            count: 0,
        };
        check(
            unsafe { rtc_codec_capabilities(context, kind.code(), &mut out) },
            "rtc_codec_capabilities",
        )?;
        Ok(out)
    }

    fn peer_connection_create(&self, context: Handle, config_json: &CStr) -> Result<Handle> {
        let mut out = Handle::NULL;
        check(
            unsafe { rtc_peer_connection_create(context, config_json.as_ptr(), &mut out) },
            "rtc_peer_connection_create",
        )?;
        non_null(out, "rtc_peer_connection_create")
    }

    fn peer_connection_close(&self, pc: Handle) {
        unsafe { rtc_peer_connection_close(pc) }
    }

    fn peer_connection_delete(&self, pc: Handle) {
        unsafe { rtc_peer_connection_delete(pc) }
    }

    fn create_offer(&self, pc: Handle, options: OfferOptionsRaw) -> Result<()> {
        check(unsafe { rtc_create_offer(pc, &options) }, "rtc_create_offer")
    }

    fn create_answer(&self, pc: Handle, options: OfferOptionsRaw) -> Result<()> {
        check(unsafe { rtc_create_answer(pc, &options) }, "rtc_create_answer")
    }

    unsafe fn set_local_description(&self, pc: Handle, desc: &SessionDescriptionRaw) -> Result<()> {
        check(unsafe { rtc_set_local_description(pc, desc) }, "rtc_set_local_description")
    }

    unsafe fn set_remote_description(&self, pc: Handle, desc: &SessionDescriptionRaw) -> Result<()> {
        check(unsafe { rtc_set_remote_description(pc, desc) }, "rtc_set_remote_description")
    }

    unsafe fn add_ice_candidate(&self, pc: Handle, candidate: &IceCandidateRaw) -> Result<()> {
        check(unsafe { rtc_add_ice_candidate(pc, candidate) }, "rtc_add_ice_candidate")
    }

    fn get_stats(&self, pc: Handle) -> Result<()> {
        check(unsafe { rtc_get_stats(pc) }, "rtc_get_stats")
    }

    unsafe fn data_channel_create(&self, pc: Handle, label: *const c_char, init: &DataChannelInitRaw) -> Result<Handle> {
        let mut out = Handle::NULL;
        check(
            unsafe { rtc_data_channel_create(pc, label, init, &mut out) },
            "rtc_data_channel_create",
        )?;
        non_null(out, "rtc_data_channel_create")
    }

    fn data_channel_send(&self, dc: Handle, data: &[u8], binary: bool) -> Result<()> {
        check(
            unsafe { rtc_data_channel_send(dc, data.as_ptr(), data.len(), binary as u8) },
            "rtc_data_channel_send",
        )
    }

    fn data_channel_close(&self, dc: Handle) {
        unsafe { rtc_data_channel_close(dc) }
    }

    fn data_channel_delete(&self, dc: Handle) {
        unsafe { rtc_data_channel_delete(dc) }
    }
}
