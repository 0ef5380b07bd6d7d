//! Native callback entry points.
//!
//! Every entry runs on an engine thread. It copies its arguments out of
//! native memory, then posts a closure that resolves the target wrapper on
//! the designated thread. Nothing here touches wrapper state directly, and
//! nothing blocks: entries only ever `post`.
//!
//! `user_data` is the context's shared state, leaked into a raw `Arc` when
//! the context is created and reclaimed after the engine context is
//! destroyed.

use std::ffi::{c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::channel::DataChannel;
use crate::context::ContextShared;
use crate::error::{BridgeError, NativeErrorKind, Result};
use crate::handle::Handle;
use crate::marshal::{ptr_to_string, ptr_to_vec};
use crate::native::CallbackTable;
use crate::peer::PeerConnection;
use crate::stats::StatsReport;
use crate::types::{
    DataChannelMessage, DataChannelState, IceCandidate, IceConnectionState, PeerConnectionState, SdpType,
    SessionDescription,
};

/// Registered with every engine context. Rooted for the process lifetime.
pub static TRAMPOLINES: CallbackTable = CallbackTable {
    on_create_sdp_success,
    on_create_sdp_failure,
    on_set_sdp_success,
    on_set_sdp_failure,
    on_ice_candidate,
    on_connection_state_change,
    on_ice_connection_state_change,
    on_negotiation_needed,
    on_data_channel,
    on_data_channel_state_change,
    on_data_channel_message,
    on_stats_delivered,
    on_log,
};

/// Borrow the shared state behind `user_data` as a new strong reference.
unsafe fn context_from(user_data: *mut c_void) -> Result<Arc<ContextShared>> {
    let ptr = user_data.cast_const().cast::<ContextShared>();
    if ptr.is_null() {
        return Err(BridgeError::InvalidArgument("null user data"));
    }
    unsafe {
        Arc::increment_strong_count(ptr);
        Ok(Arc::from_raw(ptr))
    }
}

/// Run a trampoline body. Failures are logged and the callback dropped;
/// panics stop here rather than unwinding into the engine.
fn guarded(entry: &'static str, body: impl FnOnce() -> Result<()>) {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(entry, "dropping native callback: {e}"),
        Err(_) => tracing::error!(entry, "native callback panicked"),
    }
}

unsafe fn native_failure(code: i32, message: *const c_char) -> BridgeError {
    let message = unsafe { ptr_to_string(message, false) }.unwrap_or_default();
    BridgeError::native(NativeErrorKind::from_code(code), message)
}

// ─── Negotiation ─────────────────────────────────────────────────────

unsafe extern "C" fn on_create_sdp_success(user_data: *mut c_void, pc: Handle, code: i32, sdp: *const c_char) {
    guarded("create_sdp_success", || {
        let shared = unsafe { context_from(user_data) }?;
        let Some(sdp_type) = SdpType::from_code(code) else {
            shared.deliver::<PeerConnection, _>(pc, "create_sdp_success", move |pc| pc.sdp_created_unknown(code));
            return Ok(());
        };
        let result = unsafe { ptr_to_string(sdp, false) }.map(|sdp| SessionDescription::new(sdp_type, sdp));
        shared.deliver::<PeerConnection, _>(pc, "create_sdp_success", move |pc| pc.sdp_created(sdp_type, result));
        Ok(())
    });
}

unsafe extern "C" fn on_create_sdp_failure(
    user_data: *mut c_void,
    pc: Handle,
    requested_type: i32,
    error: i32,
    message: *const c_char,
) {
    guarded("create_sdp_failure", || {
        let shared = unsafe { context_from(user_data) }?;
        let Some(sdp_type) = SdpType::from_code(requested_type) else {
            shared.deliver::<PeerConnection, _>(pc, "create_sdp_failure", move |pc| {
                pc.sdp_created_unknown(requested_type)
            });
            return Ok(());
        };
        let error = unsafe { native_failure(error, message) };
        shared.deliver::<PeerConnection, _>(pc, "create_sdp_failure", move |pc| {
            pc.sdp_created(sdp_type, Err(error))
        });
        Ok(())
    });
}

unsafe extern "C" fn on_set_sdp_success(user_data: *mut c_void, pc: Handle, remote: u8) {
    guarded("set_sdp_success", || {
        let shared = unsafe { context_from(user_data) }?;
        shared.deliver::<PeerConnection, _>(pc, "set_sdp_success", move |pc| pc.sdp_applied(remote != 0, Ok(())));
        Ok(())
    });
}

unsafe extern "C" fn on_set_sdp_failure(
    user_data: *mut c_void,
    pc: Handle,
    remote: u8,
    error: i32,
    message: *const c_char,
) {
    guarded("set_sdp_failure", || {
        let shared = unsafe { context_from(user_data) }?;
        let error = unsafe { native_failure(error, message) };
        shared.deliver::<PeerConnection, _>(pc, "set_sdp_failure", move |pc| {
            pc.sdp_applied(remote != 0, Err(error))
        });
        Ok(())
    });
}

unsafe extern "C" fn on_ice_candidate(
    user_data: *mut c_void,
    pc: Handle,
    candidate: *const c_char,
    sdp_mid: *const c_char,
    sdp_mline_index: i32,
) {
    guarded("ice_candidate", || {
        let shared = unsafe { context_from(user_data) }?;
        let candidate = IceCandidate {
            candidate: unsafe { ptr_to_string(candidate, false) }?,
            sdp_mid: unsafe { ptr_to_string(sdp_mid, false) }?,
            sdp_mline_index: IceCandidate::mline_from_raw(sdp_mline_index),
        };
        shared.deliver::<PeerConnection, _>(pc, "ice_candidate", move |pc| pc.ice_candidate_gathered(candidate));
        Ok(())
    });
}

unsafe extern "C" fn on_negotiation_needed(user_data: *mut c_void, pc: Handle) {
    guarded("negotiation_needed", || {
        let shared = unsafe { context_from(user_data) }?;
        shared.deliver::<PeerConnection, _>(pc, "negotiation_needed", |pc| pc.negotiation_needed());
        Ok(())
    });
}

// ─── State ───────────────────────────────────────────────────────────

unsafe extern "C" fn on_connection_state_change(user_data: *mut c_void, pc: Handle, state: i32) {
    guarded("connection_state_change", || {
        let shared = unsafe { context_from(user_data) }?;
        let state = PeerConnectionState::from_code(state);
        shared.deliver::<PeerConnection, _>(pc, "connection_state_change", move |pc| {
            pc.connection_state_changed(state)
        });
        Ok(())
    });
}

unsafe extern "C" fn on_ice_connection_state_change(user_data: *mut c_void, pc: Handle, state: i32) {
    guarded("ice_connection_state_change", || {
        let shared = unsafe { context_from(user_data) }?;
        let state = IceConnectionState::from_code(state);
        shared.deliver::<PeerConnection, _>(pc, "ice_connection_state_change", move |pc| {
            pc.ice_connection_state_changed(state)
        });
        Ok(())
    });
}

// ─── Data channels ───────────────────────────────────────────────────

unsafe extern "C" fn on_data_channel(user_data: *mut c_void, pc: Handle, dc: Handle, label: *const c_char) {
    guarded("data_channel", || {
        let shared = unsafe { context_from(user_data) }?;
        if dc.is_null() {
            return Err(BridgeError::InvalidArgument("null data channel handle"));
        }
        let label = unsafe { ptr_to_string(label, false) }?;
        shared.deliver::<PeerConnection, _>(pc, "data_channel", move |pc| pc.adopt_remote_channel(dc, label));
        Ok(())
    });
}

unsafe extern "C" fn on_data_channel_state_change(user_data: *mut c_void, dc: Handle, state: i32) {
    guarded("data_channel_state_change", || {
        let shared = unsafe { context_from(user_data) }?;
        let state = DataChannelState::from_code(state);
        shared.deliver::<DataChannel, _>(dc, "data_channel_state_change", move |dc| dc.state_changed(state));
        Ok(())
    });
}

unsafe extern "C" fn on_data_channel_message(
    user_data: *mut c_void,
    dc: Handle,
    data: *const u8,
    len: usize,
    binary: u8,
) {
    guarded("data_channel_message", || {
        let shared = unsafe { context_from(user_data) }?;
        // The engine keeps ownership of the buffer; copy before returning.
        let data = match len {
            0 => Vec::new(),
            _ => unsafe { ptr_to_vec(data, len, false) }?,
        };
        let message = DataChannelMessage {
            data,
            binary: binary != 0,
        };
        shared.deliver::<DataChannel, _>(dc, "data_channel_message", move |dc| dc.message_received(message));
        Ok(())
    });
}

// ─── Stats & logging ─────────────────────────────────────────────────

unsafe extern "C" fn on_stats_delivered(user_data: *mut c_void, pc: Handle, json: *mut c_char) {
    guarded("stats_delivered", || {
        // Ownership of the report passes to us; free it even if the context is unusable.
        let report = unsafe { ptr_to_string(json, true) }.and_then(|json| StatsReport::from_json(&json));
        let shared = unsafe { context_from(user_data) }?;
        shared.deliver::<PeerConnection, _>(pc, "stats_delivered", move |pc| pc.stats_delivered(report));
        Ok(())
    });
}

unsafe extern "C" fn on_log(user_data: *mut c_void, severity: i32, message: *const c_char) {
    guarded("log", || {
        let shared = unsafe { context_from(user_data) }?;
        if !shared.config.forward_native_logs {
            return Ok(());
        }
        let message = unsafe { ptr_to_string(message, false) }?;
        match severity {
            i32::MIN..=0 => tracing::debug!(target: "rtcbridge::native", "{message}"),
            1 => tracing::info!(target: "rtcbridge::native", "{message}"),
            2 => tracing::warn!(target: "rtcbridge::native", "{message}"),
            _ => tracing::error!(target: "rtcbridge::native", "{message}"),
        }
        Ok(())
    });
}
