//! In-process stand-in for the native engine.
//!
//! Behaves like the real engine at the ABI: it hands out opaque handles,
//! answers asynchronous calls from its own threads through the registered
//! [`CallbackTable`], transfers C-allocator buffers where the real engine
//! does, and joins its callback threads before `context_destroy` returns.
//! Data channels echo whatever is sent on them. The `fire_*` helpers invoke
//! callbacks synchronously on the calling thread, for driving races and late
//! deliveries from tests.

use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use super::{
    CallbackTable, CodecCapabilitiesRaw, DataChannelInitRaw, IceCandidateRaw, NativeEngine, OfferOptionsRaw,
    SessionDescriptionRaw,
};
use crate::error::{BridgeError, NativeErrorKind, Result};
use crate::handle::Handle;
use crate::marshal::{NativeString, NativeStringArray, ptr_to_string};
use crate::types::{DataChannelState, MediaKind, SdpType, optional_u8};

const FIRST_HANDLE: usize = 0x1000;
const HANDLE_STRIDE: usize = 0x10;

const PC_CONNECTING: i32 = 1;
const PC_CONNECTED: i32 = 2;
const PC_CLOSED: i32 = 5;
const ICE_CHECKING: i32 = 1;
const ICE_CONNECTED: i32 = 2;
const ICE_CLOSED: i32 = 6;

struct UserData(*mut c_void);

// Only ever handed back to the callbacks, which treat it as shared state.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

struct LoopContext {
    handle: Handle,
    callbacks: &'static CallbackTable,
    user_data: UserData,
    alive: RwLock<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LoopContext {
    /// Call into the callback table unless the context is gone. Holds the
    /// read side of `alive` for the duration, so destroy waits it out.
    fn invoke(&self, job: impl FnOnce(&'static CallbackTable, *mut c_void)) -> bool {
        let alive = self.alive.read();
        if !*alive {
            return false;
        }
        job(self.callbacks, self.user_data.0);
        true
    }
}

#[derive(Default)]
struct PeerRecord {
    local: Option<SdpType>,
    remote: Option<SdpType>,
    candidates_added: usize,
    candidates_gathered: usize,
    closed: bool,
}

struct ChannelRecord {
    pc: Handle,
    label: String,
    protocol: String,
    ordered: bool,
    state: DataChannelState,
    messages_sent: u64,
    bytes_sent: u64,
}

/// Pure-Rust [`NativeEngine`].
pub struct LoopbackEngine {
    next_handle: AtomicUsize,
    contexts: DashMap<Handle, Arc<LoopContext>>,
    /// Every handle ever issued, mapped to its context. Never shrinks, so
    /// late callbacks for deleted objects can still be fired.
    owners: DashMap<Handle, Handle>,
    peers: DashMap<Handle, PeerRecord>,
    channels: DashMap<Handle, ChannelRecord>,
    callback_delay: Duration,
    stall: AtomicBool,
    leaked: AtomicUsize,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicUsize::new(FIRST_HANDLE),
            contexts: DashMap::new(),
            owners: DashMap::new(),
            peers: DashMap::new(),
            channels: DashMap::new(),
            callback_delay: Duration::ZERO,
            stall: AtomicBool::new(false),
            leaked: AtomicUsize::new(0),
        }
    }

    /// Delay every asynchronous callback by `delay`, on its callback thread.
    pub fn with_callback_delay(mut self, delay: Duration) -> Self {
        self.callback_delay = delay;
        self
    }

    /// While set, asynchronous operations are accepted but never answered.
    pub fn set_stall_async_ops(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Contexts, peer connections and data channels not yet destroyed or deleted.
    pub fn live_handles(&self) -> usize {
        self.contexts.len() + self.peers.len() + self.channels.len()
    }

    /// Objects still alive when their context was destroyed.
    pub fn leaked_handles(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }

    pub fn ice_candidates_added(&self, pc: Handle) -> usize {
        self.peers.get(&pc).map(|p| p.candidates_added).unwrap_or(0)
    }

    /// Block until every callback scheduled so far has been delivered.
    pub fn quiesce(&self) {
        let contexts: Vec<_> = self.contexts.iter().map(|c| Arc::clone(c.value())).collect();
        for context in contexts {
            let workers = std::mem::take(&mut *context.workers.lock());
            for worker in workers {
                if worker.join().is_err() {
                    tracing::error!(context = %context.handle, "loopback: callback thread panicked");
                }
            }
        }
    }

    fn allocate(&self, context: Handle) -> Handle {
        let handle = Handle::from_raw(self.next_handle.fetch_add(HANDLE_STRIDE, Ordering::Relaxed));
        self.owners.insert(handle, context);
        handle
    }

    fn context_of(&self, handle: Handle) -> Option<Arc<LoopContext>> {
        let context = *self.owners.get(&handle)?;
        self.contexts.get(&context).map(|c| Arc::clone(c.value()))
    }

    fn live_peer(&self, pc: Handle) -> Result<Arc<LoopContext>> {
        match self.peers.get(&pc) {
            Some(peer) if !peer.closed => {}
            _ => return Err(BridgeError::native(NativeErrorKind::InvalidState, "peer connection is closed")),
        }
        self.context_of(pc)
            .ok_or_else(|| BridgeError::native(NativeErrorKind::InvalidState, "context destroyed"))
    }

    fn stalled(&self) -> bool {
        self.stall.load(Ordering::SeqCst)
    }

    /// Run `job` against the callback table on a fresh engine thread.
    fn spawn_callbacks<F>(&self, context: &Arc<LoopContext>, job: F)
    where
        F: FnOnce(&'static CallbackTable, *mut c_void) + Send + 'static,
    {
        let delay = self.callback_delay;
        let target = Arc::clone(context);
        let spawned = thread::Builder::new()
            .name("loopback-callback".into())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                target.invoke(job);
            });
        match spawned {
            Ok(worker) => {
                let mut workers = context.workers.lock();
                workers.retain(|w| !w.is_finished());
                workers.push(worker);
            }
            Err(e) => tracing::error!("loopback: failed to spawn callback thread: {e}"),
        }
    }

    fn transport_events(&self, pc: Handle) -> Option<Vec<(bool, i32)>> {
        let peer = self.peers.get(&pc)?;
        (peer.local.is_some() && peer.remote.is_some()).then(|| {
            vec![
                (true, ICE_CHECKING),
                (false, PC_CONNECTING),
                (true, ICE_CONNECTED),
                (false, PC_CONNECTED),
            ]
        })
    }

    fn fake_sdp(sdp_type: SdpType, pc: Handle) -> CString {
        let setup = if sdp_type == SdpType::Offer { "actpass" } else { "active" };
        let sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\nc=IN IP4 0.0.0.0\r\n\
             a=mid:0\r\na=setup:{setup}\r\na=sctp-port:5000\r\n",
            pc.as_raw()
        );
        c_string(&sdp)
    }

    fn stats_json(&self, pc: Handle) -> String {
        let mut entries = vec![];
        let channels: Vec<_> = self
            .channels
            .iter()
            .filter(|c| c.pc == pc)
            .map(|c| (*c.key(), c.label.clone(), c.state, c.messages_sent, c.bytes_sent))
            .collect();
        let opened = channels.len();
        let bytes: u64 = channels.iter().map(|c| c.4).sum();

        entries.push(json!({
            "type": "peer-connection",
            "id": "P",
            "timestamp": now_millis(),
            "dataChannelsOpened": opened,
            "dataChannelsClosed": channels.iter().filter(|c| c.2 == DataChannelState::Closed).count(),
        }));
        for (handle, label, state, messages, bytes) in &channels {
            entries.push(json!({
                "type": "data-channel",
                "id": format!("D{}", handle.as_raw()),
                "timestamp": now_millis(),
                "label": label,
                "state": state,
                "messagesSent": messages,
                "bytesSent": bytes,
                "messagesReceived": messages,
                "bytesReceived": bytes,
            }));
        }
        entries.push(json!({
            "type": "transport",
            "id": "T0",
            "timestamp": now_millis(),
            "bytesSent": bytes,
            "bytesReceived": bytes,
            "dtlsState": "connected",
            "selectedCandidatePairId": "CP0",
        }));
        entries.push(json!({
            "type": "candidate-pair",
            "id": "CP0",
            "timestamp": now_millis(),
            "transportId": "T0",
            "localCandidateId": "L0",
            "remoteCandidateId": "R0",
            "state": "succeeded",
            "nominated": true,
            "currentRoundTripTime": 0.0,
        }));
        entries.push(json!({
            "type": "local-candidate",
            "id": "L0",
            "timestamp": now_millis(),
            "address": "127.0.0.1",
            "port": 5000,
            "protocol": "udp",
            "candidateType": "host",
        }));
        // Vendor-specific entries show up in real engines too.
        entries.push(json!({
            "type": "x-loopback",
            "id": "X0",
            "timestamp": now_millis(),
        }));
        serde_json::Value::Array(entries).to_string()
    }

    // ─── Synchronous callback helpers ────────────────────────────────

    /// Announce a remote-created data channel on `pc`, then open it.
    pub fn fire_remote_data_channel(&self, pc: Handle, label: &str) -> Option<Handle> {
        let context = self.context_of(pc)?;
        let dc = self.allocate(context.handle);
        self.channels.insert(
            dc,
            ChannelRecord {
                pc,
                label: label.to_string(),
                protocol: String::new(),
                ordered: true,
                state: DataChannelState::Open,
                messages_sent: 0,
                bytes_sent: 0,
            },
        );
        let label = c_string(label);
        let delivered = context.invoke(|cb, ud| unsafe {
            (cb.on_data_channel)(ud, pc, dc, label.as_ptr());
            (cb.on_data_channel_state_change)(ud, dc, DataChannelState::Open.code());
        });
        delivered.then_some(dc)
    }

    pub fn fire_connection_state(&self, pc: Handle, state: i32) -> bool {
        self.fire(pc, |cb, ud| unsafe { (cb.on_connection_state_change)(ud, pc, state) })
    }

    /// Answer a create call on `pc` with a raw SDP type code.
    pub fn fire_sdp_created(&self, pc: Handle, sdp_type: i32, sdp: &str) -> bool {
        let sdp = c_string(sdp);
        self.fire(pc, |cb, ud| unsafe { (cb.on_create_sdp_success)(ud, pc, sdp_type, sdp.as_ptr()) })
    }

    pub fn fire_negotiation_needed(&self, pc: Handle) -> bool {
        self.fire(pc, |cb, ud| unsafe { (cb.on_negotiation_needed)(ud, pc) })
    }

    pub fn fire_ice_candidate(&self, pc: Handle, candidate: &str, sdp_mid: &str, sdp_mline_index: i32) -> bool {
        let (candidate, sdp_mid) = (c_string(candidate), c_string(sdp_mid));
        self.fire(pc, |cb, ud| unsafe {
            (cb.on_ice_candidate)(ud, pc, candidate.as_ptr(), sdp_mid.as_ptr(), sdp_mline_index)
        })
    }

    pub fn fire_data_channel_state(&self, dc: Handle, state: DataChannelState) -> bool {
        self.fire(dc, |cb, ud| unsafe { (cb.on_data_channel_state_change)(ud, dc, state.code()) })
    }

    pub fn fire_message(&self, dc: Handle, data: &[u8], binary: bool) -> bool {
        self.fire(dc, |cb, ud| unsafe {
            (cb.on_data_channel_message)(ud, dc, data.as_ptr(), data.len(), binary as u8)
        })
    }

    /// Deliver `json` as a stats report, transferring ownership like the engine.
    pub fn fire_stats_json(&self, pc: Handle, json: &str) -> bool {
        self.fire(pc, |cb, ud| {
            if let Ok(json) = NativeString::new(json) {
                unsafe { (cb.on_stats_delivered)(ud, pc, json.into_raw()) }
            }
        })
    }

    pub fn fire_log(&self, context: Handle, severity: i32, message: &str) -> bool {
        let Some(target) = self.contexts.get(&context).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        let message = c_string(message);
        target.invoke(|cb, ud| unsafe { (cb.on_log)(ud, severity, message.as_ptr()) })
    }

    fn fire(&self, handle: Handle, job: impl FnOnce(&'static CallbackTable, *mut c_void)) -> bool {
        self.context_of(handle).is_some_and(|context| context.invoke(job))
    }
}

impl NativeEngine for LoopbackEngine {
    fn name(&self) -> &'static str {
        "loopback"
    }

    unsafe fn context_create(&self, callbacks: &'static CallbackTable, user_data: *mut c_void) -> Result<Handle> {
        if user_data.is_null() {
            return Err(BridgeError::native(NativeErrorKind::InvalidParameter, "null user data"));
        }
        let handle = self.allocate(Handle::NULL);
        self.owners.insert(handle, handle);
        self.contexts.insert(
            handle,
            Arc::new(LoopContext {
                handle,
                callbacks,
                user_data: UserData(user_data),
                alive: RwLock::new(true),
                workers: Mutex::new(Vec::new()),
            }),
        );
        tracing::debug!(context = %handle, "loopback: context created");
        Ok(handle)
    }

    fn context_destroy(&self, context: Handle) {
        let Some((_, target)) = self.contexts.remove(&context) else {
            tracing::warn!(%context, "loopback: destroying unknown context");
            return;
        };
        *target.alive.write() = false;
        let workers = std::mem::take(&mut *target.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!(%context, "loopback: callback thread panicked");
            }
        }

        let orphans: Vec<Handle> = self
            .owners
            .iter()
            .filter(|o| *o.value() == context && *o.key() != context)
            .map(|o| *o.key())
            .filter(|h| self.peers.contains_key(h) || self.channels.contains_key(h))
            .collect();
        if !orphans.is_empty() {
            tracing::warn!(%context, count = orphans.len(), "loopback: objects outlived their context");
            self.leaked.fetch_add(orphans.len(), Ordering::SeqCst);
            for orphan in orphans {
                self.peers.remove(&orphan);
                self.channels.remove(&orphan);
            }
        }
        tracing::debug!(%context, "loopback: context destroyed");
    }

    fn codec_capabilities(&self, context: Handle, kind: MediaKind) -> Result<CodecCapabilitiesRaw> {
        if !self.contexts.contains_key(&context) {
            return Err(BridgeError::native(NativeErrorKind::InvalidState, "unknown context"));
        }
        let codecs: &[(&str, &str)] = match kind {
            MediaKind::Audio => &[
                ("audio/opus", "minptime=10;useinbandfec=1"),
                ("audio/PCMU", ""),
                ("audio/telephone-event", "0-15"),
            ],
            MediaKind::Video => &[
                ("video/VP8", ""),
                ("video/H264", "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"),
                ("video/AV1", ""),
            ],
        };
        let mimes: Vec<&str> = codecs.iter().map(|c| c.0).collect();
        let fmtps: Vec<&str> = codecs.iter().map(|c| c.1).collect();
        let (mime_types, count) = NativeStringArray::new(&mimes)?.into_raw();
        let (fmtp_lines, _) = NativeStringArray::new(&fmtps)?.into_raw();
        Ok(CodecCapabilitiesRaw {
            mime_types,
            fmtp_lines,
            count,
        })
    }

    fn peer_connection_create(&self, context: Handle, config_json: &CStr) -> Result<Handle> {
        if !self.contexts.contains_key(&context) {
            return Err(BridgeError::native(NativeErrorKind::InvalidState, "unknown context"));
        }
        let config = config_json
            .to_str()
            .map_err(|_| BridgeError::native(NativeErrorKind::SyntaxError, "configuration is not UTF-8"))?;
        serde_json::from_str::<serde_json::Value>(config)
            .map_err(|e| BridgeError::native(NativeErrorKind::SyntaxError, e.to_string()))?;

        let pc = self.allocate(context);
        self.peers.insert(pc, PeerRecord::default());
        Ok(pc)
    }

    fn peer_connection_close(&self, pc: Handle) {
        let Some(context) = self.context_of(pc) else {
            return;
        };
        match self.peers.get_mut(&pc) {
            Some(mut peer) if !peer.closed => peer.closed = true,
            _ => return,
        }
        let mut closing = Vec::new();
        for mut channel in self.channels.iter_mut() {
            if channel.pc == pc && channel.state != DataChannelState::Closed {
                channel.state = DataChannelState::Closed;
                closing.push(*channel.key());
            }
        }
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            for dc in closing {
                (cb.on_data_channel_state_change)(ud, dc, DataChannelState::Closed.code());
            }
            (cb.on_ice_connection_state_change)(ud, pc, ICE_CLOSED);
            (cb.on_connection_state_change)(ud, pc, PC_CLOSED);
        });
    }

    fn peer_connection_delete(&self, pc: Handle) {
        if self.peers.remove(&pc).is_none() {
            tracing::warn!(%pc, "loopback: deleting unknown peer connection");
        }
    }

    fn create_offer(&self, pc: Handle, _options: OfferOptionsRaw) -> Result<()> {
        let context = self.live_peer(pc)?;
        if self.stalled() {
            return Ok(());
        }
        let sdp = Self::fake_sdp(SdpType::Offer, pc);
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_create_sdp_success)(ud, pc, SdpType::Offer.code(), sdp.as_ptr())
        });
        Ok(())
    }

    fn create_answer(&self, pc: Handle, _options: OfferOptionsRaw) -> Result<()> {
        let context = self.live_peer(pc)?;
        if self.stalled() {
            return Ok(());
        }
        let has_offer = self.peers.get(&pc).is_some_and(|p| p.remote == Some(SdpType::Offer));
        if !has_offer {
            let message = c_string("no remote offer to answer");
            self.spawn_callbacks(&context, move |cb, ud| unsafe {
                (cb.on_create_sdp_failure)(
                    ud,
                    pc,
                    SdpType::Answer.code(),
                    NativeErrorKind::InvalidState.code(),
                    message.as_ptr(),
                )
            });
            return Ok(());
        }
        let sdp = Self::fake_sdp(SdpType::Answer, pc);
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_create_sdp_success)(ud, pc, SdpType::Answer.code(), sdp.as_ptr())
        });
        Ok(())
    }

    unsafe fn set_local_description(&self, pc: Handle, desc: &SessionDescriptionRaw) -> Result<()> {
        let context = self.live_peer(pc)?;
        let sdp_type = SdpType::from_code(desc.sdp_type)
            .ok_or_else(|| BridgeError::native(NativeErrorKind::InvalidParameter, "unknown sdp type"))?;
        unsafe { ptr_to_string(desc.sdp, false) }?;
        if self.stalled() {
            return Ok(());
        }

        let candidate = {
            let Some(mut peer) = self.peers.get_mut(&pc) else {
                return Err(BridgeError::native(NativeErrorKind::InvalidState, "peer connection is closed"));
            };
            peer.local = Some(sdp_type);
            peer.candidates_gathered += 1;
            c_string(&format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                peer.candidates_gathered,
                50000 + peer.candidates_gathered
            ))
        };
        let transport = self.transport_events(pc);
        let mid = c_string("0");
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_set_sdp_success)(ud, pc, 0);
            (cb.on_ice_candidate)(ud, pc, candidate.as_ptr(), mid.as_ptr(), 0);
            for (ice, state) in transport.into_iter().flatten() {
                if ice {
                    (cb.on_ice_connection_state_change)(ud, pc, state);
                } else {
                    (cb.on_connection_state_change)(ud, pc, state);
                }
            }
        });
        Ok(())
    }

    unsafe fn set_remote_description(&self, pc: Handle, desc: &SessionDescriptionRaw) -> Result<()> {
        let context = self.live_peer(pc)?;
        let sdp_type = SdpType::from_code(desc.sdp_type)
            .ok_or_else(|| BridgeError::native(NativeErrorKind::InvalidParameter, "unknown sdp type"))?;
        let sdp = unsafe { ptr_to_string(desc.sdp, false) }?;
        if self.stalled() {
            return Ok(());
        }

        if !sdp.starts_with("v=0") {
            let message = c_string("remote description is not a session description");
            self.spawn_callbacks(&context, move |cb, ud| unsafe {
                (cb.on_set_sdp_failure)(ud, pc, 1, NativeErrorKind::SyntaxError.code(), message.as_ptr())
            });
            return Ok(());
        }
        if let Some(mut peer) = self.peers.get_mut(&pc) {
            peer.remote = Some(sdp_type);
        }
        let transport = self.transport_events(pc);
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_set_sdp_success)(ud, pc, 1);
            for (ice, state) in transport.into_iter().flatten() {
                if ice {
                    (cb.on_ice_connection_state_change)(ud, pc, state);
                } else {
                    (cb.on_connection_state_change)(ud, pc, state);
                }
            }
        });
        Ok(())
    }

    unsafe fn add_ice_candidate(&self, pc: Handle, candidate: &IceCandidateRaw) -> Result<()> {
        self.live_peer(pc)?;
        let text = unsafe { ptr_to_string(candidate.candidate, false) }?;
        unsafe { ptr_to_string(candidate.sdp_mid, false) }?;
        if !text.starts_with("candidate:") {
            return Err(BridgeError::native(NativeErrorKind::SyntaxError, "malformed ICE candidate"));
        }
        if let Some(mut peer) = self.peers.get_mut(&pc) {
            peer.candidates_added += 1;
        }
        Ok(())
    }

    fn get_stats(&self, pc: Handle) -> Result<()> {
        let context = self.live_peer(pc)?;
        if self.stalled() {
            return Ok(());
        }
        let json = self.stats_json(pc);
        self.spawn_callbacks(&context, move |cb, ud| {
            if let Ok(json) = NativeString::new(&json) {
                unsafe { (cb.on_stats_delivered)(ud, pc, json.into_raw()) }
            }
        });
        Ok(())
    }

    unsafe fn data_channel_create(&self, pc: Handle, label: *const c_char, init: &DataChannelInitRaw) -> Result<Handle> {
        let context = self.live_peer(pc)?;
        let label = unsafe { ptr_to_string(label, false) }?;
        let protocol = unsafe { ptr_to_string(init.protocol, false) }?;

        let dc = self.allocate(context.handle);
        self.channels.insert(
            dc,
            ChannelRecord {
                pc,
                label,
                protocol,
                ordered: optional_u8(init.ordered).unwrap_or(true),
                state: DataChannelState::Open,
                messages_sent: 0,
                bytes_sent: 0,
            },
        );
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_data_channel_state_change)(ud, dc, DataChannelState::Open.code())
        });
        Ok(dc)
    }

    fn data_channel_send(&self, dc: Handle, data: &[u8], binary: bool) -> Result<()> {
        {
            let Some(mut channel) = self.channels.get_mut(&dc) else {
                return Err(BridgeError::native(NativeErrorKind::InvalidState, "unknown data channel"));
            };
            if channel.state != DataChannelState::Open {
                return Err(BridgeError::native(NativeErrorKind::InvalidState, "data channel is not open"));
            }
            channel.messages_sent += 1;
            channel.bytes_sent += data.len() as u64;
            tracing::trace!(%dc, protocol = %channel.protocol, ordered = channel.ordered, "loopback: echoing message");
        }
        let context = self
            .context_of(dc)
            .ok_or_else(|| BridgeError::native(NativeErrorKind::InvalidState, "context destroyed"))?;
        let echo = data.to_vec();
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_data_channel_message)(ud, dc, echo.as_ptr(), echo.len(), binary as u8)
        });
        Ok(())
    }

    fn data_channel_close(&self, dc: Handle) {
        let Some(context) = self.context_of(dc) else {
            return;
        };
        match self.channels.get_mut(&dc) {
            Some(mut channel) if channel.state != DataChannelState::Closed => {
                channel.state = DataChannelState::Closed;
            }
            _ => return,
        }
        self.spawn_callbacks(&context, move |cb, ud| unsafe {
            (cb.on_data_channel_state_change)(ud, dc, DataChannelState::Closing.code());
            (cb.on_data_channel_state_change)(ud, dc, DataChannelState::Closed.code());
        });
    }

    fn data_channel_delete(&self, dc: Handle) {
        if self.channels.remove(&dc).is_none() {
            tracing::warn!(%dc, "loopback: deleting unknown data channel");
        }
    }
}

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}
