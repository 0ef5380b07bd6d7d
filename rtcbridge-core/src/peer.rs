//! Peer connection wrapper.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::DataChannel;
use crate::context::ContextShared;
use crate::dispatch::PendingGuard;
use crate::error::{BridgeError, NativeErrorKind, Result};
use crate::future::AsyncOp;
use crate::handle::Handle;
use crate::marshal::NativeString;
use crate::native::{IceCandidateRaw, NativeEngine, SessionDescriptionRaw};
use crate::registry::NativeWrapper;
use crate::stats::StatsReport;
use crate::types::{
    DataChannelInit, IceCandidate, IceConnectionState, OfferOptions, PeerConnectionState, SdpType, SessionDescription,
};

type CandidateHandler = Arc<dyn Fn(&IceCandidate) + Send + Sync>;
type StateHandler = Arc<dyn Fn(PeerConnectionState) + Send + Sync>;
type IceStateHandler = Arc<dyn Fn(IceConnectionState) + Send + Sync>;
type NegotiationHandler = Arc<dyn Fn() + Send + Sync>;
type DataChannelHandler = Arc<dyn Fn(Arc<DataChannel>) + Send + Sync>;

/// An in-flight operation plus its hold on the dispatcher's pending count.
struct Pending<T> {
    op: AsyncOp<T>,
    /// Issue order across every kind.
    seq: u64,
    _guard: PendingGuard,
}

type Queue<T> = VecDeque<Pending<T>>;

/// In-flight operations per kind, oldest first. The engine answers each
/// kind in issue order.
#[derive(Default)]
struct PendingOps {
    create_offer: Queue<SessionDescription>,
    create_answer: Queue<SessionDescription>,
    set_local: Queue<()>,
    set_remote: Queue<()>,
    stats: Queue<StatsReport>,
    next_seq: u64,
}

impl PendingOps {
    fn cancel_all(self) -> usize {
        fn cancel<T>(queue: Queue<T>) -> usize {
            let count = queue.len();
            for pending in queue {
                pending.op.fail(BridgeError::Cancelled);
            }
            count
        }
        cancel(self.create_offer)
            + cancel(self.create_answer)
            + cancel(self.set_local)
            + cancel(self.set_remote)
            + cancel(self.stats)
    }
}

#[derive(Default)]
struct PeerState {
    connection: PeerConnectionState,
    ice_connection: IceConnectionState,
    local_candidates: Vec<IceCandidate>,
    /// Data channels owned by this connection, by handle.
    channels: Vec<Handle>,
}

#[derive(Default)]
struct PeerHandlers {
    ice_candidate: Option<CandidateHandler>,
    connection_state: Option<StateHandler>,
    ice_connection_state: Option<IceStateHandler>,
    negotiation_needed: Option<NegotiationHandler>,
    data_channel: Option<DataChannelHandler>,
}

/// A native peer connection.
///
/// Asynchronous operations return an [`AsyncOp`] settled on the designated
/// thread when the engine answers. Event handlers also run there. All
/// methods must be called on the designated thread.
pub struct PeerConnection {
    handle: Handle,
    engine: Arc<dyn NativeEngine>,
    context: Weak<ContextShared>,
    state: Mutex<PeerState>,
    pending: Mutex<PendingOps>,
    handlers: Mutex<PeerHandlers>,
    disposed: AtomicBool,
}

impl PeerConnection {
    pub(crate) fn new(handle: Handle, context: &Arc<ContextShared>) -> Self {
        Self {
            handle,
            engine: Arc::clone(&context.engine),
            context: Arc::downgrade(context),
            state: Mutex::default(),
            pending: Mutex::default(),
            handlers: Mutex::default(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn live(&self) -> Result<Arc<ContextShared>> {
        if self.is_disposed() {
            return Err(BridgeError::UnknownHandle(self.handle));
        }
        let shared = self.context.upgrade().ok_or(BridgeError::ContextDisposed)?;
        if shared.registry.is_closed() {
            return Err(BridgeError::ContextDisposed);
        }
        if !shared.dispatcher.is_designated_thread() {
            return Err(BridgeError::WrongThread);
        }
        Ok(shared)
    }

    /// Queue a pending op of one kind, then make the native call. A
    /// synchronous rejection fails the op we just queued.
    fn issue<T>(
        &self,
        queue: fn(&mut PendingOps) -> &mut Queue<T>,
        call: impl FnOnce(&dyn NativeEngine, Handle) -> Result<()>,
    ) -> AsyncOp<T> {
        let shared = match self.live() {
            Ok(shared) => shared,
            Err(e) => return AsyncOp::failed(e),
        };
        let op = AsyncOp::new();
        {
            let mut pending = self.pending.lock();
            let seq = pending.next_seq;
            pending.next_seq += 1;
            queue(&mut pending).push_back(Pending {
                op: op.clone(),
                seq,
                _guard: shared.dispatcher.begin_operation(),
            });
        }

        if let Err(e) = call(self.engine.as_ref(), self.handle) {
            tracing::debug!(pc = %self.handle, "native call rejected: {e}");
            let rejected = queue(&mut self.pending.lock()).pop_back();
            if let Some(pending) = rejected {
                pending.op.fail(e);
            }
        }
        op
    }

    /// Settle the oldest pending op of one kind.
    fn settle<T>(&self, queue: fn(&mut PendingOps) -> &mut Queue<T>, what: &'static str, result: Result<T>) {
        let next = queue(&mut self.pending.lock()).pop_front();
        let Some(pending) = next else {
            tracing::warn!(pc = %self.handle, what, "native result with no pending operation, dropping");
            return;
        };
        match result {
            Ok(value) => pending.op.complete(value),
            Err(e) => pending.op.fail(e),
        };
    }

    // ─── Negotiation ─────────────────────────────────────────────────

    pub fn create_offer(&self, options: OfferOptions) -> AsyncOp<SessionDescription> {
        self.issue(|p| &mut p.create_offer, |engine, pc| engine.create_offer(pc, options.to_raw()))
    }

    pub fn create_answer(&self, options: OfferOptions) -> AsyncOp<SessionDescription> {
        self.issue(|p| &mut p.create_answer, |engine, pc| engine.create_answer(pc, options.to_raw()))
    }

    pub fn set_local_description(&self, desc: &SessionDescription) -> AsyncOp<()> {
        let sdp = match NativeString::new(&desc.sdp) {
            Ok(sdp) => sdp,
            Err(e) => return AsyncOp::failed(e),
        };
        let raw = SessionDescriptionRaw {
            sdp_type: desc.sdp_type.code(),
            sdp: sdp.as_ptr(),
        };
        self.issue(|p| &mut p.set_local, |engine, pc| unsafe { engine.set_local_description(pc, &raw) })
    }

    pub fn set_remote_description(&self, desc: &SessionDescription) -> AsyncOp<()> {
        let sdp = match NativeString::new(&desc.sdp) {
            Ok(sdp) => sdp,
            Err(e) => return AsyncOp::failed(e),
        };
        let raw = SessionDescriptionRaw {
            sdp_type: desc.sdp_type.code(),
            sdp: sdp.as_ptr(),
        };
        self.issue(|p| &mut p.set_remote, |engine, pc| unsafe { engine.set_remote_description(pc, &raw) })
    }

    pub fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.live()?;
        let text = NativeString::new(&candidate.candidate)?;
        let mid = NativeString::new(&candidate.sdp_mid)?;
        let raw = IceCandidateRaw {
            candidate: text.as_ptr(),
            sdp_mid: mid.as_ptr(),
            sdp_mline_index: candidate.mline_to_raw(),
        };
        unsafe { self.engine.add_ice_candidate(self.handle, &raw) }
    }

    pub fn get_stats(&self) -> AsyncOp<StatsReport> {
        self.issue(|p| &mut p.stats, |engine, pc| engine.get_stats(pc))
    }

    // ─── Data channels ───────────────────────────────────────────────

    pub fn create_data_channel(&self, label: &str, init: &DataChannelInit) -> Result<Arc<DataChannel>> {
        let shared = self.live()?;
        let native_label = NativeString::new(label)?;
        let (raw, _protocol) = init.to_raw()?;

        let dc = unsafe { self.engine.data_channel_create(self.handle, native_label.as_ptr(), &raw) }?;
        self.adopt(&shared, dc, label.to_string())
    }

    /// Wrap and register a data channel owned by this connection.
    fn adopt(&self, shared: &Arc<ContextShared>, dc: Handle, label: String) -> Result<Arc<DataChannel>> {
        let channel = Arc::new(DataChannel::new(dc, self.handle, label, shared));
        if let Err(e) = shared.registry.register(dc, channel.clone()) {
            tracing::error!(pc = %self.handle, %dc, "could not register data channel: {e}");
            self.engine.data_channel_delete(dc);
            return Err(e);
        }
        self.state.lock().channels.push(dc);
        Ok(channel)
    }

    /// Data channels currently owned by this connection.
    pub fn data_channels(&self) -> Vec<Arc<DataChannel>> {
        let Some(shared) = self.context.upgrade() else {
            return Vec::new();
        };
        let handles = self.state.lock().channels.clone();
        handles
            .into_iter()
            .filter_map(|dc| shared.registry.resolve_as::<DataChannel>(dc).ok())
            .collect()
    }

    pub(crate) fn detach_channel(&self, dc: Handle) {
        self.state.lock().channels.retain(|h| *h != dc);
    }

    /// Begin closing. State changes arrive through the usual callbacks.
    pub fn close(&self) -> Result<()> {
        self.live()?;
        self.engine.peer_connection_close(self.handle);
        Ok(())
    }

    // ─── State ───────────────────────────────────────────────────────

    pub fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection
    }

    pub fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().ice_connection
    }

    /// Candidates gathered locally so far, in arrival order.
    pub fn local_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().local_candidates.clone()
    }

    // ─── Handlers ────────────────────────────────────────────────────

    pub fn on_ice_candidate(&self, handler: impl Fn(&IceCandidate) + Send + Sync + 'static) {
        self.handlers.lock().ice_candidate = Some(Arc::new(handler));
    }

    pub fn on_connection_state_change(&self, handler: impl Fn(PeerConnectionState) + Send + Sync + 'static) {
        self.handlers.lock().connection_state = Some(Arc::new(handler));
    }

    pub fn on_ice_connection_state_change(&self, handler: impl Fn(IceConnectionState) + Send + Sync + 'static) {
        self.handlers.lock().ice_connection_state = Some(Arc::new(handler));
    }

    pub fn on_negotiation_needed(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.handlers.lock().negotiation_needed = Some(Arc::new(handler));
    }

    /// Called for data channels opened by the remote peer.
    pub fn on_data_channel(&self, handler: impl Fn(Arc<DataChannel>) + Send + Sync + 'static) {
        self.handlers.lock().data_channel = Some(Arc::new(handler));
    }

    // ─── Engine events (designated thread) ───────────────────────────

    pub(crate) fn sdp_created(&self, sdp_type: SdpType, result: Result<SessionDescription>) {
        match sdp_type {
            SdpType::Offer => self.settle(|p| &mut p.create_offer, "create_offer", result),
            SdpType::Answer | SdpType::PrAnswer => self.settle(|p| &mut p.create_answer, "create_answer", result),
            SdpType::Rollback => self.sdp_created_unknown(sdp_type.code()),
        }
    }

    /// The engine answered a create call with a type code that names neither
    /// an offer nor an answer. Fail the oldest create op of either kind.
    pub(crate) fn sdp_created_unknown(&self, code: i32) {
        let oldest = {
            let mut pending = self.pending.lock();
            let offer = pending.create_offer.front().map(|p| p.seq);
            let answer = pending.create_answer.front().map(|p| p.seq);
            match (offer, answer) {
                (Some(offer), Some(answer)) if answer < offer => pending.create_answer.pop_front(),
                (Some(_), _) => pending.create_offer.pop_front(),
                (None, _) => pending.create_answer.pop_front(),
            }
        };
        match oldest {
            Some(pending) => {
                tracing::warn!(pc = %self.handle, code, "engine created an unusable sdp type, failing oldest create");
                pending.op.fail(BridgeError::native(
                    NativeErrorKind::InternalError,
                    format!("unusable sdp type {code}"),
                ));
            }
            None => tracing::warn!(pc = %self.handle, code, "unknown sdp type with no pending create, dropping"),
        }
    }

    pub(crate) fn sdp_applied(&self, remote: bool, result: Result<()>) {
        if remote {
            self.settle(|p| &mut p.set_remote, "set_remote_description", result);
        } else {
            self.settle(|p| &mut p.set_local, "set_local_description", result);
        }
    }

    pub(crate) fn stats_delivered(&self, report: Result<StatsReport>) {
        self.settle(|p| &mut p.stats, "get_stats", report);
    }

    pub(crate) fn ice_candidate_gathered(&self, candidate: IceCandidate) {
        self.state.lock().local_candidates.push(candidate.clone());
        let handler = self.handlers.lock().ice_candidate.clone();
        if let Some(handler) = handler {
            handler(&candidate);
        }
    }

    pub(crate) fn connection_state_changed(&self, state: PeerConnectionState) {
        self.state.lock().connection = state;
        tracing::debug!(pc = %self.handle, ?state, "connection state changed");
        let handler = self.handlers.lock().connection_state.clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    pub(crate) fn ice_connection_state_changed(&self, state: IceConnectionState) {
        self.state.lock().ice_connection = state;
        let handler = self.handlers.lock().ice_connection_state.clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    pub(crate) fn negotiation_needed(&self) {
        let handler = self.handlers.lock().negotiation_needed.clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub(crate) fn adopt_remote_channel(&self, dc: Handle, label: String) {
        let Some(shared) = self.context.upgrade() else {
            return;
        };
        let Ok(channel) = self.adopt(&shared, dc, label) else {
            return;
        };
        let handler = self.handlers.lock().data_channel.clone();
        if let Some(handler) = handler {
            handler(channel);
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        let pending = self.pending.lock();
        pending.create_offer.len()
            + pending.create_answer.len()
            + pending.set_local.len()
            + pending.set_remote.len()
            + pending.stats.len()
    }
}

impl NativeWrapper for PeerConnection {
    fn handle(&self) -> Handle {
        self.handle
    }

    /// Cancel in-flight operations, dispose owned data channels, unregister,
    /// then close and delete the native connection.
    ///
    /// Called off the designated thread, the disposal is posted there and
    /// happens on the next drain.
    fn dispose(&self) {
        if let Some(shared) = self.context.upgrade().filter(|s| !s.dispatcher.is_designated_thread()) {
            tracing::debug!(pc = %self.handle, "dispose off the designated thread, posting");
            shared.deliver::<PeerConnection, _>(self.handle, "dispose", |pc| pc.dispose());
            return;
        }
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = std::mem::take(&mut *self.pending.lock()).cancel_all();
        let channels = std::mem::take(&mut self.state.lock().channels);

        if let Some(shared) = self.context.upgrade() {
            for dc in channels {
                if let Ok(channel) = shared.registry.resolve_as::<DataChannel>(dc) {
                    channel.dispose();
                }
            }
            shared.registry.unregister(self.handle);
        }
        self.engine.peer_connection_close(self.handle);
        self.engine.peer_connection_delete(self.handle);

        // Handlers may capture this connection; drop them to break the cycle.
        *self.handlers.lock() = PeerHandlers::default();
        tracing::debug!(pc = %self.handle, cancelled, "peer connection disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn kind(&self) -> &'static str {
        "peer_connection"
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::context::EngineContext;
    use crate::native::loopback::LoopbackEngine;
    use crate::types::RtcConfiguration;

    fn setup() -> (EngineContext, Arc<LoopbackEngine>, Arc<PeerConnection>) {
        let engine = Arc::new(LoopbackEngine::new());
        let ctx = EngineContext::new(engine.clone(), BridgeConfig::default()).unwrap();
        let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
        (ctx, engine, pc)
    }

    /// Wait for the engine's callback threads, then run what they posted.
    fn deliver_all(ctx: &EngineContext, engine: &LoopbackEngine) {
        engine.quiesce();
        ctx.drain().unwrap();
    }

    #[test]
    fn test_create_offer_completes_after_drain() {
        let (ctx, engine, pc) = setup();
        let offer = pc.create_offer(OfferOptions::default());
        assert!(offer.is_pending());
        assert_eq!(pc.pending_count(), 1);

        deliver_all(&ctx, &engine);
        let desc = offer.try_result().unwrap().unwrap();
        assert_eq!(desc.sdp_type, SdpType::Offer);
        assert!(desc.sdp.starts_with("v=0"));
        assert_eq!(pc.pending_count(), 0);
    }

    #[test]
    fn test_answer_without_remote_offer_fails() {
        let (ctx, engine, pc) = setup();
        let answer = pc.create_answer(OfferOptions::default());
        deliver_all(&ctx, &engine);
        assert!(matches!(
            answer.try_result(),
            Some(Err(BridgeError::Native {
                kind: crate::error::NativeErrorKind::InvalidState,
                ..
            }))
        ));
    }

    #[test]
    fn test_synchronous_rejection_fails_op() {
        let (ctx, engine, pc) = setup();
        pc.close().unwrap();
        let offer = pc.create_offer(OfferOptions::default());
        assert!(offer.is_failed());
        assert_eq!(pc.pending_count(), 0);
        deliver_all(&ctx, &engine);
    }

    #[test]
    fn test_local_description_gathers_candidates() {
        let (ctx, engine, pc) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_handler = seen.clone();
        pc.on_ice_candidate(move |c| seen_handler.lock().push(c.candidate.clone()));

        let offer = pc.create_offer(OfferOptions::default());
        deliver_all(&ctx, &engine);
        let applied = pc.set_local_description(&offer.try_result().unwrap().unwrap());
        deliver_all(&ctx, &engine);

        assert_eq!(applied.try_result(), Some(Ok(())));
        assert_eq!(pc.local_candidates().len(), 1);
        assert_eq!(pc.local_candidates()[0].sdp_mline_index, Some(0));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_bad_remote_description_fails() {
        let (ctx, engine, pc) = setup();
        let applied = pc.set_remote_description(&SessionDescription::new(SdpType::Offer, "garbage"));
        deliver_all(&ctx, &engine);
        assert!(matches!(applied.try_result(), Some(Err(BridgeError::Native { .. }))));
    }

    #[test]
    fn test_add_ice_candidate() {
        let (_ctx, engine, pc) = setup();
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host".into(),
            sdp_mid: "0".into(),
            sdp_mline_index: Some(0),
        };
        pc.add_ice_candidate(&candidate).unwrap();
        assert_eq!(engine.ice_candidates_added(pc.handle()), 1);

        let bad = IceCandidate {
            candidate: "nonsense".into(),
            ..candidate
        };
        assert!(matches!(pc.add_ice_candidate(&bad), Err(BridgeError::Native { .. })));
    }

    #[test]
    fn test_dispose_cancels_pending_and_channels() {
        let (ctx, engine, pc) = setup();
        engine.set_stall_async_ops(true);
        let offer = pc.create_offer(OfferOptions::default());
        let stats = pc.get_stats();
        let dc = pc.create_data_channel("chat", &DataChannelInit::default()).unwrap();
        assert_eq!(ctx.wrapper_count(), 2);

        pc.dispose();
        assert_eq!(offer.try_result(), Some(Err(BridgeError::Cancelled)));
        assert_eq!(stats.try_result(), Some(Err(BridgeError::Cancelled)));
        assert!(dc.is_disposed());
        assert_eq!(ctx.wrapper_count(), 0);
        assert_eq!(ctx.dispatcher().pending_operations(), 0);

        // Disposed wrappers refuse new work.
        assert_eq!(
            pc.create_offer(OfferOptions::default()).try_result(),
            Some(Err(BridgeError::UnknownHandle(pc.handle())))
        );
        ctx.dispose();
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_dispose_from_foreign_thread_runs_on_next_drain() {
        let (ctx, engine, pc) = setup();
        engine.set_stall_async_ops(true);
        let offer = pc.create_offer(OfferOptions::default());
        let dc = pc.create_data_channel("chat", &DataChannelInit::default()).unwrap();

        let remote = pc.clone();
        std::thread::spawn(move || remote.dispose()).join().unwrap();

        // Nothing changed on the foreign thread.
        assert!(!pc.is_disposed());
        assert!(!dc.is_disposed());
        assert!(offer.is_pending());
        assert_eq!(ctx.wrapper_count(), 2);
        assert_eq!(engine.live_handles(), 3);

        let designated = std::thread::current().id();
        let settled_on = Arc::new(Mutex::new(None));
        let settled_slot = settled_on.clone();
        let watcher = offer.clone();
        ctx.remote().post(move || {
            *settled_slot.lock() = Some((std::thread::current().id(), watcher.try_result()));
        });

        ctx.drain().unwrap();
        assert!(pc.is_disposed());
        assert!(dc.is_disposed());
        assert_eq!(offer.try_result(), Some(Err(BridgeError::Cancelled)));
        assert_eq!(ctx.wrapper_count(), 0);
        assert_eq!(ctx.dispatcher().pending_operations(), 0);
        assert_eq!(*settled_on.lock(), Some((designated, Some(Err(BridgeError::Cancelled)))));
    }

    #[test]
    fn test_unusable_sdp_type_fails_oldest_create() {
        let (ctx, engine, pc) = setup();
        engine.set_stall_async_ops(true);
        let answer = pc.create_answer(OfferOptions::default());
        let offer = pc.create_offer(OfferOptions::default());
        assert_eq!(ctx.dispatcher().pending_operations(), 2);

        assert!(engine.fire_sdp_created(pc.handle(), 9, "v=0"));
        ctx.drain().unwrap();
        assert!(matches!(
            answer.try_result(),
            Some(Err(BridgeError::Native {
                kind: NativeErrorKind::InternalError,
                ..
            }))
        ));
        assert!(offer.is_pending());

        assert!(engine.fire_sdp_created(pc.handle(), SdpType::Rollback.code(), "v=0"));
        ctx.drain().unwrap();
        assert!(offer.is_failed());
        assert_eq!(ctx.dispatcher().pending_operations(), 0);

        // Nothing left to fail.
        assert!(engine.fire_sdp_created(pc.handle(), 9, "v=0"));
        ctx.drain().unwrap();
        assert_eq!(pc.pending_count(), 0);
    }

    #[test]
    fn test_off_thread_calls_are_rejected() {
        let (_ctx, _engine, pc) = setup();
        let remote = pc.clone();
        let result = std::thread::spawn(move || remote.get_stats().try_result()).join().unwrap();
        assert_eq!(result, Some(Err(BridgeError::WrongThread)));
    }
}
