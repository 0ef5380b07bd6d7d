//! End-to-end lifecycle tests against the loopback engine.
//!
//! Tests cover:
//! - Offer/answer negotiation awaited on the designated thread
//! - Data channel echo, stats reports and codec capabilities
//! - Cascading dispose with stalled operations in flight
//! - Late and malformed callbacks after a wrapper is gone
//! - Native log forwarding through tracing

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use rtcbridge_core::{
    BridgeConfig, BridgeError, DataChannelInit, DataChannelState, EngineContext, IceConnectionState, IceServer,
    LoopbackEngine, MediaKind, NativeErrorKind, NativeWrapper, OfferOptions, PeerConnectionState, RtcConfiguration,
    Scheduler, SdpType,
};

const WAIT: Duration = Duration::from_secs(5);

fn context_with(config: BridgeConfig) -> (EngineContext, Arc<LoopbackEngine>) {
    let engine = Arc::new(LoopbackEngine::new());
    let ctx = EngineContext::new(engine.clone(), config).unwrap();
    (ctx, engine)
}

fn context() -> (EngineContext, Arc<LoopbackEngine>) {
    context_with(BridgeConfig::default())
}

/// Join the engine's callback threads, then run everything they posted.
fn deliver_all(ctx: &EngineContext, engine: &LoopbackEngine) {
    engine.quiesce();
    ctx.drain().unwrap();
}

#[test]
fn offer_answer_connects_both_peers() {
    let (ctx, engine) = context();
    let scheduler = Scheduler::for_context(&ctx).unwrap();
    let caller = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let callee = ctx
        .create_peer_connection(&RtcConfiguration {
            ice_servers: vec![IceServer::new("stun:stun.example.org:3478")],
            ..RtcConfiguration::default()
        })
        .unwrap();

    let negotiated: rtcbridge_core::Result<()> = scheduler.block_on(async {
        let offer = caller.create_offer(OfferOptions::default()).await?;
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        caller.set_local_description(&offer).await?;
        callee.set_remote_description(&offer).await?;

        let answer = callee.create_answer(OfferOptions::default()).await?;
        assert_eq!(answer.sdp_type, SdpType::Answer);
        callee.set_local_description(&answer).await?;
        caller.set_remote_description(&answer).await?;
        Ok(())
    });
    negotiated.unwrap();

    deliver_all(&ctx, &engine);
    for pc in [&caller, &callee] {
        assert_eq!(pc.connection_state(), PeerConnectionState::Connected);
        assert_eq!(pc.ice_connection_state(), IceConnectionState::Connected);
        assert_eq!(pc.local_candidates().len(), 1);
    }

    // Trickle the caller's candidate to the callee.
    let candidate = caller.local_candidates().remove(0);
    callee.add_ice_candidate(&candidate).unwrap();
    assert_eq!(engine.ice_candidates_added(callee.handle()), 1);
}

#[test]
fn answer_without_remote_offer_fails() {
    let (ctx, _engine) = context();
    let scheduler = Scheduler::for_context(&ctx).unwrap();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();

    let result = scheduler
        .block_on_timeout(pc.create_answer(OfferOptions::default()), WAIT)
        .unwrap();
    match result {
        Err(BridgeError::Native { kind, .. }) => assert_eq!(kind, NativeErrorKind::InvalidState),
        other => panic!("expected an InvalidState failure, got {other:?}"),
    }
}

#[test]
fn data_channel_echo_and_stats() {
    let (ctx, engine) = context();
    let scheduler = Scheduler::for_context(&ctx).unwrap();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let init = DataChannelInit {
        ordered: Some(true),
        protocol: "json".into(),
        ..DataChannelInit::default()
    };
    let dc = pc.create_data_channel("chat", &init).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    dc.on_message(move |m| {
        let _ = tx.send(m.clone());
    });

    deliver_all(&ctx, &engine);
    assert_eq!(dc.ready_state(), DataChannelState::Open);

    dc.send_text(r#"{"hello":"world"}"#).unwrap();
    let echoed = scheduler.block_on_timeout(rx.recv(), WAIT).unwrap().unwrap();
    assert!(!echoed.binary);
    assert_eq!(echoed.text(), Some(r#"{"hello":"world"}"#));

    let report = scheduler.block_on_timeout(pc.get_stats(), WAIT).unwrap().unwrap();
    let channel = report.data_channels().next().unwrap();
    assert_eq!(channel.label, "chat");
    assert_eq!(channel.state, "open");
    assert_eq!(channel.messages_sent, 1);
    assert_eq!(channel.bytes_sent, 17);
    assert_eq!(report.peer_connection().unwrap().data_channels_opened, 1);
    assert_eq!(report.selected_candidate_pair().unwrap().id, "CP0");
    // Vendor entries are skipped rather than failing the report.
    assert!(report.get("X0").is_none());
    assert!(report.iter().all(|s| s.kind() != "x-loopback"));
}

#[test]
fn malformed_stats_report_fails_pending_request() {
    let (ctx, engine) = context();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();

    engine.set_stall_async_ops(true);
    let stats = pc.get_stats();
    assert!(engine.fire_stats_json(pc.handle(), r#"{"type":"codec"}"#));
    ctx.drain().unwrap();

    match stats.error() {
        Some(BridgeError::Native { kind, .. }) => assert_eq!(kind, NativeErrorKind::SyntaxError),
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn codec_capabilities_per_kind() {
    let (ctx, _engine) = context();
    let audio = ctx.codec_capabilities(MediaKind::Audio).unwrap();
    assert_eq!(audio.len(), 3);
    assert_eq!(audio["audio/telephone-event"], "0-15");
    let video = ctx.codec_capabilities(MediaKind::Video).unwrap();
    assert!(video["video/H264"].contains("packetization-mode=1"));
    assert_eq!(video["video/AV1"], "");
}

#[test]
fn dispose_cancels_stalled_operations_and_tears_down_tree() {
    let (ctx, engine) = context_with(BridgeConfig {
        teardown_timeout_ms: 50,
        ..BridgeConfig::default()
    });
    let peers: Vec<_> = (0..3)
        .map(|_| ctx.create_peer_connection(&RtcConfiguration::default()).unwrap())
        .collect();
    let channels: Vec<_> = peers
        .iter()
        .flat_map(|pc| {
            (0..2)
                .map(|i| pc.create_data_channel(&format!("dc{i}"), &DataChannelInit::default()).unwrap())
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(ctx.wrapper_count(), 9);
    assert_eq!(engine.live_handles(), 10);

    engine.set_stall_async_ops(true);
    let offers: Vec<_> = peers.iter().map(|pc| pc.create_offer(OfferOptions::default())).collect();
    let stats: Vec<_> = peers.iter().map(|pc| pc.get_stats()).collect();
    let dispatcher = ctx.dispatcher();
    assert_eq!(dispatcher.pending_operations(), 6);

    ctx.dispose();

    for op in &offers {
        assert_eq!(op.error(), Some(BridgeError::Cancelled));
    }
    for op in &stats {
        assert_eq!(op.error(), Some(BridgeError::Cancelled));
    }
    assert_eq!(dispatcher.pending_operations(), 0);
    assert!(dispatcher.is_shut_down());

    assert!(peers.iter().all(|pc| pc.is_disposed()));
    assert!(channels.iter().all(|dc| dc.is_disposed()));
    assert_eq!(ctx.wrapper_count(), 0);
    assert!(ctx.live_handles().is_empty());
    assert_eq!(
        ctx.peer_connection(peers[0].handle()).err(),
        Some(BridgeError::UnknownHandle(peers[0].handle()))
    );
    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.leaked_handles(), 0);
}

#[test]
fn operations_after_dispose_are_rejected() {
    let (ctx, _engine) = context();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let dc = pc.create_data_channel("x", &DataChannelInit::default()).unwrap();
    ctx.dispose();

    assert_eq!(
        pc.create_offer(OfferOptions::default()).error(),
        Some(BridgeError::UnknownHandle(pc.handle()))
    );
    assert_eq!(dc.send_text("late"), Err(BridgeError::UnknownHandle(dc.handle())));
    assert_eq!(
        ctx.codec_capabilities(MediaKind::Audio).err(),
        Some(BridgeError::ContextDisposed)
    );
}

#[test]
fn late_callback_for_disposed_wrapper_is_dropped() {
    let (ctx, engine) = context();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let keep = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    keep.on_connection_state_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let gone = pc.handle();
    pc.dispose();
    assert_eq!(ctx.wrapper_count(), 1);

    // The engine still routes callbacks for the deleted handle.
    assert!(engine.fire_connection_state(gone, 2));
    assert!(engine.fire_connection_state(keep.handle(), 2));
    deliver_all(&ctx, &engine);

    assert_eq!(pc.connection_state(), PeerConnectionState::New);
    assert_eq!(keep.connection_state(), PeerConnectionState::Connected);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_state_codes_map_to_terminal_states() {
    let (ctx, engine) = context();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let dc = pc.create_data_channel("codes", &DataChannelInit::default()).unwrap();
    deliver_all(&ctx, &engine);

    assert!(engine.fire_connection_state(pc.handle(), 42));
    ctx.drain().unwrap();
    assert_eq!(pc.connection_state(), PeerConnectionState::Failed);

    assert!(engine.fire_ice_candidate(pc.handle(), "candidate:9 1 udp 1 10.0.0.1 9 typ host", "", -1));
    ctx.drain().unwrap();
    let gathered = pc.local_candidates();
    assert_eq!(gathered.last().unwrap().sdp_mline_index, None);

    assert!(engine.fire_data_channel_state(dc.handle(), DataChannelState::Closing));
    ctx.drain().unwrap();
    assert_eq!(dc.ready_state(), DataChannelState::Closing);
}

#[test]
fn remote_close_cascades_channel_states() {
    let (ctx, engine) = context();
    let pc = ctx.create_peer_connection(&RtcConfiguration::default()).unwrap();
    let dc = pc.create_data_channel("bye", &DataChannelInit::default()).unwrap();
    deliver_all(&ctx, &engine);

    pc.close().unwrap();
    deliver_all(&ctx, &engine);
    assert_eq!(dc.ready_state(), DataChannelState::Closed);
    assert_eq!(pc.ice_connection_state(), IceConnectionState::Closed);
    assert_eq!(pc.connection_state(), PeerConnectionState::Closed);
    // Closing does not dispose: both wrappers stay registered.
    assert_eq!(ctx.wrapper_count(), 2);
}

#[derive(Clone)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn captured_logs(run: impl FnOnce()) -> String {
    let buffer = Capture(Arc::new(Mutex::new(Vec::new())));
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, run);
    let bytes = buffer.0.lock().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[test]
fn native_logs_forwarded_by_severity() {
    let (ctx, engine) = context();
    let out = captured_logs(|| {
        assert!(engine.fire_log(ctx.native_handle(), 2, "ice gathering is slow"));
        assert!(engine.fire_log(ctx.native_handle(), 7, "dtls alert"));
    });
    assert!(out.contains("rtcbridge::native"));
    assert!(out.lines().any(|l| l.contains("WARN") && l.contains("ice gathering is slow")));
    assert!(out.lines().any(|l| l.contains("ERROR") && l.contains("dtls alert")));
}

#[test]
fn native_logs_suppressed_when_disabled() {
    let (ctx, engine) = context_with(BridgeConfig {
        forward_native_logs: false,
        ..BridgeConfig::default()
    });
    let out = captured_logs(|| {
        assert!(engine.fire_log(ctx.native_handle(), 3, "should not appear"));
    });
    assert!(!out.contains("should not appear"));
}
