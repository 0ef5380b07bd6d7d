//! Soak test for rtcbridge-core against the loopback engine.
//!
//! Negotiates pairs of peer connections, echoes messages over every data
//! channel, then hammers the bridge with native callbacks fired from many
//! engine threads at once. Every callback fired while the context is alive
//! must be delivered exactly once on the designated thread (this one), and
//! teardown must leave no native object behind.
//!
//! Usage:
//!   cargo run --release --bin rtcbridge-soak -- --peers 8 --threads 16 --callbacks 50000

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rtcbridge_core::scheduler::sleep;
use rtcbridge_core::{
    BridgeConfig, DataChannel, DataChannelInit, DataChannelState, EngineContext, Handle, LoopbackEngine,
    OfferOptions, PeerConnection, RtcConfiguration, Scheduler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtcbridge-soak", about = "Native callback soak test for rtcbridge-core")]
struct Args {
    /// Bridge config file (TOML). Defaults to the per-user config path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peer connections to create, negotiated in pairs
    #[arg(long, default_value = "4")]
    peers: usize,

    /// Data channels per peer connection
    #[arg(long, default_value = "2")]
    channels: usize,

    /// Engine threads firing callbacks concurrently
    #[arg(long, default_value = "8")]
    threads: usize,

    /// Callbacks fired per engine thread
    #[arg(long, default_value = "10000")]
    callbacks: usize,

    /// Echo messages per data channel
    #[arg(long, default_value = "100")]
    messages: usize,

    /// Simulated engine latency for asynchronous callbacks (ms)
    #[arg(long, default_value = "0")]
    callback_delay_ms: u64,

    /// Timeout for the entire run (seconds)
    #[arg(long, default_value = "60")]
    timeout_secs: u64,
}

/// Delivery counters, bumped by handlers on the designated thread.
#[derive(Default)]
struct Counters {
    echoed: AtomicUsize,
    stormed: AtomicUsize,
    state_changes: AtomicUsize,
}

fn init_tracing() -> Result<()> {
    // JSON logs with RTCBRIDGE_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("RTCBRIDGE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("rtcbridge_core=info".parse()?)
        .add_directive("rtcbridge::native=info".parse()?)
        .add_directive("rtcbridge_soak=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

/// Block on the scheduler until `done` holds or the run deadline passes.
fn wait_until(scheduler: &Scheduler, deadline: Instant, what: &str, done: impl Fn() -> bool) -> Result<()> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    scheduler
        .block_on_timeout(
            async {
                while !done() {
                    sleep(Duration::from_millis(1)).await;
                }
            },
            remaining,
        )
        .with_context(|| format!("timed out waiting for {what}"))
}

async fn negotiate(caller: &PeerConnection, callee: &PeerConnection) -> rtcbridge_core::Result<()> {
    let offer = caller.create_offer(OfferOptions::default()).await?;
    caller.set_local_description(&offer).await?;
    callee.set_remote_description(&offer).await?;
    let answer = callee.create_answer(OfferOptions::default()).await?;
    callee.set_local_description(&answer).await?;
    caller.set_remote_description(&answer).await?;

    for candidate in caller.local_candidates() {
        callee.add_ice_candidate(&candidate)?;
    }
    for candidate in callee.local_candidates() {
        caller.add_ice_candidate(&candidate)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(BridgeConfig::default_path);
    let config = BridgeConfig::load(&config_path)?.apply_env();
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let started_at = chrono::Utc::now();

    println!("🔥 rtcbridge soak test");
    println!("   Config:     {}", config_path.display());
    println!("   Peers:      {}", args.peers);
    println!("   Channels:   {} per peer", args.channels);
    println!("   Threads:    {}", args.threads);
    println!("   Callbacks:  {} per thread", args.callbacks);
    println!("   Messages:   {} per channel", args.messages);
    println!("   Timeout:    {}s", args.timeout_secs);
    println!();

    let engine = Arc::new(LoopbackEngine::new().with_callback_delay(Duration::from_millis(args.callback_delay_ms)));
    let ctx = EngineContext::new(engine.clone(), config)?;
    let scheduler = Scheduler::for_context(&ctx)?;
    let counters = Arc::new(Counters::default());

    // Phase 1: create and negotiate
    println!("📡 Creating {} peer connections...", args.peers);
    let start = Instant::now();
    let mut peers = Vec::with_capacity(args.peers);
    for _ in 0..args.peers {
        let pc = ctx.create_peer_connection(&RtcConfiguration::default())?;
        let counters = counters.clone();
        pc.on_connection_state_change(move |_| {
            counters.state_changes.fetch_add(1, Ordering::Relaxed);
        });
        peers.push(pc);
    }
    for pair in peers.chunks_exact(2) {
        scheduler
            .block_on_timeout(negotiate(&pair[0], &pair[1]), deadline.saturating_duration_since(Instant::now()))
            .context("negotiation timed out")??;
    }
    if peers.len() % 2 == 1 {
        tracing::warn!("odd peer count, last peer connection left unnegotiated");
    }

    let mut channels: Vec<Arc<DataChannel>> = Vec::new();
    for (p, pc) in peers.iter().enumerate() {
        for c in 0..args.channels {
            let dc = pc.create_data_channel(&format!("soak-{p}-{c}"), &DataChannelInit::default())?;
            let counters = counters.clone();
            dc.on_message(move |m| {
                let counter = if m.binary { &counters.stormed } else { &counters.echoed };
                counter.fetch_add(1, Ordering::Relaxed);
            });
            channels.push(dc);
        }
    }
    wait_until(&scheduler, deadline, "data channels to open", || {
        channels.iter().all(|dc| dc.ready_state() == DataChannelState::Open)
    })?;
    println!("   Ready in {:.1}s", start.elapsed().as_secs_f64());

    // Phase 2: echo
    println!("💬 Echoing {} messages...", args.messages * channels.len());
    let start = Instant::now();
    for dc in &channels {
        for i in 0..args.messages {
            dc.send_text(&format!("soak:{}:{i}", dc.label()))?;
        }
    }
    let expected_echoes = args.messages * channels.len();
    wait_until(&scheduler, deadline, "echoes", || {
        counters.echoed.load(Ordering::Relaxed) >= expected_echoes
    })?;
    let echo_elapsed = start.elapsed();

    // Phase 3: callback storm
    engine.quiesce();
    ctx.drain()?;
    let state_changes_before = counters.state_changes.load(Ordering::Relaxed);
    println!("🌪️  Firing {} callbacks from {} threads...", args.threads * args.callbacks, args.threads);
    let start = Instant::now();
    let dc_handles: Vec<Handle> = channels.iter().map(|dc| dc.handle()).collect();
    let pc_handles: Vec<Handle> = peers.iter().map(|pc| pc.handle()).collect();
    let storms: Vec<_> = (0..args.threads)
        .map(|t| {
            let engine = engine.clone();
            let (dc_handles, pc_handles) = (dc_handles.clone(), pc_handles.clone());
            let callbacks = args.callbacks;
            thread::spawn(move || {
                let (mut messages, mut states) = (0usize, 0usize);
                for i in 0..callbacks {
                    if i % 2 == 0 && !dc_handles.is_empty() {
                        let dc = dc_handles[(t + i) % dc_handles.len()];
                        if engine.fire_message(dc, &i.to_le_bytes(), true) {
                            messages += 1;
                        }
                    } else if !pc_handles.is_empty() {
                        let pc = pc_handles[(t + i) % pc_handles.len()];
                        // Connected: the storm must not change what handlers see.
                        if engine.fire_connection_state(pc, 2) {
                            states += 1;
                        }
                    }
                }
                (messages, states)
            })
        })
        .collect();

    wait_until(&scheduler, deadline, "storm threads", || storms.iter().all(|s| s.is_finished()))?;
    let (mut fired_messages, mut fired_states) = (0usize, 0usize);
    for storm in storms {
        match storm.join() {
            Ok((messages, states)) => {
                fired_messages += messages;
                fired_states += states;
            }
            Err(_) => bail!("storm thread panicked"),
        }
    }
    engine.quiesce();
    ctx.drain()?;
    let storm_elapsed = start.elapsed();

    // Phase 4: stats
    let mut bytes_sent = 0u64;
    for pc in &peers {
        let report = scheduler
            .block_on_timeout(pc.get_stats(), deadline.saturating_duration_since(Instant::now()))
            .context("stats timed out")??;
        bytes_sent += report.data_channels().map(|dc| dc.bytes_sent).sum::<u64>();
    }

    // Phase 5: teardown
    println!("🧹 Disposing context...");
    let wrappers = ctx.wrapper_count();
    ctx.dispose();
    let finished_at = chrono::Utc::now();

    let echoed = counters.echoed.load(Ordering::Relaxed);
    let stormed = counters.stormed.load(Ordering::Relaxed);
    let state_changes = counters.state_changes.load(Ordering::Relaxed) - state_changes_before;
    println!();
    println!("📊 Results ({} → {})", started_at.to_rfc3339(), finished_at.to_rfc3339());
    println!("   Wrappers at teardown: {wrappers}");
    println!("   Echoed:         {echoed}/{expected_echoes} in {:.2}s", echo_elapsed.as_secs_f64());
    println!("   Storm messages: {stormed}/{fired_messages}");
    println!("   Storm states:   {state_changes}/{fired_states}");
    println!(
        "   Throughput:     {:.0} callbacks/sec",
        (fired_messages + fired_states) as f64 / storm_elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("   Bytes echoed:   {bytes_sent}");
    println!("   Native leaks:   {} live, {} orphaned", engine.live_handles(), engine.leaked_handles());
    println!();

    let mut failures = Vec::new();
    if echoed != expected_echoes {
        failures.push(format!("echoed {echoed}, expected {expected_echoes}"));
    }
    if stormed != fired_messages {
        failures.push(format!("delivered {stormed} storm messages, fired {fired_messages}"));
    }
    if state_changes != fired_states {
        failures.push(format!("delivered {state_changes} state changes, fired {fired_states}"));
    }
    if engine.live_handles() != 0 || engine.leaked_handles() != 0 {
        failures.push("native objects outlived the context".to_string());
    }

    if failures.is_empty() {
        println!("✅ PASS");
        Ok(())
    } else {
        for failure in &failures {
            eprintln!("  ❌ {failure}");
        }
        bail!("soak failed: {} check(s)", failures.len())
    }
}
