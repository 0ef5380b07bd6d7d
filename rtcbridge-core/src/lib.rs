//! Managed bridge over a native WebRTC engine's C ABI.
//!
//! The engine calls back on threads it owns. Every callback is marshalled,
//! then posted to a single designated thread through a [`Dispatcher`], where
//! it is routed by handle to the live wrapper in the context's
//! [`HandleRegistry`]. Wrappers form a tree rooted at an [`EngineContext`];
//! disposing the context tears down every wrapper, dependents first.
//!
//! [`LoopbackEngine`] is an in-process engine with the same threading
//! behaviour, used by the tests and the soak driver. Enable the `linked`
//! feature for [`native::ffi::LinkedEngine`].

pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod handle;
pub mod marshal;
pub mod native;
pub mod peer;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod trampoline;
pub mod types;

pub use channel::DataChannel;
pub use config::BridgeConfig;
pub use context::{ContextRemote, EngineContext};
pub use dispatch::{Dispatcher, PendingGuard};
pub use error::{BridgeError, NativeErrorKind, Result};
pub use future::{AsyncOp, OpStatus};
pub use handle::Handle;
pub use native::loopback::LoopbackEngine;
pub use native::{CallbackTable, NativeEngine};
pub use peer::PeerConnection;
pub use registry::{HandleRegistry, NativeWrapper};
pub use scheduler::Scheduler;
pub use stats::{RtcStats, StatsReport};
pub use trampoline::TRAMPOLINES;
pub use types::{
    BundlePolicy, DataChannelInit, DataChannelMessage, DataChannelState, IceCandidate, IceConnectionState, IceServer,
    IceTransportPolicy, MediaKind, OfferOptions, PeerConnectionState, RtcConfiguration, SdpType, SessionDescription,
};
