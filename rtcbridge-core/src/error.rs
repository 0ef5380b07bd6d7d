//! Error taxonomy for the bridge, the handle registry and the marshalling layer.

use std::fmt;

use crate::handle::Handle;

/// Error codes reported by the native engine for failed operations.
///
/// Every native entry point that reports a status uses these values;
/// `None` (0) means success.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeErrorKind {
    None = 0,
    UnsupportedOperation = 1,
    UnsupportedParameter = 2,
    InvalidParameter = 3,
    InvalidRange = 4,
    SyntaxError = 5,
    InvalidState = 6,
    InvalidModification = 7,
    NetworkError = 8,
    ResourceExhausted = 9,
    InternalError = 10,
    OperationErrorWithData = 11,
}

impl NativeErrorKind {
    /// Map a raw status code. Codes outside the known range are reported as
    /// `InternalError`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::UnsupportedOperation,
            2 => Self::UnsupportedParameter,
            3 => Self::InvalidParameter,
            4 => Self::InvalidRange,
            5 => Self::SyntaxError,
            6 => Self::InvalidState,
            7 => Self::InvalidModification,
            8 => Self::NetworkError,
            9 => Self::ResourceExhausted,
            11 => Self::OperationErrorWithData,
            _ => Self::InternalError,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Self::None
    }
}

impl fmt::Display for NativeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::UnsupportedOperation => "unsupported operation",
            Self::UnsupportedParameter => "unsupported parameter",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidRange => "invalid range",
            Self::SyntaxError => "syntax error",
            Self::InvalidState => "invalid state",
            Self::InvalidModification => "invalid modification",
            Self::NetworkError => "network error",
            Self::ResourceExhausted => "resource exhausted",
            Self::InternalError => "internal error",
            Self::OperationErrorWithData => "operation error",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the core.
///
/// `Clone` so a failed [`AsyncOp`](crate::future::AsyncOp) can hand the same
/// error to every awaiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The handle is already in the registry (native/managed bookkeeping bug).
    #[error("handle {0} is already registered")]
    DuplicateHandle(Handle),
    /// The handle is not in the registry; its wrapper was disposed or never created.
    #[error("handle {0} is not registered")]
    UnknownHandle(Handle),
    /// A null source pointer, null handle or otherwise unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The owning wrapper was disposed while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,
    /// The engine context (and its dispatcher) has been torn down.
    #[error("engine context has been disposed")]
    ContextDisposed,
    /// A designated-thread-only operation was called from another thread.
    #[error("called off the designated thread")]
    WrongThread,
    /// A blocking submission gave up waiting for the designated thread.
    #[error("timed out waiting for the designated thread")]
    Timeout,
    /// The submitted work item panicked while running on the designated thread.
    #[error("work item panicked: {0}")]
    CallbackPanicked(String),
    /// The native engine rejected an operation.
    #[error("native engine error ({kind}): {message}")]
    Native {
        kind: NativeErrorKind,
        message: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("scheduler runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    pub fn native(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self::Native {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
