//! The core's error taxonomy.
//!
//! Every fallible operation in `brypt-core` returns this single flat enum so
//! that `brypt-ffi` can map it to a `ResultCode` with one exhaustive match
//! instead of downcasting.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("component not available: {0}")]
    NotAvailable(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("already started")]
    AlreadyStarted,

    #[error("not started")]
    NotStarted,

    #[error("out of memory")]
    OutOfMemory,

    #[error("canceled")]
    Canceled,

    #[error("timeout")]
    Timeout,

    #[error("operation already in progress")]
    InProgress,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("binding failed: {0}")]
    BindingFailed(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("address in use: {0}")]
    AddressInUse(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("network down")]
    NetworkDown,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("network reset")]
    NetworkReset,

    #[error("network permissions error")]
    NetworkPermissions,

    #[error("session closed")]
    SessionClosed,

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file not supported: {0}")]
    FileNotSupported(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Handshake-local, raised by the package synchronizer.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("synchronizer is not ready to produce a cipher package")]
    NotSynchronized,

    #[error("cipher package already finalized for this synchronizer")]
    AlreadySynchronized,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("unspecified error: {0}")]
    Unspecified(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Unspecified(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
