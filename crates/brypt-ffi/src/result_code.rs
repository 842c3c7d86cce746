//! Maps `brypt_core::Error` onto the small, stable `ResultCode` every
//! `extern "C"` entry point returns. The match is exhaustive so adding a
//! new `Error` variant in `brypt-core` fails this file's build until it is
//! placed in a category here, rather than silently falling through to a
//! generic code.

use brypt_core::Error;

/// Coarse result categories a C caller can branch on without needing the
/// full error message (which is only available via `register_logger`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,

    // Generic.
    InvalidArgument = 1,
    NotFound = 2,
    NotAvailable = 3,
    NotSupported = 4,
    AlreadyStarted = 5,
    NotStarted = 6,
    OutOfMemory = 7,
    Canceled = 8,
    Timeout = 9,
    InProgress = 10,
    Conflict = 11,
    PayloadTooLarge = 12,
    Unspecified = 13,

    // Service / handshake.
    ServiceHandshakeRejected = 20,
    ServiceNotSynchronized = 21,
    ServiceAlreadySynchronized = 22,
    ServiceVerificationFailed = 23,
    ServiceShutdownRequested = 24,
    ServiceSessionClosed = 25,

    // Configuration.
    ConfigInvalid = 30,
    ConfigFileNotFound = 31,
    ConfigFileNotSupported = 32,

    // Network.
    NetworkBindingFailed = 40,
    NetworkConnectionFailed = 41,
    NetworkInvalidAddress = 42,
    NetworkAddressInUse = 43,
    NetworkNotConnected = 44,
    NetworkAlreadyConnected = 45,
    NetworkConnectionRefused = 46,
    NetworkDown = 47,
    NetworkUnreachable = 48,
    NetworkReset = 49,
    NetworkPermissions = 50,
}

impl From<&Error> for ResultCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::InvalidArgument(_) => ResultCode::InvalidArgument,
            Error::NotFound(_) => ResultCode::NotFound,
            Error::NotAvailable(_) => ResultCode::NotAvailable,
            Error::NotSupported(_) => ResultCode::NotSupported,
            Error::AlreadyStarted => ResultCode::AlreadyStarted,
            Error::NotStarted => ResultCode::NotStarted,
            Error::OutOfMemory => ResultCode::OutOfMemory,
            Error::Canceled => ResultCode::Canceled,
            Error::Timeout => ResultCode::Timeout,
            Error::InProgress => ResultCode::InProgress,
            Error::Conflict(_) => ResultCode::Conflict,
            Error::PayloadTooLarge(_) => ResultCode::PayloadTooLarge,
            Error::BindingFailed(_) => ResultCode::NetworkBindingFailed,
            Error::ConnectionFailed(_) => ResultCode::NetworkConnectionFailed,
            Error::InvalidAddress(_) => ResultCode::NetworkInvalidAddress,
            Error::AddressInUse(_) => ResultCode::NetworkAddressInUse,
            Error::NotConnected => ResultCode::NetworkNotConnected,
            Error::AlreadyConnected => ResultCode::NetworkAlreadyConnected,
            Error::ConnectionRefused => ResultCode::NetworkConnectionRefused,
            Error::NetworkDown => ResultCode::NetworkDown,
            Error::NetworkUnreachable => ResultCode::NetworkUnreachable,
            Error::NetworkReset => ResultCode::NetworkReset,
            Error::NetworkPermissions => ResultCode::NetworkPermissions,
            Error::SessionClosed => ResultCode::ServiceSessionClosed,
            Error::ShutdownRequested => ResultCode::ServiceShutdownRequested,
            Error::FileNotFound(_) => ResultCode::ConfigFileNotFound,
            Error::FileNotSupported(_) => ResultCode::ConfigFileNotSupported,
            Error::InvalidConfig(_) => ResultCode::ConfigInvalid,
            Error::HandshakeRejected(_) => ResultCode::ServiceHandshakeRejected,
            Error::NotSynchronized => ResultCode::ServiceNotSynchronized,
            Error::AlreadySynchronized => ResultCode::ServiceAlreadySynchronized,
            Error::VerificationFailed => ResultCode::ServiceVerificationFailed,
            Error::Unspecified(_) => ResultCode::Unspecified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_variant_maps_to_a_non_success_code() {
        let samples = [
            Error::InvalidArgument("x".into()),
            Error::NotFound("x".into()),
            Error::AlreadyStarted,
            Error::HandshakeRejected("x".into()),
            Error::VerificationFailed,
        ];
        for error in &samples {
            assert_ne!(ResultCode::from(error), ResultCode::Success);
        }
    }
}
