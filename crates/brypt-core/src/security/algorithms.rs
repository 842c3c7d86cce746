//! Enumerations and size limits shared across the cipher subsystem.

use serde::{Deserialize, Serialize};

/// How strong a session's negotiated cipher suite must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidentialityLevel {
    Unknown,
    Low,
    Medium,
    High,
}

impl ConfidentialityLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            ConfidentialityLevel::Unknown => 0,
            ConfidentialityLevel::Low => 1,
            ConfidentialityLevel::Medium => 2,
            ConfidentialityLevel::High => 3,
        }
    }

    pub fn from_u8(value: u8) -> crate::error::Result<Self> {
        match value {
            0 => Ok(ConfidentialityLevel::Unknown),
            1 => Ok(ConfidentialityLevel::Low),
            2 => Ok(ConfidentialityLevel::Medium),
            3 => Ok(ConfidentialityLevel::High),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "unknown confidentiality level tag {other}"
            ))),
        }
    }

    /// Every level a negotiation considers, strongest first.
    pub fn descending() -> [ConfidentialityLevel; 3] {
        [ConfidentialityLevel::High, ConfidentialityLevel::Medium, ConfidentialityLevel::Low]
    }
}

/// Which side of the handshake a synchronizer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeRole {
    Initiator,
    Acceptor,
}

/// Coarse synchronizer status surfaced to callers polling a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizationStatus {
    Error,
    Processing,
    Ready,
}

/// Result of verifying the final handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Failed,
    Success,
}

pub const MAXIMUM_SUPPORTED_ALGORITHM_ELEMENTS: usize = 16;
pub const MAXIMUM_SUPPORTED_ALGORITHM_NAME_SIZE: usize = 128;
pub const MAXIMUM_EXPECTED_PUBLIC_KEY_SIZE: usize = 512_000;
pub const MAXIMUM_EXPECTED_SALT_SIZE: usize = 8_192;
