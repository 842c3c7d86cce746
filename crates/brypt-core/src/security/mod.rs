//! The cipher subsystem: confidentiality-level negotiation, the
//! `PackageSynchronizer` handshake, and the `CipherPackage` that results
//! from a completed handshake.

pub mod algorithms;
pub mod cipher_service;
pub mod kex;
pub mod package;
pub mod synchronizer;
pub mod wire;

pub use algorithms::{ConfidentialityLevel, ExchangeRole, SynchronizationStatus, VerificationStatus};
pub use cipher_service::CipherService;
pub use package::CipherPackage;
pub use synchronizer::PackageSynchronizer;
