//! Node identifiers.
//!
//! A peer is known internally by a compact numeric handle used as a map key,
//! and externally by a printable string exchanged on the wire and logged.
//! The external form is fixed to 31-33 printable bytes; the internal
//! form only needs to be cheap to hash and compare.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;

/// Lower/upper bound, in bytes, of the external printable identifier.
pub const EXTERNAL_IDENTIFIER_MIN_SIZE: usize = 31;
pub const EXTERNAL_IDENTIFIER_MAX_SIZE: usize = 33;

static NEXT_INTERNAL_IDENTIFIER: AtomicU64 = AtomicU64::new(1);

/// The internal numeric identifier used as a map key throughout the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternalIdentifier(u64);

impl InternalIdentifier {
    /// Allocates a fresh, process-unique internal identifier.
    pub fn generate() -> Self {
        Self(NEXT_INTERNAL_IDENTIFIER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InternalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The external, printable identifier exchanged with peers.
///
/// Encoded as lowercase hex over 16 random bytes, which yields a 32 character
/// printable form; well within the 31-33 byte window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalIdentifier(String);

impl ExternalIdentifier {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let encoded = bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        Self(encoded)
    }

    pub fn parse(value: impl Into<String>) -> crate::error::Result<Self> {
        let value = value.into();
        if value.len() < EXTERNAL_IDENTIFIER_MIN_SIZE || value.len() > EXTERNAL_IDENTIFIER_MAX_SIZE {
            return Err(crate::error::Error::InvalidArgument(format!(
                "external identifier must be {}-{} bytes, got {}",
                EXTERNAL_IDENTIFIER_MIN_SIZE,
                EXTERNAL_IDENTIFIER_MAX_SIZE,
                value.len()
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(crate::error::Error::InvalidArgument(
                "external identifier must be printable ASCII".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The pair a peer proxy carries: a fast internal key plus the printable
/// identity shown to the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentifier {
    pub internal: InternalIdentifier,
    pub external: ExternalIdentifier,
}

impl NodeIdentifier {
    pub fn generate() -> Self {
        Self {
            internal: InternalIdentifier::generate(),
            external: ExternalIdentifier::generate(),
        }
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_external_identifier_is_within_bounds() {
        let id = ExternalIdentifier::generate();
        assert!(id.as_str().len() >= EXTERNAL_IDENTIFIER_MIN_SIZE);
        assert!(id.as_str().len() <= EXTERNAL_IDENTIFIER_MAX_SIZE);
    }

    #[test]
    fn parse_rejects_short_and_long_identifiers() {
        assert!(ExternalIdentifier::parse("short").is_err());
        let too_long = "a".repeat(64);
        assert!(ExternalIdentifier::parse(too_long).is_err());
    }

    #[test]
    fn internal_identifiers_are_unique() {
        let a = InternalIdentifier::generate();
        let b = InternalIdentifier::generate();
        assert_ne!(a, b);
    }
}
