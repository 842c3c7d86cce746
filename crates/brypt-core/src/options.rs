//! Pre-start options the core is constructed from.
//!
//! The JSON config file parser/writer is out of scope for this crate; these
//! are the plain, `serde`-derived structures an external layer populates and
//! hands to `brypt-core` without the core ever reading a file itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::security::algorithms::ConfidentialityLevel;

/// Per confidentiality-level algorithm triples the cipher service is allowed
/// to negotiate: key agreement, cipher, and hash function names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlgorithmSuite {
    pub key_agreement: Vec<String>,
    pub cipher: Vec<String>,
    pub hash_function: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportedAlgorithms {
    pub levels: HashMap<ConfidentialityLevel, AlgorithmSuite>,
}

impl SupportedAlgorithms {
    pub fn suite_for(&self, level: ConfidentialityLevel) -> Option<&AlgorithmSuite> {
        self.levels.get(&level)
    }
}

impl Default for SupportedAlgorithms {
    fn default() -> Self {
        let mut levels = HashMap::new();
        levels.insert(
            ConfidentialityLevel::Low,
            AlgorithmSuite {
                key_agreement: vec!["x25519".into()],
                cipher: vec!["aes-256-ctr".into()],
                hash_function: vec!["sha256".into()],
            },
        );
        levels.insert(
            ConfidentialityLevel::Medium,
            AlgorithmSuite {
                key_agreement: vec!["x25519".into()],
                cipher: vec!["aes-256-ctr".into()],
                hash_function: vec!["sha256".into()],
            },
        );
        levels.insert(
            ConfidentialityLevel::High,
            AlgorithmSuite {
                key_agreement: vec!["kem-kyber768".into()],
                cipher: vec!["aes-256-ctr".into()],
                hash_function: vec!["sha384".into()],
            },
        );
        Self { levels }
    }
}

/// Connection policy handed to the peer proxy store and router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub timeout_ms: u64,
    pub retry_limit: u32,
    pub retry_interval_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_limit: 3,
            retry_interval_ms: 1_000,
        }
    }
}

/// Whether a node's identifier is regenerated on each start or persisted
/// across restarts. Kept as a small enum rather than a boolean since a
/// future option — e.g. a hardware-bound identity — would otherwise need
/// a third boolean state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdentifierPersistence {
    Ephemeral,
    Persisted,
}

impl Default for IdentifierPersistence {
    fn default() -> Self {
        IdentifierPersistence::Ephemeral
    }
}
