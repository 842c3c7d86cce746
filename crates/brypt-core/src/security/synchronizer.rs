//! `PackageSynchronizer` — the three-stage handshake state machine:
//! constructed for a role, fed wire messages until `status()` reports
//! `Ready`, then consumed into a `CipherPackage`.
//!
//! The initiator offers every confidentiality level it is configured for in
//! one stage 0 message; the acceptor walks its own levels strongest first
//! and picks the highest one where both sides also share a key-agreement,
//! cipher, and hash-function name.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::options::SupportedAlgorithms;

use super::algorithms::{ConfidentialityLevel, ExchangeRole, SynchronizationStatus};
use super::kex::{self, KeyAgreement};
use super::package::CipherPackage;
use super::wire::{LevelOffer, StageOneMessage, StageTwoMessage, StageZeroMessage};

/// An initiator's in-flight ephemeral material for one key-agreement
/// algorithm, generated once and reused across every level that offers it.
struct PendingAgreement {
    algorithm: Box<dyn KeyAgreement>,
    secret: Vec<u8>,
    public_material: Vec<u8>,
}

enum Stage {
    /// Initiator: stage 0 sent, one pending agreement per distinct
    /// key-agreement algorithm name offered, keyed by that name.
    AwaitingStageOne { agreements: HashMap<String, PendingAgreement> },
    /// Acceptor: waiting for stage 0, holding its own options to negotiate against.
    AwaitingStageZero { supported: Arc<SupportedAlgorithms> },
    /// Acceptor: stage 1 sent, waiting for the initiator's verification.
    AwaitingStageTwo { transcript: Vec<u8>, package: CipherPackage },
    Ready(CipherPackage),
    Error(String),
}

pub struct PackageSynchronizer {
    role: ExchangeRole,
    cipher: String,
    hash_function: String,
    stage: Stage,
}

impl PackageSynchronizer {
    /// Starts an initiator handshake, returning the synchronizer and the
    /// stage 0 message to send to the peer. Offers every confidentiality
    /// level `supported` configures, generating ephemeral material once per
    /// distinct key-agreement algorithm name across all of them.
    pub fn initiate(supported: &SupportedAlgorithms) -> Result<(Self, StageZeroMessage)> {
        let mut agreements: HashMap<String, PendingAgreement> = HashMap::new();
        let mut levels = Vec::new();

        for level in ConfidentialityLevel::descending() {
            let Some(suite) = supported.suite_for(level) else { continue };
            if suite.key_agreement.is_empty() || suite.cipher.is_empty() || suite.hash_function.is_empty() {
                continue;
            }
            for name in &suite.key_agreement {
                agreements.entry(name.clone()).or_insert_with(|| {
                    let algorithm = kex::by_name(name).expect("configured key agreement name must be known");
                    let (secret, public_material) = algorithm.generate_initiator();
                    PendingAgreement { algorithm, secret, public_material }
                });
            }
            levels.push(LevelOffer {
                level,
                key_agreement: suite.key_agreement.clone(),
                cipher: suite.cipher.clone(),
                hash_function: suite.hash_function.clone(),
            });
        }

        if levels.is_empty() {
            return Err(Error::InvalidConfig("no confidentiality levels configured".into()));
        }

        let public_material = agreements
            .iter()
            .map(|(name, pending)| (name.clone(), pending.public_material.clone()))
            .collect();

        let message = StageZeroMessage { levels, public_material };
        let synchronizer = Self {
            role: ExchangeRole::Initiator,
            cipher: String::new(),
            hash_function: String::new(),
            stage: Stage::AwaitingStageOne { agreements },
        };
        Ok((synchronizer, message))
    }

    /// Starts an acceptor handshake against its own configured options.
    /// Call `receive_stage_zero` next.
    pub fn accept(supported: Arc<SupportedAlgorithms>) -> Self {
        Self {
            role: ExchangeRole::Acceptor,
            cipher: String::new(),
            hash_function: String::new(),
            stage: Stage::AwaitingStageZero { supported },
        }
    }

    pub fn role(&self) -> ExchangeRole {
        self.role
    }

    pub fn status(&self) -> SynchronizationStatus {
        match &self.stage {
            Stage::Ready(_) => SynchronizationStatus::Ready,
            Stage::Error(_) => SynchronizationStatus::Error,
            _ => SynchronizationStatus::Processing,
        }
    }

    /// Acceptor: processes stage 0, returns the stage 1 reply.
    pub fn receive_stage_zero(&mut self, message: &StageZeroMessage) -> Result<StageOneMessage> {
        let Stage::AwaitingStageZero { supported } = &self.stage else {
            return Err(Error::Conflict("synchronizer is not awaiting stage 0".into()));
        };

        let Some((level, key_agreement, cipher, hash_function, initiator_public)) =
            select_mutual_triple(supported, message)
        else {
            self.stage = Stage::Error("no mutually supported confidentiality level".into());
            return Ok(StageOneMessage {
                accepted: false,
                selected_level: ConfidentialityLevel::Unknown,
                selected_key_agreement: String::new(),
                selected_cipher: String::new(),
                selected_hash_function: String::new(),
                public_material: Vec::new(),
                salt: Vec::new(),
            });
        };

        let algorithm = kex::by_name(&key_agreement)?;
        let (shared_secret, public_material) = algorithm.respond(&initiator_public)?;
        self.cipher = cipher.clone();
        self.hash_function = hash_function.clone();
        let package = CipherPackage::derive(&shared_secret, &self.hash_function)?;

        let mut salt = vec![0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);

        let reply = StageOneMessage {
            accepted: true,
            selected_level: level,
            selected_key_agreement: key_agreement,
            selected_cipher: cipher,
            selected_hash_function: hash_function,
            public_material,
            salt: salt.clone(),
        };

        let transcript = transcript_digest(&initiator_public, &reply.public_material, &reply.salt);
        self.stage = Stage::AwaitingStageTwo { transcript, package };
        Ok(reply)
    }

    /// Initiator: processes stage 1, returns the stage 2 verification message.
    pub fn receive_stage_one(&mut self, message: &StageOneMessage) -> Result<StageTwoMessage> {
        let Stage::AwaitingStageOne { agreements } = &self.stage else {
            return Err(Error::Conflict("synchronizer is not awaiting stage 1".into()));
        };
        if !message.accepted {
            self.stage = Stage::Error("acceptor rejected all offered confidentiality levels".into());
            return Err(Error::HandshakeRejected(
                "acceptor supports none of the proposed confidentiality levels".into(),
            ));
        }
        let Some(pending) = agreements.get(&message.selected_key_agreement) else {
            self.stage = Stage::Error("acceptor selected an algorithm not offered".into());
            return Err(Error::HandshakeRejected(
                "acceptor selected a key agreement algorithm outside the offered candidates".into(),
            ));
        };

        let shared_secret = pending.algorithm.finalize(&pending.secret, &message.public_material)?;
        self.cipher = message.selected_cipher.clone();
        self.hash_function = message.selected_hash_function.clone();
        let package = CipherPackage::derive(&shared_secret, &self.hash_function)?;
        let transcript = transcript_digest(&pending.public_material, &message.public_material, &message.salt);
        let signature = package.sign(&transcript);
        self.stage = Stage::Ready(package);
        Ok(StageTwoMessage { transcript_signature: signature })
    }

    /// Acceptor: processes stage 2, finalizing the handshake.
    pub fn receive_stage_two(&mut self, message: &StageTwoMessage) -> Result<()> {
        let Stage::AwaitingStageTwo { transcript, package } = &self.stage else {
            return Err(Error::Conflict("synchronizer is not awaiting stage 2".into()));
        };
        package.verify(transcript, &message.transcript_signature)?;
        let package = package.clone();
        self.stage = Stage::Ready(package);
        Ok(())
    }

    /// Consumes a `Ready` synchronizer into its cipher package.
    pub fn finalize(self) -> Result<CipherPackage> {
        match self.stage {
            Stage::Ready(package) => Ok(package),
            _ => Err(Error::NotSynchronized),
        }
    }
}

/// Walks `supported`'s levels strongest first, returning the highest one
/// where `message` also offers it with at least one matching key-agreement,
/// cipher, and hash-function name, plus the initiator's public material for
/// the chosen key-agreement algorithm.
fn select_mutual_triple(
    supported: &SupportedAlgorithms,
    message: &StageZeroMessage,
) -> Option<(ConfidentialityLevel, String, String, String, Vec<u8>)> {
    for level in ConfidentialityLevel::descending() {
        let Some(own_suite) = supported.suite_for(level) else { continue };
        let Some(offer) = message.levels.iter().find(|offer| offer.level == level) else { continue };

        let Some(key_agreement) =
            own_suite.key_agreement.iter().find(|name| offer.key_agreement.contains(name))
        else {
            continue;
        };
        let Some(cipher) = own_suite.cipher.iter().find(|name| offer.cipher.contains(name)) else { continue };
        let Some(hash_function) =
            own_suite.hash_function.iter().find(|name| offer.hash_function.contains(name))
        else {
            continue;
        };
        let Some((_, public_material)) =
            message.public_material.iter().find(|(name, _)| name == key_agreement)
        else {
            continue;
        };

        return Some((level, key_agreement.clone(), cipher.clone(), hash_function.clone(), public_material.clone()));
    }
    None
}

fn transcript_digest(initiator_public: &[u8], acceptor_public: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(initiator_public);
    hasher.update(acceptor_public);
    hasher.update(salt);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SupportedAlgorithms;

    #[test]
    fn full_handshake_reaches_ready_on_both_sides() {
        let supported = SupportedAlgorithms::default();
        let (mut initiator, stage_zero) = PackageSynchronizer::initiate(&supported).unwrap();
        let mut acceptor = PackageSynchronizer::accept(Arc::new(SupportedAlgorithms::default()));

        let stage_one = acceptor.receive_stage_zero(&stage_zero).unwrap();
        assert!(stage_one.accepted);
        assert_eq!(stage_one.selected_level, ConfidentialityLevel::High);

        let stage_two = initiator.receive_stage_one(&stage_one).unwrap();
        acceptor.receive_stage_two(&stage_two).unwrap();

        assert_eq!(initiator.status(), SynchronizationStatus::Ready);
        assert_eq!(acceptor.status(), SynchronizationStatus::Ready);

        let initiator_package = initiator.finalize().unwrap();
        let acceptor_package = acceptor.finalize().unwrap();
        let ciphertext = initiator_package.encrypt(b"ping");
        assert_eq!(acceptor_package.decrypt(&ciphertext).unwrap(), b"ping");
    }

    #[test]
    fn negotiation_settles_on_the_highest_level_both_sides_configure() {
        let mut initiator_levels = HashMap::new();
        initiator_levels.insert(
            ConfidentialityLevel::Low,
            crate::options::AlgorithmSuite {
                key_agreement: vec!["x25519".into()],
                cipher: vec!["aes-256-ctr".into()],
                hash_function: vec!["sha256".into()],
            },
        );
        let initiator_supported = SupportedAlgorithms { levels: initiator_levels };

        let (mut initiator, stage_zero) = PackageSynchronizer::initiate(&initiator_supported).unwrap();
        let mut acceptor = PackageSynchronizer::accept(Arc::new(SupportedAlgorithms::default()));
        let stage_one = acceptor.receive_stage_zero(&stage_zero).unwrap();
        assert!(stage_one.accepted);
        assert_eq!(stage_one.selected_level, ConfidentialityLevel::Low);
        initiator.receive_stage_one(&stage_one).unwrap();
    }

    #[test]
    fn unfinished_synchronizer_cannot_finalize() {
        let synchronizer = PackageSynchronizer::accept(Arc::new(SupportedAlgorithms::default()));
        assert!(matches!(synchronizer.status(), SynchronizationStatus::Processing));
        assert!(synchronizer.finalize().is_err());
    }
}
