//! Key agreement backends. One trait, two concrete algorithms, unifying the
//! classical Diffie-Hellman and post-quantum KEM shapes named as strings
//! ("x25519", "kem-kyber768").
//!
//! The initiator always publishes ephemeral public material first; the
//! acceptor always responds with either its own ephemeral public key
//! (classical DH) or a KEM ciphertext (encapsulation). Both resolve to a
//! raw shared-secret byte string that `CipherPackage` derives session keys
//! from via HKDF.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// A key-agreement algorithm, addressed by its wire name.
///
/// Implementations are trait objects (`Box<dyn KeyAgreement>`) so the
/// synchronizer can hold either backend behind one field regardless of how
/// differently shaped their internal secrets are.
pub trait KeyAgreement: Send + Sync {
    fn name(&self) -> &'static str;

    /// Initiator side, stage 0: produces the serialized secret to retain
    /// until stage 1 arrives, and the public material to send.
    fn generate_initiator(&self) -> (Vec<u8>, Vec<u8>);

    /// Acceptor side, stage 1: given the initiator's public material,
    /// returns `(shared_secret, acceptor_public_material)`.
    fn respond(&self, initiator_public: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Initiator side, stage 1 -> stage 2: given its own retained secret and
    /// the acceptor's response, derives the shared secret.
    fn finalize(&self, initiator_secret: &[u8], acceptor_public: &[u8]) -> Result<Vec<u8>>;
}

pub fn by_name(name: &str) -> Result<Box<dyn KeyAgreement>> {
    match name {
        "x25519" => Ok(Box::new(X25519Agreement)),
        "kem-kyber768" => Ok(Box::new(Kyber768Agreement)),
        other => Err(Error::NotSupported(format!("key agreement algorithm: {other}"))),
    }
}

pub struct X25519Agreement;

impl KeyAgreement for X25519Agreement {
    fn name(&self) -> &'static str {
        "x25519"
    }

    fn generate_initiator(&self) -> (Vec<u8>, Vec<u8>) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret.to_bytes().to_vec(), public.as_bytes().to_vec())
    }

    fn respond(&self, initiator_public: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let initiator_public = decode_x25519_public(initiator_public)?;
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let shared = secret.diffie_hellman(&initiator_public);
        Ok((shared.as_bytes().to_vec(), public.as_bytes().to_vec()))
    }

    fn finalize(&self, initiator_secret: &[u8], acceptor_public: &[u8]) -> Result<Vec<u8>> {
        let secret = decode_x25519_secret(initiator_secret)?;
        let acceptor_public = decode_x25519_public(acceptor_public)?;
        let shared = secret.diffie_hellman(&acceptor_public);
        Ok(shared.as_bytes().to_vec())
    }
}

fn decode_x25519_public(bytes: &[u8]) -> Result<PublicKey> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidArgument("x25519 public key must be 32 bytes".into()))?;
    Ok(PublicKey::from(array))
}

fn decode_x25519_secret(bytes: &[u8]) -> Result<StaticSecret> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidArgument("x25519 secret must be 32 bytes".into()))?;
    Ok(StaticSecret::from(array))
}

pub struct Kyber768Agreement;

impl KeyAgreement for Kyber768Agreement {
    fn name(&self) -> &'static str {
        "kem-kyber768"
    }

    fn generate_initiator(&self) -> (Vec<u8>, Vec<u8>) {
        let mut rng = rand::rngs::OsRng;
        let keypair = pqc_kyber::keypair(&mut rng).expect("kyber768 keypair generation failed");
        (keypair.secret.to_vec(), keypair.public.to_vec())
    }

    fn respond(&self, initiator_public: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut rng = rand::rngs::OsRng;
        let public: [u8; pqc_kyber::KYBER_PUBLICKEYBYTES] = initiator_public
            .try_into()
            .map_err(|_| Error::InvalidArgument("kyber768 public key has the wrong length".into()))?;
        let (ciphertext, shared_secret) = pqc_kyber::encapsulate(&public, &mut rng)
            .map_err(|_| Error::HandshakeRejected("kyber768 encapsulation failed".into()))?;
        Ok((shared_secret.to_vec(), ciphertext.to_vec()))
    }

    fn finalize(&self, initiator_secret: &[u8], acceptor_public: &[u8]) -> Result<Vec<u8>> {
        let secret: [u8; pqc_kyber::KYBER_SECRETKEYBYTES] = initiator_secret
            .try_into()
            .map_err(|_| Error::InvalidArgument("kyber768 secret key has the wrong length".into()))?;
        let ciphertext: [u8; pqc_kyber::KYBER_CIPHERTEXTBYTES] = acceptor_public
            .try_into()
            .map_err(|_| Error::InvalidArgument("kyber768 ciphertext has the wrong length".into()))?;
        let shared_secret = pqc_kyber::decapsulate(&ciphertext, &secret)
            .map_err(|_| Error::HandshakeRejected("kyber768 decapsulation failed".into()))?;
        Ok(shared_secret.to_vec())
    }
}
