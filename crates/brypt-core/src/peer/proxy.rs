//! `PeerProxy` — the store's record of one peer: its registered endpoints,
//! authorization state, and attached cipher package.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::endpoint::Endpoint;
use crate::identifier::NodeIdentifier;
use crate::security::CipherPackage;

/// Packs `bytes` into a secured envelope: encrypts, then signs the
/// ciphertext (the cipher's documented encrypt-then-sign convention), and
/// prefixes the signature with its own length so `unpack_secured` can split
/// the two back apart.
fn pack_secured(cipher: &CipherPackage, bytes: &[u8]) -> Vec<u8> {
    let ciphertext = cipher.encrypt(bytes);
    let signature = cipher.sign(&ciphertext);
    let mut packed = Vec::with_capacity(4 + signature.len() + ciphertext.len());
    packed.extend_from_slice(&(signature.len() as u32).to_be_bytes());
    packed.extend_from_slice(&signature);
    packed.extend_from_slice(&ciphertext);
    packed
}

/// Reverses `pack_secured`: verifies the signature, then decrypts.
fn unpack_secured(cipher: &CipherPackage, packed: &[u8]) -> crate::error::Result<Vec<u8>> {
    if packed.len() < 4 {
        return Err(crate::error::Error::InvalidArgument(
            "secured payload shorter than its signature length prefix".into(),
        ));
    }
    let (len_bytes, rest) = packed.split_at(4);
    let signature_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if signature_len > rest.len() {
        return Err(crate::error::Error::InvalidArgument(
            "declared signature length exceeds payload size".into(),
        ));
    }
    let (signature, ciphertext) = rest.split_at(signature_len);
    cipher.verify(ciphertext, signature)?;
    cipher.decrypt(ciphertext)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Unauthorized,
    Authorized,
    Flagged,
}

pub struct PeerProxy {
    identifier: NodeIdentifier,
    endpoints: RwLock<HashMap<String, Arc<dyn Endpoint>>>,
    authorization: RwLock<Authorization>,
    cipher: RwLock<Option<CipherPackage>>,
}

impl PeerProxy {
    pub fn new(identifier: NodeIdentifier) -> Self {
        Self {
            identifier,
            endpoints: RwLock::new(HashMap::new()),
            authorization: RwLock::new(Authorization::Unauthorized),
            cipher: RwLock::new(None),
        }
    }

    pub fn identifier(&self) -> &NodeIdentifier {
        &self.identifier
    }

    pub fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.write().unwrap().insert(endpoint.protocol().to_string(), endpoint);
    }

    pub fn withdraw_endpoint(&self, protocol: &str) {
        self.endpoints.write().unwrap().remove(protocol);
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().unwrap().len()
    }

    pub fn endpoint(&self, protocol: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.read().unwrap().get(protocol).cloned()
    }

    /// Protocols this peer currently has a registered endpoint for.
    pub fn protocols(&self) -> Vec<String> {
        self.endpoints.read().unwrap().keys().cloned().collect()
    }

    pub fn authorization(&self) -> Authorization {
        *self.authorization.read().unwrap()
    }

    pub fn set_authorization(&self, authorization: Authorization) {
        *self.authorization.write().unwrap() = authorization;
    }

    pub fn attach_cipher(&self, package: CipherPackage) {
        *self.cipher.write().unwrap() = Some(package);
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.read().unwrap().is_some()
    }

    pub fn with_cipher<R>(&self, f: impl FnOnce(&CipherPackage) -> R) -> Option<R> {
        self.cipher.read().unwrap().as_ref().map(f)
    }

    /// A peer is active iff it has at least one registered endpoint and is
    /// authorized.
    pub fn is_active(&self) -> bool {
        self.endpoint_count() > 0 && self.authorization() == Authorization::Authorized
    }

    /// Encrypts and signs `bytes` with the attached cipher, if any, then
    /// sends the result over every registered endpoint. Falls back to
    /// sending the raw bytes when no cipher is attached yet (the handshake
    /// itself travels this path before a package exists). Returns the
    /// number of endpoints dispatched to.
    pub fn dispatch(&self, bytes: &[u8]) -> usize {
        let packed = self.with_cipher(|cipher| pack_secured(cipher, bytes)).unwrap_or_else(|| bytes.to_vec());
        let endpoints = self.endpoints.read().unwrap();
        for endpoint in endpoints.values() {
            endpoint.schedule_send(packed.clone());
        }
        endpoints.len()
    }

    /// Verifies and decrypts a buffer produced by the peer-side counterpart
    /// of `dispatch`. Errors if no cipher is attached yet.
    pub fn unseal(&self, packed: &[u8]) -> crate::error::Result<Vec<u8>> {
        self.with_cipher(|cipher| unpack_secured(cipher, packed)).unwrap_or_else(|| Err(crate::error::Error::NotSynchronized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordingEndpoint;

    #[test]
    fn proxy_is_inactive_until_authorized_with_an_endpoint() {
        let proxy = PeerProxy::new(NodeIdentifier::generate());
        assert!(!proxy.is_active());
        proxy.register_endpoint(Arc::new(RecordingEndpoint::new("tcp")));
        assert!(!proxy.is_active());
        proxy.set_authorization(Authorization::Authorized);
        assert!(proxy.is_active());
    }

    #[test]
    fn withdrawing_the_only_endpoint_deactivates_the_proxy() {
        let proxy = PeerProxy::new(NodeIdentifier::generate());
        proxy.register_endpoint(Arc::new(RecordingEndpoint::new("tcp")));
        proxy.set_authorization(Authorization::Authorized);
        assert!(proxy.is_active());
        proxy.withdraw_endpoint("tcp");
        assert!(!proxy.is_active());
    }

    #[test]
    fn dispatch_with_an_attached_cipher_sends_a_secured_envelope() {
        let proxy = PeerProxy::new(NodeIdentifier::generate());
        let endpoint = Arc::new(RecordingEndpoint::new("tcp"));
        proxy.register_endpoint(endpoint.clone());
        let package = CipherPackage::derive(b"a shared secret for this test", "sha256").unwrap();
        proxy.attach_cipher(package);

        proxy.dispatch(b"plaintext payload");
        let sent = endpoint.sent();
        assert_eq!(sent.len(), 1);
        assert_ne!(sent[0], b"plaintext payload".to_vec());
        assert_eq!(proxy.unseal(&sent[0]).unwrap(), b"plaintext payload".to_vec());
    }

    #[test]
    fn unseal_without_an_attached_cipher_is_an_error() {
        let proxy = PeerProxy::new(NodeIdentifier::generate());
        assert!(proxy.unseal(b"anything").is_err());
    }
}
