//! The artifact a completed `PackageSynchronizer` hands to its owner: a
//! ready-to-use AES-256-CTR cipher plus an HMAC signing key, both derived
//! from the handshake's shared secret via HKDF.
//!
//! CTR mode carries no intrinsic authentication, which is why `Encrypt`/
//! `Decrypt` and `Sign`/`Verify` are separate operations here rather than a
//! combined AEAD tag — a caller composes them (encrypt-then-sign) the way
//! the original non-AEAD design expected.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type Aes256Ctr = ctr::Ctr64BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const ENCRYPTION_KEY_LEN: usize = 32;
const SIGNING_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 16;

#[derive(Clone)]
pub struct CipherPackage {
    encryption_key: [u8; ENCRYPTION_KEY_LEN],
    signing_key: [u8; SIGNING_KEY_LEN],
    hash_function: String,
}

impl CipherPackage {
    /// Derives a package from a completed handshake's shared secret. `hash_function`
    /// selects the HKDF/HMAC digest ("sha256" or "sha384") per the negotiated suite.
    pub fn derive(shared_secret: &[u8], hash_function: &str) -> Result<Self> {
        let mut okm = [0u8; ENCRYPTION_KEY_LEN + SIGNING_KEY_LEN];
        match hash_function {
            "sha256" => {
                let hk = Hkdf::<Sha256>::new(None, shared_secret);
                hk.expand(b"brypt-cipher-package", &mut okm)
                    .map_err(|_| Error::Unspecified("hkdf expand failed".into()))?;
            }
            "sha384" => {
                let hk = Hkdf::<Sha384>::new(None, shared_secret);
                hk.expand(b"brypt-cipher-package", &mut okm)
                    .map_err(|_| Error::Unspecified("hkdf expand failed".into()))?;
            }
            other => return Err(Error::NotSupported(format!("hash function: {other}"))),
        }
        let mut encryption_key = [0u8; ENCRYPTION_KEY_LEN];
        let mut signing_key = [0u8; SIGNING_KEY_LEN];
        encryption_key.copy_from_slice(&okm[..ENCRYPTION_KEY_LEN]);
        signing_key.copy_from_slice(&okm[ENCRYPTION_KEY_LEN..]);
        Ok(Self {
            encryption_key,
            signing_key,
            hash_function: hash_function.to_string(),
        })
    }

    /// Encrypts `plaintext` in place with a fresh random nonce, returning
    /// `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut buffer = plaintext.to_vec();
        let key = GenericArray::from_slice(&self.encryption_key);
        let iv = GenericArray::from_slice(&nonce);
        let mut cipher = Aes256Ctr::new(key, iv);
        cipher.apply_keystream(&mut buffer);
        let mut out = Vec::with_capacity(NONCE_LEN + buffer.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&buffer);
        out
    }

    /// Decrypts a buffer previously produced by `encrypt` (`nonce || ciphertext`).
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < NONCE_LEN {
            return Err(Error::InvalidArgument("ciphertext shorter than nonce".into()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let mut buffer = ciphertext.to_vec();
        let key = GenericArray::from_slice(&self.encryption_key);
        let iv = GenericArray::from_slice(nonce);
        let mut cipher = Aes256Ctr::new(key, iv);
        cipher.apply_keystream(&mut buffer);
        Ok(buffer)
    }

    /// Signs `message` with the package's HMAC key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key).expect("hmac accepts any key length");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    /// Verifies a signature produced by `sign`, in constant time.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let expected = self.sign(message);
        if expected.ct_eq(signature).into() {
            Ok(())
        } else {
            Err(Error::VerificationFailed)
        }
    }

    pub fn hash_function(&self) -> &str {
        &self.hash_function
    }
}

impl std::fmt::Debug for CipherPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherPackage")
            .field("hash_function", &self.hash_function)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let package = CipherPackage::derive(b"a shared secret of some length", "sha256").unwrap();
        let plaintext = b"hello brypt mesh";
        let ciphertext = package.encrypt(plaintext);
        let decrypted = package.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn sign_then_verify_succeeds_and_tamper_fails() {
        let package = CipherPackage::derive(b"another shared secret", "sha384").unwrap();
        let message = b"parcel payload";
        let signature = package.sign(message);
        package.verify(message, &signature).unwrap();
        assert!(package.verify(b"tampered payload", &signature).is_err());
    }

    #[test]
    fn two_packages_from_different_secrets_disagree() {
        let a = CipherPackage::derive(b"secret-a-secret-a-secret", "sha256").unwrap();
        let b = CipherPackage::derive(b"secret-b-secret-b-secret", "sha256").unwrap();
        let ciphertext = a.encrypt(b"data");
        assert_ne!(b.decrypt(&ciphertext).unwrap(), b"data");
    }
}
