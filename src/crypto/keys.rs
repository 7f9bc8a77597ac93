//! ECDSA keys over secp256k1
//!
//! Signatures are deterministic (RFC 6979) and serialized as 64-byte
//! `r || s`. Public keys travel as SEC1 compressed points.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use super::{Hash, PubKeyHash};

/// Key errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// secp256k1 private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        SigningKey::from_slice(bytes)
            .map(PrivateKey)
            .map_err(|_| KeyError::InvalidPrivateKey)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().clone())
    }

    /// Sign a digest, returning `r || s`
    pub fn sign(&self, digest: &Hash) -> Vec<u8> {
        let signature: Signature = self.0.sign(&digest.0);
        signature.to_bytes().to_vec()
    }
}

/// secp256k1 public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse a SEC1 encoded point (compressed or uncompressed)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    /// SEC1 compressed encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Identity that outputs paying this key are locked to
    pub fn pubkey_hash(&self) -> PubKeyHash {
        PubKeyHash::from_public_key(&self.to_bytes())
    }

    /// Verify an `r || s` signature over a digest
    pub fn verify(&self, digest: &Hash, signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.0.verify(&digest.0, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

/// Verify a signature given raw public key bytes; malformed keys fail.
pub fn verify_signature(public_key: &[u8], digest: &Hash, signature: &[u8]) -> bool {
    match PublicKey::from_bytes(public_key) {
        Ok(key) => key.verify(digest, signature),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    #[test]
    fn test_sign_verify() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let message = sha256(b"test message");
        let signature = private.sign(&message);

        assert_eq!(signature.len(), 64);
        assert!(public.verify(&message, &signature));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let private = PrivateKey::generate();
        let message = sha256(b"same digest");
        assert_eq!(private.sign(&message), private.sign(&message));
    }

    #[test]
    fn test_wrong_key_fails() {
        let private1 = PrivateKey::generate();
        let public2 = PrivateKey::generate().public_key();

        let message = sha256(b"test message");
        let signature = private1.sign(&message);

        assert!(!public2.verify(&message, &signature));
    }

    #[test]
    fn test_wrong_message_fails() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let signature = private.sign(&sha256(b"message 1"));
        assert!(!public.verify(&sha256(b"message 2"), &signature));
    }

    #[test]
    fn test_malformed_inputs_fail_closed() {
        let private = PrivateKey::generate();
        let message = sha256(b"m");
        let signature = private.sign(&message);

        assert!(!verify_signature(&[0u8; 33], &message, &signature));
        assert!(!private.public_key().verify(&message, &signature[..63]));
        assert!(PublicKey::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_key_serialization() {
        let private = PrivateKey::generate();
        let recovered = PrivateKey::from_bytes(&private.to_bytes()).unwrap();
        assert_eq!(private.public_key(), recovered.public_key());

        let public = private.public_key();
        assert_eq!(public.to_bytes().len(), 33);
        assert_eq!(PublicKey::from_bytes(&public.to_bytes()).unwrap(), public);
        assert_eq!(public.pubkey_hash(), PubKeyHash::from_public_key(&public.to_bytes()));
    }
}
