//! Cryptography module - SHA-256 hashing, Merkle digests, ECDSA keys

mod hash;
mod keys;
mod merkle;

pub use hash::*;
pub use keys::*;
pub use merkle::*;
