//! Proof-of-work engine
//!
//! A block hash qualifies when, read as a big-endian 256-bit integer, it is
//! strictly below `1 << (256 - difficulty)`. That is the same as the hash
//! having at least `difficulty` leading zero bits.

use log::debug;

use crate::crypto::{sha256, Hash};

use super::Block;

/// Proof-of-work over one block's preimage fields
#[derive(Debug, Clone)]
pub struct ProofOfWork<'a> {
    prev_hash: Option<&'a Hash>,
    tx_digest: Hash,
    difficulty: u32,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(prev_hash: Option<&'a Hash>, tx_digest: Hash, difficulty: u32) -> Self {
        Self {
            prev_hash,
            tx_digest,
            difficulty,
        }
    }

    /// Proof-of-work for an existing block, from its own fields
    pub fn for_block(block: &'a Block) -> Self {
        Self::new(block.prev_hash.as_ref(), block.tx_digest(), block.difficulty)
    }

    /// `prev_hash || tx_digest || BE(nonce) || BE(difficulty)`.
    /// The genesis block contributes no `prev_hash` bytes.
    fn preimage(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8);
        if let Some(prev) = self.prev_hash {
            data.extend_from_slice(&prev.0);
        }
        data.extend_from_slice(&self.tx_digest.0);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&u64::from(self.difficulty).to_be_bytes());
        data
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> Hash {
        sha256(&self.preimage(nonce))
    }

    /// Search nonces upward from 0 until one qualifies
    pub fn run(&self) -> (u64, Hash) {
        let mut nonce = 0u64;
        loop {
            let hash = self.hash_with_nonce(nonce);
            if meets_target(&hash, self.difficulty) {
                debug!("Found nonce {} after {} attempts: {}", nonce, nonce.wrapping_add(1), hash);
                return (nonce, hash);
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Whether `nonce` produces `expected` and that hash is below target
    pub fn validate(&self, nonce: u64, expected: &Hash) -> bool {
        let hash = self.hash_with_nonce(nonce);
        hash == *expected && meets_target(&hash, self.difficulty)
    }
}

/// `1 << (256 - difficulty)` as big-endian bytes.
///
/// Difficulty 0 would need 257 bits; it is saturated to the largest 256-bit
/// value. Difficulty above 256 yields zero, which no hash can undercut.
pub fn target(difficulty: u32) -> [u8; 32] {
    let mut target = [0u8; 32];
    match difficulty {
        0 => target = [0xFF; 32],
        1..=256 => {
            let bit = 256 - difficulty as usize;
            target[31 - bit / 8] = 1 << (bit % 8);
        }
        _ => {}
    }
    target
}

/// Hash-below-target check
pub fn meets_target(hash: &Hash, difficulty: u32) -> bool {
    leading_zero_bits(hash) >= difficulty
}

fn leading_zero_bits(hash: &Hash) -> u32 {
    let mut bits = 0;
    for byte in hash.0 {
        if byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Run proof-of-work for the given fields
pub fn mine(prev_hash: Option<&Hash>, tx_digest: Hash, difficulty: u32) -> (u64, Hash) {
    ProofOfWork::new(prev_hash, tx_digest, difficulty).run()
}

/// Re-check a block's proof-of-work against its own stored fields
pub fn validate(block: &Block) -> bool {
    ProofOfWork::for_block(block).validate(block.nonce, &block.hash)
}
