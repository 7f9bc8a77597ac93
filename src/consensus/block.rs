//! Block structure
//!
//! Blocks are immutable once mined. The stored `hash` is the value found by
//! proof-of-work and is re-checked with [`validate`](super::validate), never
//! silently recomputed.

use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use thiserror::Error;

use crate::codec::{DecodeError, Reader, Writer};
use crate::crypto::{merkle_digest, Hash};
use crate::transaction::Transaction;

use super::mine;

/// Block construction and decoding errors
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Block has no transactions")]
    Empty,
    #[error("Malformed block encoding: {0}")]
    Decode(#[from] DecodeError),
}

/// A mined block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Proof-of-work hash
    pub hash: Hash,
    /// Parent hash; `None` only for genesis
    pub prev_hash: Option<Hash>,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    /// Distance from genesis (genesis = 0)
    pub height: u64,
    /// Seconds since the Unix epoch at creation
    pub timestamp: u64,
    /// Leading zero bits the hash was mined to
    pub difficulty: u32,
}

impl Block {
    /// Mine a block over `transactions` linked to `prev_hash`
    pub fn create(
        transactions: Vec<Transaction>,
        prev_hash: Option<Hash>,
        height: u64,
        difficulty: u32,
    ) -> Result<Self, BlockError> {
        if transactions.is_empty() {
            return Err(BlockError::Empty);
        }

        let timestamp = now();
        let digest = merkle_digest(&encode_each(&transactions));

        info!("Mining block at height {} with {} transactions", height, transactions.len());
        let (nonce, hash) = mine(prev_hash.as_ref(), digest, difficulty);
        info!("Mined block {} (nonce {})", hash, nonce);

        Ok(Self {
            hash,
            prev_hash,
            transactions,
            nonce,
            height,
            timestamp,
            difficulty,
        })
    }

    /// Mine the genesis block around its coinbase
    pub fn create_genesis(coinbase: Transaction, difficulty: u32) -> Result<Self, BlockError> {
        Self::create(vec![coinbase], None, 0, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    /// Merkle digest of the transaction encodings, in block order
    pub fn tx_digest(&self) -> Hash {
        merkle_digest(&encode_each(&self.transactions))
    }

    /// Canonical encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.hash(&self.hash);
        match &self.prev_hash {
            Some(prev) => w.u8(1).hash(prev),
            None => w.u8(0),
        };
        w.u64(self.nonce)
            .u64(self.height)
            .u64(self.timestamp)
            .u32(self.difficulty)
            .count(self.transactions.len());
        for tx in &self.transactions {
            tx.write(&mut w);
        }
        w.finish()
    }

    /// Decode a canonical encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        let mut r = Reader::new(bytes)?;
        let hash = r.hash()?;
        let prev_hash = match r.u8()? {
            0 => None,
            1 => Some(r.hash()?),
            other => return Err(DecodeError::InvalidFlag(other).into()),
        };
        let nonce = r.u64()?;
        let height = r.u64()?;
        let timestamp = r.u64()?;
        let difficulty = r.u32()?;

        let count = r.count()?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::read(&mut r)?);
        }
        r.finish()?;

        Ok(Self {
            hash,
            prev_hash,
            transactions,
            nonce,
            height,
            timestamp,
            difficulty,
        })
    }
}

fn encode_each(transactions: &[Transaction]) -> Vec<Vec<u8>> {
    transactions.iter().map(Transaction::to_bytes).collect()
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::validate;
    use crate::crypto::PubKeyHash;

    fn coinbase(memo: &str) -> Transaction {
        Transaction::coinbase(PubKeyHash([1u8; 20]), memo, 100)
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::create_genesis(coinbase("genesis"), 6).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.difficulty, 6);
        assert!(validate(&genesis));
    }

    #[test]
    fn test_empty_block_rejected() {
        assert!(matches!(Block::create(vec![], None, 0, 4), Err(BlockError::Empty)));
    }

    #[test]
    fn test_linked_block_validates() {
        let genesis = Block::create_genesis(coinbase("genesis"), 6).unwrap();
        let next = Block::create(vec![coinbase("next")], Some(genesis.hash), 1, 6).unwrap();
        assert_eq!(next.prev_hash, Some(genesis.hash));
        assert!(!next.is_genesis());
        assert!(validate(&next));
    }

    #[test]
    fn test_tampering_breaks_validation() {
        let genesis = Block::create_genesis(coinbase("genesis"), 6).unwrap();
        let block =
            Block::create(vec![coinbase("a"), coinbase("b")], Some(genesis.hash), 1, 6).unwrap();

        let mut bad = block.clone();
        bad.hash.0[31] ^= 1;
        assert!(!validate(&bad));

        let mut bad = block.clone();
        bad.nonce = bad.nonce.wrapping_add(1);
        assert!(!validate(&bad));

        let mut bad = block.clone();
        bad.prev_hash = Some(Hash::zero());
        assert!(!validate(&bad));

        let mut bad = block.clone();
        bad.transactions.swap(0, 1);
        assert!(!validate(&bad));

        let mut bad = block;
        bad.transactions[0].outputs[0].value += 1;
        assert!(!validate(&bad));
    }

    #[test]
    fn test_encoding_roundtrip() {
        let genesis = Block::create_genesis(coinbase("genesis"), 4).unwrap();
        assert_eq!(Block::from_bytes(&genesis.to_bytes()).unwrap(), genesis);

        let next =
            Block::create(vec![coinbase("x"), coinbase("y")], Some(genesis.hash), 1, 4).unwrap();
        assert_eq!(Block::from_bytes(&next.to_bytes()).unwrap(), next);
    }

    #[test]
    fn test_corrupt_encoding_rejected() {
        let block = Block::create_genesis(coinbase("genesis"), 4).unwrap();
        let bytes = block.to_bytes();

        assert!(Block::from_bytes(&bytes[..bytes.len() / 2]).is_err());
        assert!(Block::from_bytes(&[]).is_err());

        let mut bad_flag = bytes.clone();
        bad_flag[33] = 7;
        assert!(matches!(
            Block::from_bytes(&bad_flag),
            Err(BlockError::Decode(DecodeError::InvalidFlag(7)))
        ));
    }
}
