//! Canonical binary encoding
//!
//! Length-prefixed little-endian fields, preceded by a single version byte.
//! The encoding is what gets hashed (transaction ids, Merkle leaves) and
//! what gets persisted, so it must be byte-for-byte deterministic.

use thiserror::Error;

use crate::constants::ENCODING_VERSION;
use crate::crypto::{Hash, PubKeyHash};

/// Decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of input")]
    UnexpectedEnd,
    #[error("Unsupported encoding version {0}")]
    UnsupportedVersion(u8),
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("Invalid flag byte {0}")]
    InvalidFlag(u8),
}

/// Append-only encoder
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Start an encoding with the version byte
    pub fn new() -> Self {
        Self {
            buf: vec![ENCODING_VERSION],
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn hash(&mut self, hash: &Hash) -> &mut Self {
        self.buf.extend_from_slice(&hash.0);
        self
    }

    pub fn pubkey_hash(&mut self, pkh: &PubKeyHash) -> &mut Self {
        self.buf.extend_from_slice(&pkh.0);
        self
    }

    /// Length-prefixed byte string
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.count(bytes.len());
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Collection length prefix
    pub fn count(&mut self, len: usize) -> &mut Self {
        // encodings never approach 4 GiB
        self.u32(len as u32)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over an encoding
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Open an encoding, checking its version byte
    pub fn new(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let mut reader = Self { buf };
        match reader.u8()? {
            ENCODING_VERSION => Ok(reader),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn hash(&mut self) -> Result<Hash, DecodeError> {
        Ok(Hash(self.array()?))
    }

    pub fn pubkey_hash(&mut self) -> Result<PubKeyHash, DecodeError> {
        Ok(PubKeyHash(self.array()?))
    }

    /// Length prefix, bounded by what is left so corrupt lengths cannot
    /// trigger huge allocations
    pub fn count(&mut self) -> Result<usize, DecodeError> {
        let len = self.u32()? as usize;
        if len > self.buf.len() {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(len)
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.count()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Require that the whole input was consumed
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
