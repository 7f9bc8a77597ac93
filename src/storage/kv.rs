//! Key-value store abstraction
//!
//! The chain and the UTXO index only need an ordered byte-string store with
//! point reads, prefix scans and atomic batched writes.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::StorageError;

/// Lazy ordered scan over `(key, value)` pairs
pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), StorageError>> + 'a>;

/// Ordered key-value store with atomic batches
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn contains(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> ScanIter<'_>;

    /// Apply every operation of `batch` or none of them
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Operations applied together by [`KvStore::write_batch`]
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    pub operations: Vec<BatchOp>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.operations.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.operations.push(BatchOp::Delete { key: key.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// In-memory store, used by tests and throwaway chains
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> ScanIter<'_> {
        let data = match self.data.read() {
            Ok(data) => data,
            Err(_) => return Box::new(std::iter::once(Err(StorageError::LockPoisoned))),
        };

        // Snapshot so the lock is not held across iteration
        let entries: Vec<_> = data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();

        Box::new(entries.into_iter())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::LockPoisoned)?;
        for op in batch.operations {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}
