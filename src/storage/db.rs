//! Sled-backed persistent store

use std::path::Path;

use sled::{Batch, Db};

use super::{BatchOp, KvStore, ScanIter, StorageError, WriteBatch};

/// Persistent [`KvStore`] on a sled database
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self { db: sled::open(path)? })
    }

    /// Database removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn contains(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.db.contains_key(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> ScanIter<'_> {
        Box::new(self.db.scan_prefix(prefix).map(|item| {
            let (k, v) = item?;
            Ok((k.to_vec(), v.to_vec()))
        }))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = Batch::default();
        for op in batch.operations {
            match op {
                BatchOp::Put { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
