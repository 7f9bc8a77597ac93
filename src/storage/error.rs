//! Storage and chain errors

use std::path::PathBuf;

use thiserror::Error;

use crate::consensus::BlockError;
use crate::crypto::Hash;
use crate::transaction::TransactionError;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Chain store errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Blockchain already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("Invalid transaction {0}")]
    InvalidTransaction(Hash),
    #[error("Transaction {0} not found in chain")]
    UnknownPriorTransaction(Hash),
    #[error("Corrupt block: {0}")]
    CorruptBlock(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Parent block {0} is not stored")]
    UnknownParent(Hash),
    #[error("Block has no transactions")]
    EmptyBlock,
    #[error("Transaction error: {0}")]
    Transaction(#[source] TransactionError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<TransactionError> for ChainError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::UnknownPriorTransaction(id) => {
                ChainError::UnknownPriorTransaction(id)
            }
            other => ChainError::Transaction(other),
        }
    }
}

impl From<BlockError> for ChainError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::Empty => ChainError::EmptyBlock,
            BlockError::Decode(e) => ChainError::CorruptBlock(e.to_string()),
        }
    }
}

impl From<sled::Error> for ChainError {
    fn from(e: sled::Error) -> Self {
        ChainError::Storage(e.into())
    }
}
