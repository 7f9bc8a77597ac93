//! UTXO index
//!
//! Derived state kept next to the chain under `utxo-<txid>` keys. Each entry
//! lists the still-unspent outputs of one transaction together with their
//! original output index. The index can always be rebuilt from the chain
//! with [`UtxoIndex::reindex`].

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::consensus::Block;
use crate::constants::{ENCODING_VERSION, UTXO_PREFIX};
use crate::crypto::{Hash, PubKeyHash};
use crate::transaction::{checked_sum, TransactionError, TxOutput};

use super::{AddBlockOutcome, Chain, ChainError, KvStore, StorageError, WriteBatch};

/// An unspent output and its position in the creating transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

/// Unspent outputs per transaction id
pub type UtxoEntries = BTreeMap<Hash, Vec<UnspentOutput>>;

/// View of the UTXO index stored alongside a chain
pub struct UtxoIndex<'a, S: KvStore> {
    chain: &'a Chain<S>,
}

fn entry_key(txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_PREFIX.len() + 32);
    key.extend_from_slice(UTXO_PREFIX);
    key.extend_from_slice(&txid.0);
    key
}

fn encode_entry(outputs: &[UnspentOutput]) -> Result<Vec<u8>, StorageError> {
    let mut bytes = vec![ENCODING_VERSION];
    bytes.extend(bincode::serialize(outputs)?);
    Ok(bytes)
}

fn decode_entry(bytes: &[u8]) -> Result<Vec<UnspentOutput>, StorageError> {
    match bytes.split_first() {
        Some((&ENCODING_VERSION, rest)) => Ok(bincode::deserialize(rest)?),
        Some((version, _)) => Err(StorageError::Serialization(format!(
            "unsupported UTXO entry version {}",
            version
        ))),
        None => Err(StorageError::Serialization("empty UTXO entry".into())),
    }
}

fn all_outputs(outputs: &[TxOutput]) -> Vec<UnspentOutput> {
    outputs
        .iter()
        .enumerate()
        .map(|(i, output)| UnspentOutput {
            index: i as u32,
            output: output.clone(),
        })
        .collect()
}

impl<'a, S: KvStore> UtxoIndex<'a, S> {
    pub fn new(chain: &'a Chain<S>) -> Self {
        Self { chain }
    }

    fn store(&self) -> &S {
        self.chain.store()
    }

    /// Stored entries in ascending transaction id order
    fn scan(&self) -> impl Iterator<Item = Result<(Hash, Vec<UnspentOutput>), ChainError>> + '_ {
        self.store().scan_prefix(UTXO_PREFIX).map(|item| -> Result<_, ChainError> {
            let (key, value) = item?;
            let txid = Hash::from_slice(&key[UTXO_PREFIX.len()..])
                .ok_or_else(|| StorageError::Serialization("malformed UTXO key".into()))?;
            Ok((txid, decode_entry(&value)?))
        })
    }

    fn load(&self, txid: &Hash) -> Result<Option<Vec<UnspentOutput>>, ChainError> {
        match self.store().get(&entry_key(txid))? {
            Some(bytes) => Ok(Some(decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Rebuild the index from the best chain. Returns the number of entries.
    pub fn reindex(&self) -> Result<usize, ChainError> {
        let mut batch = WriteBatch::new();
        for item in self.store().scan_prefix(UTXO_PREFIX) {
            let (key, _) = item.map_err(ChainError::from)?;
            batch.delete(key);
        }

        // Spent outputs first, so survivors do not depend on scan order
        let mut spent: HashMap<Hash, HashSet<i64>> = HashMap::new();
        for block in self.chain.iter() {
            for tx in block?.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    spent.entry(input.txid).or_default().insert(input.vout);
                }
            }
        }

        let mut survivors = UtxoEntries::new();
        for block in self.chain.iter() {
            for tx in block?.transactions {
                let spent_here = spent.get(&tx.id);
                let unspent: Vec<UnspentOutput> = all_outputs(&tx.outputs)
                    .into_iter()
                    .filter(|u| !spent_here.is_some_and(|s| s.contains(&i64::from(u.index))))
                    .collect();
                if !unspent.is_empty() {
                    survivors.insert(tx.id, unspent);
                }
            }
        }

        for (txid, outputs) in &survivors {
            batch.put(entry_key(txid), encode_entry(outputs)?);
        }
        self.store().write_batch(batch)?;

        info!("Reindexed UTXO set: {} transactions with unspent outputs", survivors.len());
        Ok(survivors.len())
    }

    /// Apply one newly appended block: remove what it spends, add what it
    /// creates. Must run exactly once per block, after the block is stored.
    pub fn apply_block(&self, block: &Block) -> Result<(), ChainError> {
        // Entries touched by this block; an empty list means "delete"
        let mut touched = UtxoEntries::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let current = match touched.get(&input.txid) {
                        Some(outputs) => Some(outputs.clone()),
                        None => self.load(&input.txid)?,
                    };
                    let Some(mut outputs) = current else {
                        warn!(
                            "UTXO entry for {} missing while applying block {}; skipping input",
                            input.txid, block.hash
                        );
                        continue;
                    };

                    let before = outputs.len();
                    outputs.retain(|u| i64::from(u.index) != input.vout);
                    if outputs.len() == before {
                        warn!(
                            "Output {}:{} already spent or never indexed",
                            input.txid, input.vout
                        );
                    }
                    touched.insert(input.txid, outputs);
                }
            }
            touched.insert(tx.id, all_outputs(&tx.outputs));
        }

        let mut batch = WriteBatch::new();
        for (txid, outputs) in &touched {
            if outputs.is_empty() {
                batch.delete(entry_key(txid));
            } else {
                batch.put(entry_key(txid), encode_entry(outputs)?);
            }
        }
        self.store().write_batch(batch)?;

        debug!("Applied block {} to UTXO set ({} entries touched)", block.hash, touched.len());
        Ok(())
    }

    /// Bring the index up to date after [`Chain::add_block`]
    pub fn sync(&self, block: &Block, outcome: AddBlockOutcome) -> Result<(), ChainError> {
        match outcome {
            AddBlockOutcome::Extended => self.apply_block(block),
            AddBlockOutcome::Reorganized => self.reindex().map(|_| ()),
            AddBlockOutcome::Duplicate | AddBlockOutcome::SideBranch => Ok(()),
        }
    }

    /// Gather outputs locked to `pubkey_hash` until `amount` is reached.
    ///
    /// Walks entries in ascending transaction id and output index order.
    /// Returns whatever was gathered, which may be less than `amount`.
    pub fn find_spendable(
        &self,
        pubkey_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash, Vec<u32>>), ChainError> {
        let mut accumulated = 0u64;
        let mut spendable: BTreeMap<Hash, Vec<u32>> = BTreeMap::new();

        'entries: for entry in self.scan() {
            let (txid, outputs) = entry?;
            for unspent in outputs {
                if accumulated >= amount {
                    break 'entries;
                }
                if unspent.output.is_locked_with(pubkey_hash) {
                    accumulated = accumulated
                        .checked_add(unspent.output.value)
                        .ok_or(TransactionError::ValueOverflow)?;
                    spendable.entry(txid).or_default().push(unspent.index);
                }
            }
        }

        Ok((accumulated, spendable))
    }

    /// Unspent outputs locked to `pubkey_hash`
    pub fn find_unspent(
        &self,
        pubkey_hash: &PubKeyHash,
    ) -> Result<Vec<(Hash, UnspentOutput)>, ChainError> {
        let mut found = Vec::new();
        for entry in self.scan() {
            let (txid, outputs) = entry?;
            found.extend(
                outputs
                    .into_iter()
                    .filter(|u| u.output.is_locked_with(pubkey_hash))
                    .map(|u| (txid, u)),
            );
        }
        Ok(found)
    }

    pub fn balance(&self, pubkey_hash: &PubKeyHash) -> Result<u64, ChainError> {
        let unspent = self.find_unspent(pubkey_hash)?;
        Ok(checked_sum(unspent.iter().map(|(_, u)| u.output.value))?)
    }

    /// Number of transactions with at least one unspent output
    pub fn count_entries(&self) -> Result<usize, ChainError> {
        let mut count = 0;
        for entry in self.store().scan_prefix(UTXO_PREFIX) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// The whole index as a map
    pub fn entries(&self) -> Result<UtxoEntries, ChainError> {
        self.scan().collect()
    }
}
