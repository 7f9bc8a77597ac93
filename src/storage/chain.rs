//! Chain store
//!
//! Blocks are stored under their raw 32-byte hash; the `lh` key points at
//! the current tip. Every mutation is a single atomic [`WriteBatch`], so a
//! crash leaves either the old tip or the new one, never a tip pointing at a
//! block that was not written.

use std::iter::FusedIterator;

use log::{debug, info, warn};

use crate::config::ChainConfig;
use crate::consensus::{validate, Block};
use crate::constants::{GENESIS_MEMO, LAST_HASH_KEY};
use crate::crypto::{Hash, PrivateKey, PubKeyHash};
use crate::transaction::{PriorTransactions, Transaction};

use super::{ChainError, KvStore, SledStore, WriteBatch};

/// How [`Chain::add_block`] changed the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockOutcome {
    /// Block was already stored; nothing changed
    Duplicate,
    /// Stored, but the tip stays where it was
    SideBranch,
    /// Stored as the new tip, directly on top of the old one
    Extended,
    /// Stored as the new tip of a different branch
    Reorganized,
}

/// Verified transactions waiting for proof-of-work on top of a fixed tip
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub transactions: Vec<Transaction>,
    pub prev_hash: Hash,
    pub height: u64,
}

impl BlockTemplate {
    /// Run proof-of-work. Does not touch the chain, so it can run while the
    /// chain is used elsewhere.
    pub fn mine(self, difficulty: u32) -> Result<Block, ChainError> {
        Ok(Block::create(
            self.transactions,
            Some(self.prev_hash),
            self.height,
            difficulty,
        )?)
    }
}

/// Append-only block log with a movable tip
pub struct Chain<S: KvStore> {
    store: S,
    tip: Hash,
    config: ChainConfig,
}

impl Chain<SledStore> {
    /// Create a new chain on disk at `config.data_dir`
    pub fn open_new(config: ChainConfig, reward_to: PubKeyHash) -> Result<Self, ChainError> {
        let store = SledStore::open(&config.data_dir)?;
        Self::init(store, config, reward_to)
    }

    /// Open the chain persisted at `config.data_dir`
    pub fn open_existing(config: ChainConfig) -> Result<Self, ChainError> {
        if !config.data_dir.exists() {
            return Err(ChainError::NotFound(format!(
                "no blockchain at {}",
                config.data_dir.display()
            )));
        }
        let store = SledStore::open(&config.data_dir)?;
        Self::open(store, config)
    }
}

impl<S: KvStore> Chain<S> {
    /// Create a chain in `store`, minting the genesis reward to `reward_to`
    pub fn init(store: S, config: ChainConfig, reward_to: PubKeyHash) -> Result<Self, ChainError> {
        if store.contains(LAST_HASH_KEY)? {
            return Err(ChainError::AlreadyExists(config.data_dir.clone()));
        }

        let coinbase = Transaction::coinbase(reward_to, GENESIS_MEMO, config.block_reward);
        let genesis = Block::create_genesis(coinbase, config.difficulty)?;

        let mut batch = WriteBatch::new();
        batch.put(genesis.hash.0.to_vec(), genesis.to_bytes());
        batch.put(LAST_HASH_KEY.to_vec(), genesis.hash.0.to_vec());
        store.write_batch(batch)?;

        info!("Created blockchain with genesis {}", genesis.hash);
        Ok(Self {
            store,
            tip: genesis.hash,
            config,
        })
    }

    /// Open the chain already in `store`
    pub fn open(store: S, config: ChainConfig) -> Result<Self, ChainError> {
        let tip_bytes = store
            .get(LAST_HASH_KEY)?
            .ok_or_else(|| ChainError::NotFound("no existing blockchain found".into()))?;
        let tip = Hash::from_slice(&tip_bytes)
            .ok_or_else(|| ChainError::CorruptBlock("malformed tip pointer".into()))?;

        let chain = Self { store, tip, config };
        let tip_block = chain.tip_block()?;
        if tip_block.difficulty != chain.config.difficulty {
            warn!(
                "Tip was mined at difficulty {} but the chain is configured for {}",
                tip_block.difficulty, chain.config.difficulty
            );
        }

        debug!("Opened blockchain at height {} (tip {})", tip_block.height, tip);
        Ok(chain)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn difficulty(&self) -> u32 {
        self.config.difficulty
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Load a stored block
    pub fn get_block(&self, hash: &Hash) -> Result<Block, ChainError> {
        let bytes = self
            .store
            .get(hash.as_bytes())?
            .ok_or_else(|| ChainError::NotFound(format!("block {}", hash)))?;
        let block = Block::from_bytes(&bytes)?;
        if block.hash != *hash {
            return Err(ChainError::CorruptBlock(format!(
                "block stored under {} carries hash {}",
                hash, block.hash
            )));
        }
        Ok(block)
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool, ChainError> {
        Ok(self.store.contains(hash.as_bytes())?)
    }

    pub fn tip_block(&self) -> Result<Block, ChainError> {
        self.get_block(&self.tip)
    }

    /// Height of the current tip
    pub fn best_height(&self) -> Result<u64, ChainError> {
        Ok(self.tip_block()?.height)
    }

    /// Block hashes from tip to genesis
    pub fn all_block_hashes(&self) -> Result<Vec<Hash>, ChainError> {
        self.iter().map(|block| block.map(|b| b.hash)).collect()
    }

    /// Blocks from the tip back to genesis
    pub fn iter(&self) -> ChainIterator<'_, S> {
        self.iter_from(self.tip)
    }

    /// Blocks from `hash` back to genesis
    pub fn iter_from(&self, hash: Hash) -> ChainIterator<'_, S> {
        ChainIterator {
            chain: self,
            next: Some(hash),
        }
    }

    /// Find a transaction on the current best branch
    pub fn find_transaction(&self, id: &Hash) -> Result<Transaction, ChainError> {
        self.find_transaction_from(self.tip, id)
    }

    /// Find a transaction in `start` or its ancestors
    pub fn find_transaction_from(&self, start: Hash, id: &Hash) -> Result<Transaction, ChainError> {
        for block in self.iter_from(start) {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(ChainError::NotFound(format!("transaction {}", id)))
    }

    /// Transactions referenced by `tx`'s inputs, looked up from `start`
    fn prior_transactions(
        &self,
        tx: &Transaction,
        start: Hash,
    ) -> Result<PriorTransactions, ChainError> {
        let mut prior = PriorTransactions::new();
        if tx.is_coinbase() {
            return Ok(prior);
        }

        for input in &tx.inputs {
            if prior.contains_key(&input.txid) {
                continue;
            }
            let prev = match self.find_transaction_from(start, &input.txid) {
                Ok(prev) => prev,
                Err(ChainError::NotFound(_)) => {
                    return Err(ChainError::UnknownPriorTransaction(input.txid))
                }
                Err(e) => return Err(e),
            };
            prior.insert(prev.id, prev);
        }
        Ok(prior)
    }

    /// Sign every input of `tx` against the outputs it spends
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        key: &PrivateKey,
    ) -> Result<(), ChainError> {
        let prior = self.prior_transactions(tx, self.tip)?;
        tx.sign(key, &prior)?;
        Ok(())
    }

    /// Verify `tx` against the current best branch
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, ChainError> {
        self.verify_from(tx, self.tip)
    }

    /// Id, signatures, and for spends that outputs do not exceed inputs
    fn verify_from(&self, tx: &Transaction, start: Hash) -> Result<bool, ChainError> {
        if tx.id != tx.compute_id() {
            return Ok(false);
        }
        let prior = self.prior_transactions(tx, start)?;
        if !tx.verify(&prior)? {
            return Ok(false);
        }
        if tx.is_coinbase() {
            return Ok(true);
        }
        match (tx.input_value(&prior), tx.total_output_value()) {
            (Ok(spent), Ok(created)) => Ok(created <= spent),
            _ => Ok(false),
        }
    }

    /// A coinbase may only come first and mint at most the block reward
    fn check_coinbase(&self, transactions: &[Transaction]) -> Result<(), ChainError> {
        for (position, tx) in transactions.iter().enumerate() {
            if !tx.is_coinbase() {
                continue;
            }
            if position != 0 {
                return Err(ChainError::InvalidBlock(format!(
                    "coinbase {} at position {}",
                    tx.id, position
                )));
            }
            let minted = tx
                .total_output_value()
                .map_err(|_| ChainError::InvalidTransaction(tx.id))?;
            if minted > self.config.block_reward {
                return Err(ChainError::InvalidBlock(format!(
                    "coinbase {} mints {} above reward {}",
                    tx.id, minted, self.config.block_reward
                )));
            }
        }
        Ok(())
    }

    /// Verify pending transactions and fix the parent the block will extend
    pub fn prepare_block(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<BlockTemplate, ChainError> {
        if transactions.is_empty() {
            return Err(ChainError::EmptyBlock);
        }
        self.check_coinbase(&transactions)?;

        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                warn!("Rejecting block: transaction {} failed verification", tx.id);
                return Err(ChainError::InvalidTransaction(tx.id));
            }
        }

        let tip = self.tip_block()?;
        Ok(BlockTemplate {
            transactions,
            prev_hash: tip.hash,
            height: tip.height + 1,
        })
    }

    /// Persist a block mined from a template and advance the tip to it
    pub fn commit_block(&mut self, block: &Block) -> Result<(), ChainError> {
        if block.prev_hash != Some(self.tip) {
            return Err(ChainError::InvalidBlock(format!(
                "block {} does not extend the current tip {}",
                block.hash, self.tip
            )));
        }

        let mut batch = WriteBatch::new();
        batch.put(block.hash.0.to_vec(), block.to_bytes());
        batch.put(LAST_HASH_KEY.to_vec(), block.hash.0.to_vec());
        self.store.write_batch(batch)?;

        self.tip = block.hash;
        info!("Tip advanced to {} at height {}", block.hash, block.height);
        Ok(())
    }

    /// Verify, mine and append `transactions` as the next block
    pub fn mine_block(&mut self, transactions: Vec<Transaction>) -> Result<Block, ChainError> {
        let template = self.prepare_block(transactions)?;
        let block = template.mine(self.config.difficulty)?;
        self.commit_block(&block)?;
        Ok(block)
    }

    /// Accept a block mined elsewhere.
    ///
    /// Already-stored blocks are a no-op. Otherwise the block is checked
    /// (proof-of-work, difficulty, coinbase placement and amount, parent,
    /// height, transactions against its own ancestry) and stored. The tip
    /// moves only when the block is
    /// strictly higher than the current tip; ties keep the existing tip.
    pub fn add_block(&mut self, block: Block) -> Result<AddBlockOutcome, ChainError> {
        if self.has_block(&block.hash)? {
            debug!("Ignoring already stored block {}", block.hash);
            return Ok(AddBlockOutcome::Duplicate);
        }

        if !validate(&block) {
            return Err(ChainError::InvalidBlock(format!(
                "proof-of-work check failed for {}",
                block.hash
            )));
        }
        if block.difficulty != self.config.difficulty {
            return Err(ChainError::InvalidBlock(format!(
                "difficulty {} does not match chain difficulty {}",
                block.difficulty, self.config.difficulty
            )));
        }
        if block.transactions.is_empty() {
            return Err(ChainError::EmptyBlock);
        }
        self.check_coinbase(&block.transactions)?;

        let parent_hash = block
            .prev_hash
            .ok_or_else(|| ChainError::InvalidBlock("a second genesis block".into()))?;
        let parent = match self.get_block(&parent_hash) {
            Ok(parent) => parent,
            Err(ChainError::NotFound(_)) => return Err(ChainError::UnknownParent(parent_hash)),
            Err(e) => return Err(e),
        };
        if block.height != parent.height + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "height {} does not follow parent height {}",
                block.height, parent.height
            )));
        }

        for tx in &block.transactions {
            if !self.verify_from(tx, parent_hash)? {
                return Err(ChainError::InvalidTransaction(tx.id));
            }
        }

        let tip = self.tip_block()?;
        let mut batch = WriteBatch::new();
        batch.put(block.hash.0.to_vec(), block.to_bytes());

        let outcome = if block.height > tip.height {
            batch.put(LAST_HASH_KEY.to_vec(), block.hash.0.to_vec());
            if parent_hash == tip.hash {
                AddBlockOutcome::Extended
            } else {
                AddBlockOutcome::Reorganized
            }
        } else {
            AddBlockOutcome::SideBranch
        };

        self.store.write_batch(batch)?;

        match outcome {
            AddBlockOutcome::SideBranch => info!(
                "Stored side-branch block {} at height {} (tip stays at height {})",
                block.hash, block.height, tip.height
            ),
            AddBlockOutcome::Reorganized => {
                self.tip = block.hash;
                warn!("Reorganized to {} at height {}", block.hash, block.height);
            }
            _ => {
                self.tip = block.hash;
                info!("Tip advanced to {} at height {}", block.hash, block.height);
            }
        }

        Ok(outcome)
    }
}

/// Lazy walk from a block back to genesis.
///
/// Stops after yielding the genesis block, or after the first error.
pub struct ChainIterator<'a, S: KvStore> {
    chain: &'a Chain<S>,
    next: Option<Hash>,
}

impl<S: KvStore> Iterator for ChainIterator<'_, S> {
    type Item = Result<Block, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.chain.get_block(&hash) {
            Ok(block) => {
                self.next = block.prev_hash;
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: KvStore> FusedIterator for ChainIterator<'_, S> {}
