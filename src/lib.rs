//! Proof-of-work ledger core
//!
//! A hash-linked chain of blocks holding ECDSA-signed value transfers,
//! admitted by proof-of-work and indexed by an unspent-output set.

pub mod codec;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod rpc;
pub mod storage;
pub mod transaction;
pub mod wallet;

/// Protocol constants
pub mod constants {
    /// Default proof-of-work difficulty (required leading zero bits)
    pub const DIFFICULTY: u32 = 18;

    /// Value minted by every coinbase transaction
    pub const BLOCK_REWARD: u64 = 100;

    /// Store key holding the hash of the current tip
    pub const LAST_HASH_KEY: &[u8] = b"lh";

    /// Namespace of UTXO index entries inside the store
    pub const UTXO_PREFIX: &[u8] = b"utxo-";

    /// Memo carried by the genesis coinbase
    pub const GENESIS_MEMO: &str = "First Transaction from Genesis";

    /// Version byte prefixed to every block and transaction encoding
    pub const ENCODING_VERSION: u8 = 1;

    /// Output index carried by the single coinbase input
    pub const COINBASE_VOUT: i64 = -1;

    /// Length of the random memo generated for anonymous coinbases
    pub const RANDOM_MEMO_LEN: usize = 24;
}
