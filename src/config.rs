//! Chain configuration

use std::path::PathBuf;

use crate::constants::{BLOCK_REWARD, DIFFICULTY};

/// Node id used when none is given
pub const DEFAULT_NODE_ID: &str = "3000";

/// Settings a chain is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Directory of the block store
    pub data_dir: PathBuf,
    /// Proof-of-work difficulty blocks must be mined at
    pub difficulty: u32,
    /// Value minted by each coinbase
    pub block_reward: u64,
}

impl ChainConfig {
    /// Per-node layout: `./tmp/blocks_<node_id>`
    pub fn for_node(node_id: &str) -> Self {
        Self {
            data_dir: PathBuf::from(format!("./tmp/blocks_{}", node_id)),
            difficulty: DIFFICULTY,
            block_reward: BLOCK_REWARD,
        }
    }

    /// Same settings with a different difficulty
    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::for_node(DEFAULT_NODE_ID)
    }
}

/// Wallet file belonging to a node: `./tmp/wallets_<node_id>.data`
pub fn wallet_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("./tmp/wallets_{}.data", node_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_protocol_constants() {
        let config = ChainConfig::default();
        assert_eq!(config.difficulty, DIFFICULTY);
        assert_eq!(config.block_reward, BLOCK_REWARD);
        assert_eq!(config.data_dir, PathBuf::from("./tmp/blocks_3000"));
    }

    #[test]
    fn test_per_node_paths() {
        let config = ChainConfig::for_node("4000").with_difficulty(4);
        assert_eq!(config.data_dir, PathBuf::from("./tmp/blocks_4000"));
        assert_eq!(config.difficulty, 4);
        assert_eq!(wallet_path("4000"), PathBuf::from("./tmp/wallets_4000.data"));
    }
}
