//! Key pairs and the on-disk wallet collection
//!
//! Wallets only hold signing material. Balances live in the UTXO index.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{KeyError, PrivateKey, PubKeyHash, PublicKey};

use super::{address_from_pubkey_hash, address_to_pubkey_hash};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("No key for address {0} in this wallet")]
    UnknownAddress(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// A signing key with its derived identity
#[derive(Debug, Clone)]
pub struct KeyPair {
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self::from_private_key(PrivateKey::generate())
    }

    fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    /// Import from private key bytes
    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        Ok(Self::from_private_key(PrivateKey::from_bytes(bytes)?))
    }

    /// Export private key bytes
    pub fn private_key_bytes(&self) -> Vec<u8> {
        self.private_key.to_bytes()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Identity outputs are locked to
    pub fn pubkey_hash(&self) -> PubKeyHash {
        self.public_key.pubkey_hash()
    }

    pub fn address(&self) -> String {
        address_from_pubkey_hash(&self.pubkey_hash())
    }
}

/// Key pairs by address, persisted as one file
#[derive(Debug, Default)]
pub struct Wallets {
    path: PathBuf,
    keys: BTreeMap<String, KeyPair>,
}

/// On-disk form: address -> private key bytes
#[derive(Serialize, Deserialize)]
struct WalletFile {
    keys: BTreeMap<String, Vec<u8>>,
}

impl Wallets {
    /// Load the wallet file at `path`; a missing file is an empty wallet
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!("No wallet file at {}, starting empty", path.display());
            return Ok(Self {
                path,
                keys: BTreeMap::new(),
            });
        }

        let file: WalletFile = bincode::deserialize(&fs::read(&path)?)?;
        let mut keys = BTreeMap::new();
        for (address, bytes) in file.keys {
            keys.insert(address, KeyPair::from_private_key_bytes(&bytes)?);
        }
        Ok(Self { path, keys })
    }

    /// Write every key back to the wallet file
    pub fn save(&self) -> Result<(), WalletError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = WalletFile {
            keys: self
                .keys
                .iter()
                .map(|(address, kp)| (address.clone(), kp.private_key_bytes()))
                .collect(),
        };
        fs::write(&self.path, bincode::serialize(&file)?)?;
        Ok(())
    }

    /// Generate a key and return its address. Call [`Wallets::save`] to keep it.
    pub fn create_wallet(&mut self) -> String {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        self.keys.insert(address.clone(), keypair);
        address
    }

    /// Addresses in sorted order
    pub fn addresses(&self) -> Vec<&str> {
        self.keys.keys().map(String::as_str).collect()
    }

    /// Key pair for `address`
    pub fn get(&self, address: &str) -> Result<&KeyPair, WalletError> {
        address_to_pubkey_hash(address)?;
        self.keys
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::validate_address;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        assert!(validate_address(&kp.address()));
        assert_eq!(address_to_pubkey_hash(&kp.address()).unwrap(), kp.pubkey_hash());
    }

    #[test]
    fn test_keypair_export_import() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_bytes(&kp1.private_key_bytes()).unwrap();

        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.address(), kp2.address());
        assert!(KeyPair::from_private_key_bytes(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_wallets_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("pow-ledger-wallets-{}.data", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut wallets = Wallets::load(&path).unwrap();
        assert!(wallets.addresses().is_empty());
        let a = wallets.create_wallet();
        let b = wallets.create_wallet();
        wallets.save().unwrap();

        let loaded = Wallets::load(&path).unwrap();
        let mut expected = vec![a.as_str(), b.as_str()];
        expected.sort();
        assert_eq!(loaded.addresses(), expected);
        assert_eq!(loaded.get(&a).unwrap().pubkey_hash(), wallets.get(&a).unwrap().pubkey_hash());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_and_invalid_addresses() {
        let wallets = Wallets::default();
        let stranger = KeyPair::generate().address();

        assert!(matches!(wallets.get(&stranger), Err(WalletError::UnknownAddress(_))));
        assert!(matches!(wallets.get("not-an-address"), Err(WalletError::InvalidAddress(_))));
    }
}
