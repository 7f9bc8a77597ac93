//! Wallet module - key pairs, addresses and the wallet file

mod wallet;

pub use wallet::*;

use crate::crypto::{double_sha256, PubKeyHash};

/// Version byte of every address
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LEN: usize = 4;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = double_sha256(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.0[..CHECKSUM_LEN]);
    out
}

/// Address format: Base58(version || pubkey_hash[20] || checksum[4])
pub fn address_from_pubkey_hash(pubkey_hash: &PubKeyHash) -> String {
    let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&pubkey_hash.0);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Decode an address back to its pubkey hash
pub fn address_to_pubkey_hash(address: &str) -> Result<PubKeyHash, WalletError> {
    let invalid = |reason: &str| WalletError::InvalidAddress(format!("{}: {}", address, reason));

    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| invalid("invalid base58 encoding"))?;

    if decoded.len() != 1 + 20 + CHECKSUM_LEN {
        return Err(invalid("invalid length"));
    }

    let (payload, check) = decoded.split_at(1 + 20);
    if payload[0] != ADDRESS_VERSION {
        return Err(invalid("unknown version"));
    }
    if check != checksum(payload).as_slice() {
        return Err(invalid("invalid checksum"));
    }

    PubKeyHash::from_slice(&payload[1..]).ok_or_else(|| invalid("invalid length"))
}

pub fn validate_address(address: &str) -> bool {
    address_to_pubkey_hash(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let pkh = PubKeyHash([0xAB; 20]);
        let address = address_from_pubkey_hash(&pkh);
        assert_eq!(address_to_pubkey_hash(&address).unwrap(), pkh);
    }

    #[test]
    fn test_version_zero_addresses_start_with_one() {
        let address = address_from_pubkey_hash(&PubKeyHash([0x42; 20]));
        assert!(address.starts_with('1'));
    }

    #[test]
    fn test_corrupted_address_rejected() {
        let address = address_from_pubkey_hash(&PubKeyHash([7; 20]));
        let mut chars: Vec<char> = address.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'z' { 'y' } else { 'z' };
        let corrupted: String = chars.into_iter().collect();

        assert!(!validate_address(&corrupted));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address(""));
    }
}
