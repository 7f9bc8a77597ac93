//! Merkle digest over transaction encodings
//!
//! Leaves are the SHA-256 digests of each encoding, in block order.
//! Parents are `sha256(left || right)`. An odd trailing node at any level
//! is paired with itself. A single leaf is its own root.

use super::{hash_pair, sha256, Hash};

/// Compute the Merkle digest of an ordered list of encodings.
///
/// Order matters. Callers must reject an empty list beforehand; for
/// completeness an empty list yields the zero hash.
pub fn merkle_digest<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    let leaves: Vec<Hash> = items.iter().map(|item| sha256(item.as_ref())).collect();
    compute_merkle_root(&leaves)
}

/// Compute the merkle root of a list of leaf hashes
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::zero();
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    while current_level.len() > 1 {
        current_level = next_level(&current_level);
    }

    current_level[0]
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [odd] => hash_pair(odd, odd),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Merkle inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Index of the leaf in the list
    pub index: usize,
    /// Sibling hashes from leaf to root
    pub siblings: Vec<(Hash, bool)>, // (hash, sibling is on the left)
}

impl MerkleProof {
    /// Verify this proof against a root hash
    pub fn verify(&self, leaf: &Hash, root: &Hash) -> bool {
        let mut current = *leaf;

        for (sibling, is_left) in &self.siblings {
            current = if *is_left {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }

        current == *root
    }
}

/// Build a merkle proof for the leaf at `index`
pub fn build_merkle_proof(hashes: &[Hash], index: usize) -> Option<MerkleProof> {
    if index >= hashes.len() {
        return None;
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();
    let mut current_index = index;
    let mut siblings = Vec::new();

    while current_level.len() > 1 {
        let sibling_index = if current_index % 2 == 0 {
            // trailing odd node is its own sibling
            (current_index + 1).min(current_level.len() - 1)
        } else {
            current_index - 1
        };

        let is_left = current_index % 2 == 1;
        siblings.push((current_level[sibling_index], is_left));

        current_level = next_level(&current_level);
        current_index /= 2;
    }

    Some(MerkleProof { index, siblings })
}
