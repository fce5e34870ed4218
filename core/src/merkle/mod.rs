//! Salted Merkle commitments over record fields
//!
//! This module provides the binary tree primitive with minimal witness
//! extraction and the field merklizer that turns an encoded subsection into
//! nested leaf scopes, one per structure or array.

mod merklizer;
mod tree;

pub use merklizer::{
    hidden_hash, leaf_hash, subtree_payload, value_hash, visible_hash, FieldMerkleTree, FieldMerklizer, LeafContent,
    LeafKind, LeafSalt, MerkleLeaf, MerkleScope, SaltGenerator, SALT_LENGTH,
};
pub use tree::MerkleTree;

/// Domain constants for Merkle tree operations
pub mod domains {
    /// Domain for internal nodes
    pub const NODE: &str = "CARMENTIS_MERKLE_NODE";

    /// Domain for leaf commitments
    pub const LEAF: &str = "CARMENTIS_MERKLE_LEAF";

    /// Domain for per-leaf salt seeds
    pub const SALT: &str = "CARMENTIS_MERKLE_SALT";

    /// Domain for the chunks cut from a salt seed
    pub const SALT_CHUNK: &str = "CARMENTIS_MERKLE_SALT_CHUNK";

    /// Domain for value hashes of hashable leaves
    pub const VALUE: &str = "CARMENTIS_MERKLE_VALUE";

    /// Domain for the visible half of a maskable leaf
    pub const MASK_VISIBLE: &str = "CARMENTIS_MERKLE_MASK_VISIBLE";

    /// Domain for the hidden half of a maskable leaf
    pub const MASK_HIDDEN: &str = "CARMENTIS_MERKLE_MASK_HIDDEN";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    #[test]
    fn test_domain_separation() {
        let data = b"test data";
        let all = [
            domains::NODE,
            domains::LEAF,
            domains::SALT,
            domains::SALT_CHUNK,
            domains::VALUE,
            domains::MASK_VISIBLE,
            domains::MASK_HIDDEN,
        ];

        let hashes: Vec<_> = all.iter().map(|d| crypto::secure_hash(d, data)).collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
