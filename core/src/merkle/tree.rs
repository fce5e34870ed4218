//! Binary Merkle tree
//!
//! ```text
//! level 2:            r
//! level 1:      n0          n1
//! level 0:   l0    l1    l2   (0)
//! ```
//!
//! Odd levels are padded with [`ZERO_HASH`] when their parent row is
//! computed. Padding is never stored and never sent as a witness.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use super::domains;
use crate::crypto::{self, Hash, ZERO_HASH};
use crate::error::MerkleError;

/// A binary Merkle tree holding every level from the leaves up
#[derive(Clone, PartialEq, Eq)]
pub struct MerkleTree {
    leaf_count: usize,
    levels: Vec<Vec<Hash>>,
}

impl Debug for MerkleTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => write!(
                f,
                "MerkleTree {{ root: {}, depth: {}, leaf_count: {} }}",
                hex::encode(&root[0..4]),
                self.levels.len(),
                self.leaf_count
            ),
            None => write!(f, "MerkleTree {{ empty }}"),
        }
    }
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    crypto::secure_hash_multiple(domains::NODE, &[left, right])
}

fn parent_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(&ZERO_HASH)))
        .collect()
}

impl MerkleTree {
    /// Build a tree over `leaves`; an empty list gives the degenerate tree
    pub fn build(leaves: Vec<Hash>) -> Self {
        let leaf_count = leaves.len();
        if leaf_count == 0 {
            return MerkleTree { leaf_count, levels: Vec::new() };
        }

        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = parent_level(level);
            levels.push(next);
        }
        MerkleTree { leaf_count, levels }
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of levels, `ceil(log2 N) + 1` for `N >= 1` leaves
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Leaf hash at `position`
    pub fn leaf(&self, position: usize) -> Option<&Hash> {
        self.levels.first().and_then(|leaves| leaves.get(position))
    }

    /// Root hash
    pub fn root(&self) -> Result<Hash, MerkleError> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .ok_or(MerkleError::EmptyTree)
    }

    /// Serialize as `u32be leaf count` followed by every level's hashes
    pub fn to_bytes(&self) -> Vec<u8> {
        let total: usize = self.levels.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(4 + total * 32);
        out.extend_from_slice(&(self.leaf_count as u32).to_be_bytes());
        for level in &self.levels {
            for hash in level {
                out.extend_from_slice(hash);
            }
        }
        out
    }

    /// Parse and check a serialized tree
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MerkleError> {
        let header: [u8; 4] = bytes.get(..4).and_then(|h| h.try_into().ok()).ok_or(MerkleError::Malformed)?;
        let leaf_count = u32::from_be_bytes(header) as usize;

        let body = &bytes[4..];
        if body.len() < leaf_count.saturating_mul(32) {
            return Err(MerkleError::Malformed);
        }
        let leaves = body[..leaf_count * 32]
            .chunks_exact(32)
            .map(|chunk| {
                let mut hash = ZERO_HASH;
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let tree = MerkleTree::build(leaves);
        if tree.to_bytes() != bytes {
            return Err(MerkleError::Malformed);
        }
        Ok(tree)
    }

    /// Sibling hashes needed to recompute the root from the leaves at
    /// `positions`, in level order then position order
    ///
    /// With no positions the root itself is the single witness.
    pub fn witnesses(&self, positions: &BTreeSet<usize>) -> Result<Vec<Hash>, MerkleError> {
        if let Some(&position) = positions.iter().find(|&&p| p >= self.leaf_count) {
            return Err(MerkleError::PositionOutOfRange { position, leaf_count: self.leaf_count });
        }
        if positions.is_empty() {
            return Ok(vec![self.root()?]);
        }

        let mut witnesses = Vec::new();
        let mut known: BTreeSet<usize> = positions.clone();
        for level in &self.levels[..self.levels.len() - 1] {
            for &position in &known {
                let sibling = position ^ 1;
                if !known.contains(&sibling) && sibling < level.len() {
                    witnesses.push(level[sibling]);
                }
            }
            known = known.iter().map(|p| p / 2).collect();
        }
        Ok(witnesses)
    }

    /// Recompute the root of a `leaf_count`-leaf tree from revealed leaves
    /// and the witnesses of [`MerkleTree::witnesses`]
    pub fn replay(leaf_count: usize, revealed: &[(usize, Hash)], witnesses: &[Hash]) -> Result<Hash, MerkleError> {
        if leaf_count == 0 {
            return Err(MerkleError::EmptyTree);
        }
        if revealed.is_empty() {
            return match witnesses {
                [root] => Ok(*root),
                [] => Err(MerkleError::MissingWitness),
                [_, rest @ ..] => Err(MerkleError::UnusedWitnesses(rest.len())),
            };
        }

        let mut known = BTreeMap::new();
        for &(position, hash) in revealed {
            if position >= leaf_count {
                return Err(MerkleError::PositionOutOfRange { position, leaf_count });
            }
            if known.insert(position, hash).map_or(false, |previous| previous != hash) {
                return Err(MerkleError::Malformed);
            }
        }

        let mut supply = witnesses.iter();
        let mut width = leaf_count;
        while width > 1 {
            let mut next = BTreeMap::new();
            for (&position, hash) in &known {
                let sibling = position ^ 1;
                if position % 2 == 1 && known.contains_key(&sibling) {
                    continue;
                }
                let sibling_hash = match known.get(&sibling) {
                    Some(hash) => *hash,
                    None if sibling >= width => ZERO_HASH,
                    None => *supply.next().ok_or(MerkleError::MissingWitness)?,
                };
                let parent = if position % 2 == 0 {
                    node_hash(hash, &sibling_hash)
                } else {
                    node_hash(&sibling_hash, hash)
                };
                next.insert(position / 2, parent);
            }
            known = next;
            width = (width + 1) / 2;
        }

        let unused = supply.count();
        if unused > 0 {
            return Err(MerkleError::UnusedWitnesses(unused));
        }
        known.remove(&0).ok_or(MerkleError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| crypto::secure_hash("TEST_LEAF", &(i as u64).to_be_bytes())).collect()
    }

    fn reveal(tree: &MerkleTree, positions: &BTreeSet<usize>) -> Vec<(usize, Hash)> {
        positions.iter().map(|&p| (p, *tree.leaf(p).unwrap())).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::build(vec![]);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.root(), Err(MerkleError::EmptyTree));
        assert_eq!(MerkleTree::replay(0, &[], &[]), Err(MerkleError::EmptyTree));
    }

    #[test]
    fn test_single_leaf() {
        let tree = MerkleTree::build(leaves(1));
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.root().unwrap(), leaves(1)[0]);
    }

    #[test]
    fn test_depth() {
        for (n, depth) in [(2, 2), (3, 3), (4, 3), (5, 4), (9, 5), (16, 5)] {
            assert_eq!(MerkleTree::build(leaves(n)).depth(), depth, "{} leaves", n);
        }
    }

    #[test]
    fn test_odd_level_padding() {
        let l = leaves(3);
        let tree = MerkleTree::build(l.clone());

        let expected = node_hash(&node_hash(&l[0], &l[1]), &node_hash(&l[2], &ZERO_HASH));
        assert_eq!(tree.root().unwrap(), expected);
    }

    #[test]
    fn test_witnesses_are_minimal() {
        let tree = MerkleTree::build(leaves(4));

        let one: BTreeSet<_> = [0].into_iter().collect();
        assert_eq!(tree.witnesses(&one).unwrap().len(), 2);

        let pair: BTreeSet<_> = [0, 1].into_iter().collect();
        assert_eq!(tree.witnesses(&pair).unwrap().len(), 1);

        let all: BTreeSet<_> = (0..4).collect();
        assert!(tree.witnesses(&all).unwrap().is_empty());

        assert_eq!(tree.witnesses(&BTreeSet::new()).unwrap(), vec![tree.root().unwrap()]);
    }

    #[test]
    fn test_padding_is_never_a_witness() {
        let tree = MerkleTree::build(leaves(3));
        let last: BTreeSet<_> = [2].into_iter().collect();

        // sibling of leaf 2 is padding; only n0 is needed
        let witnesses = tree.witnesses(&last).unwrap();
        assert_eq!(witnesses.len(), 1);
        assert_eq!(MerkleTree::replay(3, &reveal(&tree, &last), &witnesses).unwrap(), tree.root().unwrap());
    }

    #[test]
    fn test_replay_witness_accounting() {
        let tree = MerkleTree::build(leaves(5));
        let positions: BTreeSet<_> = [1, 4].into_iter().collect();
        let revealed = reveal(&tree, &positions);
        let mut witnesses = tree.witnesses(&positions).unwrap();

        let mut extra = witnesses.clone();
        extra.push(ZERO_HASH);
        assert_eq!(MerkleTree::replay(5, &revealed, &extra), Err(MerkleError::UnusedWitnesses(1)));

        witnesses.pop();
        assert_eq!(MerkleTree::replay(5, &revealed, &witnesses), Err(MerkleError::MissingWitness));

        assert!(matches!(
            MerkleTree::replay(5, &[(5, ZERO_HASH)], &[]),
            Err(MerkleError::PositionOutOfRange { position: 5, .. })
        ));
    }

    #[test]
    fn test_tampered_leaf_changes_root() {
        let tree = MerkleTree::build(leaves(6));
        let positions: BTreeSet<_> = [3].into_iter().collect();
        let witnesses = tree.witnesses(&positions).unwrap();

        let forged = MerkleTree::replay(6, &[(3, ZERO_HASH)], &witnesses).unwrap();
        assert_ne!(forged, tree.root().unwrap());
    }

    #[test]
    fn test_bytes() {
        let tree = MerkleTree::build(leaves(7));
        let bytes = tree.to_bytes();
        assert_eq!(&bytes[..4], &7u32.to_be_bytes());
        assert_eq!(MerkleTree::from_bytes(&bytes).unwrap(), tree);

        let mut corrupted = bytes.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 1;
        assert_eq!(MerkleTree::from_bytes(&corrupted), Err(MerkleError::Malformed));
        assert_eq!(MerkleTree::from_bytes(&bytes[..bytes.len() - 1]), Err(MerkleError::Malformed));
        assert_eq!(MerkleTree::from_bytes(&[0, 0]), Err(MerkleError::Malformed));
    }

    proptest! {
        #[test]
        fn prop_replay_matches_root(n in 1usize..40, mask in any::<u64>()) {
            let tree = MerkleTree::build(leaves(n));
            let positions: BTreeSet<usize> = (0..n).filter(|i| mask >> (i % 64) & 1 == 1).collect();
            let witnesses = tree.witnesses(&positions).unwrap();

            let root = MerkleTree::replay(n, &reveal(&tree, &positions), &witnesses).unwrap();
            prop_assert_eq!(root, tree.root().unwrap());
        }
    }
}
