//! Field merklizer
//!
//! Commits every leaf of an encoded subsection in schema traversal order.
//! Structures and arrays collect their leaves in a nested scope whose root is
//! folded into one subtree leaf of the enclosing scope.
//!
//! ```text
//! seed   = H(SALT, pepper || counter)
//! salt_i = H(SALT_CHUNK, seed || i)[..16]     i = leaf, visible, hidden
//! leaf   = H(LEAF, salt, index path, tag, payload)
//! ```

use log::trace;

use super::domains;
use super::tree::MerkleTree;
use crate::crypto::{self, Hash, ZERO_HASH};
use crate::record::MaskedText;
use crate::schema::FieldPath;
use crate::stream::WriteStream;

/// Length of every salt chunk
pub const SALT_LENGTH: usize = 16;

/// Commitment kind of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// Optional field not present in the record
    Absent,
    /// Committed by value
    Raw,
    /// Committed by value hash
    Hashable,
    /// String committed as visible and hidden halves
    Maskable,
    /// Root of a nested scope
    Subtree,
}

impl LeafKind {
    /// Tag byte mixed into the leaf commitment
    pub fn tag(&self) -> u8 {
        match self {
            LeafKind::Absent => 0,
            LeafKind::Raw => 1,
            LeafKind::Hashable => 2,
            LeafKind::Maskable => 3,
            LeafKind::Subtree => 4,
        }
    }
}

/// Salts of one leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafSalt {
    /// Salt of the leaf commitment
    pub leaf: [u8; SALT_LENGTH],
    /// Salt of the visible half of a maskable leaf
    pub visible: [u8; SALT_LENGTH],
    /// Salt of the hidden half of a maskable leaf
    pub hidden: [u8; SALT_LENGTH],
}

/// Deterministic salt stream seeded by a pepper
#[derive(Debug, Clone)]
pub struct SaltGenerator {
    pepper: Hash,
    counter: u64,
}

impl SaltGenerator {
    /// Start a stream from `pepper`
    pub fn new(pepper: Hash) -> Self {
        SaltGenerator { pepper, counter: 0 }
    }

    /// Pepper the stream was seeded with
    pub fn pepper(&self) -> &Hash {
        &self.pepper
    }

    /// Salts of the next leaf; the counter advances once per call
    pub fn next_salt(&mut self) -> LeafSalt {
        let seed = crypto::secure_hash_multiple(domains::SALT, &[&self.pepper, &self.counter.to_be_bytes()]);
        self.counter += 1;

        let chunk = |i: u8| {
            let digest = crypto::secure_hash_multiple(domains::SALT_CHUNK, &[&seed, &[i]]);
            let mut out = [0u8; SALT_LENGTH];
            out.copy_from_slice(&digest[..SALT_LENGTH]);
            out
        };
        LeafSalt { leaf: chunk(0), visible: chunk(1), hidden: chunk(2) }
    }
}

/// Hash committed by a hashable leaf
pub fn value_hash(bytes: &[u8]) -> Hash {
    crypto::secure_hash(domains::VALUE, bytes)
}

/// Visible half of a maskable commitment, from the value hash of the visible part
pub fn visible_hash(salt: &[u8; SALT_LENGTH], visible_value_hash: &Hash) -> Hash {
    crypto::secure_hash_multiple(domains::MASK_VISIBLE, &[salt, visible_value_hash])
}

/// Hidden half of a maskable commitment
pub fn hidden_hash(salt: &[u8; SALT_LENGTH], hidden: &[u8]) -> Hash {
    crypto::secure_hash_multiple(domains::MASK_HIDDEN, &[salt, hidden])
}

/// Payload of a subtree leaf
pub fn subtree_payload(count: u64, root: &Hash) -> Vec<u8> {
    let mut out = WriteStream::new();
    out.write_varuint(count);
    out.write_bytes(root);
    out.into_bytes()
}

/// Commitment of one leaf
pub fn leaf_hash(salt: &[u8; SALT_LENGTH], path: &FieldPath, kind: LeafKind, payload: &[u8]) -> Hash {
    crypto::secure_hash_multiple(domains::LEAF, &[salt, &path.index_bytes(), &[kind.tag()], payload])
}

/// What a leaf commits to
#[derive(Debug, Clone, PartialEq)]
pub enum LeafContent {
    /// Absent optional field
    Absent,
    /// Encoded value bytes
    Raw(Vec<u8>),
    /// Encoded value bytes, committed by hash
    Hashable(Vec<u8>),
    /// Visible and hidden parts of a maskable string
    Maskable {
        /// Visible part encoding
        visible: Vec<u8>,
        /// Hidden part encoding
        hidden: Vec<u8>,
    },
    /// Nested scope
    Subtree(MerkleScope),
}

impl LeafContent {
    /// Kind of the commitment
    pub fn kind(&self) -> LeafKind {
        match self {
            LeafContent::Absent => LeafKind::Absent,
            LeafContent::Raw(_) => LeafKind::Raw,
            LeafContent::Hashable(_) => LeafKind::Hashable,
            LeafContent::Maskable { .. } => LeafKind::Maskable,
            LeafContent::Subtree(_) => LeafKind::Subtree,
        }
    }

    fn payload(&self, salt: &LeafSalt) -> Vec<u8> {
        match self {
            LeafContent::Absent => Vec::new(),
            LeafContent::Raw(bytes) => bytes.clone(),
            LeafContent::Hashable(bytes) => value_hash(bytes).to_vec(),
            LeafContent::Maskable { visible, hidden } => {
                let mut payload = visible_hash(&salt.visible, &value_hash(visible)).to_vec();
                payload.extend_from_slice(&hidden_hash(&salt.hidden, hidden));
                payload
            }
            LeafContent::Subtree(scope) => subtree_payload(scope.len() as u64, &scope.root()),
        }
    }
}

/// A committed leaf
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleLeaf {
    /// Field path of the leaf
    pub path: FieldPath,
    /// Salts drawn for the leaf
    pub salt: LeafSalt,
    /// Committed content
    pub content: LeafContent,
    /// Leaf commitment
    pub hash: Hash,
}

/// Leaves of one structure, array or subsection root
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MerkleScope {
    /// Leaves in traversal order
    pub leaves: Vec<MerkleLeaf>,
    /// Tree over the leaf hashes, `None` for an empty scope
    pub tree: Option<MerkleTree>,
}

impl MerkleScope {
    fn seal(leaves: Vec<MerkleLeaf>) -> Self {
        let tree = if leaves.is_empty() {
            None
        } else {
            Some(MerkleTree::build(leaves.iter().map(|leaf| leaf.hash).collect()))
        };
        MerkleScope { leaves, tree }
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the scope holds no leaf
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Root of the scope, [`ZERO_HASH`] when empty
    pub fn root(&self) -> Hash {
        self.tree.as_ref().and_then(|tree| tree.root().ok()).unwrap_or(ZERO_HASH)
    }
}

/// Complete commitment of one subsection
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMerkleTree {
    /// Pepper of the salt stream
    pub pepper: Hash,
    /// Top-level scope
    pub root: MerkleScope,
}

impl FieldMerkleTree {
    /// Committed root hash
    pub fn root_hash(&self) -> Hash {
        self.root.root()
    }
}

/// Builds a [`FieldMerkleTree`] in step with a record walk
#[derive(Debug)]
pub struct FieldMerklizer {
    salts: SaltGenerator,
    scopes: Vec<Vec<MerkleLeaf>>,
}

impl FieldMerklizer {
    /// Create a merklizer salting with `pepper`
    pub fn new(pepper: Hash) -> Self {
        FieldMerklizer { salts: SaltGenerator::new(pepper), scopes: vec![Vec::new()] }
    }

    fn push(&mut self, path: &FieldPath, content: LeafContent) {
        let salt = self.salts.next_salt();
        let hash = leaf_hash(&salt.leaf, path, content.kind(), &content.payload(&salt));
        trace!("merkle leaf {} ({:?}) {}", path, content.kind(), hex::encode(&hash[0..4]));

        let leaf = MerkleLeaf { path: path.clone(), salt, content, hash };
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(leaf);
        }
    }

    /// Commit an absent optional field
    pub fn add_absent(&mut self, path: &FieldPath) {
        self.push(path, LeafContent::Absent);
    }

    /// Commit encoded value bytes
    pub fn add_raw(&mut self, path: &FieldPath, bytes: Vec<u8>) {
        self.push(path, LeafContent::Raw(bytes));
    }

    /// Commit the hash of encoded value bytes
    pub fn add_hashable(&mut self, path: &FieldPath, bytes: Vec<u8>) {
        self.push(path, LeafContent::Hashable(bytes));
    }

    /// Commit a maskable string
    pub fn add_maskable(&mut self, path: &FieldPath, text: &MaskedText) {
        self.push(path, LeafContent::Maskable { visible: text.visible_bytes(), hidden: text.hidden_bytes() });
    }

    /// Start collecting the leaves of a structure or array
    pub fn open_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Fold the innermost scope into a subtree leaf at `path`
    pub fn close_scope(&mut self, path: &FieldPath) {
        if self.scopes.len() < 2 {
            return;
        }
        let leaves = self.scopes.pop().unwrap_or_default();
        self.push(path, LeafContent::Subtree(MerkleScope::seal(leaves)));
    }

    /// Seal the top-level scope
    pub fn finish(mut self) -> FieldMerkleTree {
        let leaves = self.scopes.drain(..).next().unwrap_or_default();
        FieldMerkleTree { pepper: *self.salts.pepper(), root: MerkleScope::seal(leaves) }
    }
}
