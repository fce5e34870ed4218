//! Selective disclosure proofs
//!
//! A proof reveals some leaves of a subsection's [`FieldMerkleTree`] and
//! carries just enough witness hashes to recompute its root.
//!
//! ```text
//! modes:  one mode per visited leaf, pre-order
//! data:   one disclosure per non-redacted leaf, same order
//! proofs: one witness list per revealed non-empty scope, post-order
//! ```
//!
//! [`FieldMerkleTree`]: crate::merkle::FieldMerkleTree

mod decoder;
mod generator;
mod section;

pub use decoder::{decode_proof, verify_proof};
pub use generator::generate_proof;
pub use section::{verify_section_proof, SectionProof, SubsectionProof};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::merkle::{LeafKind, SALT_LENGTH};
use crate::schema::FieldPath;
use crate::Result;

/// Disclosure decision for one leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisclosureMode {
    /// Value revealed
    Plain,
    /// Masked rendering revealed, hidden parts committed by hash
    Masked,
    /// Value hash revealed
    Hashed,
    /// Hash of the masked rendering revealed
    MaskedHashed,
    /// Nothing revealed
    Redacted,
}

impl fmt::Display for DisclosureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisclosureMode::Plain => "PLAIN",
            DisclosureMode::Masked => "MASKED",
            DisclosureMode::Hashed => "HASHED",
            DisclosureMode::MaskedHashed => "MASKED+HASHED",
            DisclosureMode::Redacted => "REDACTED",
        };
        f.write_str(name)
    }
}

/// What a policy sees of a leaf
#[derive(Debug, Clone, Copy)]
pub struct LeafRef<'t> {
    /// Field path of the leaf
    pub path: &'t FieldPath,
    /// Commitment kind
    pub kind: LeafKind,
}

/// Revealed material of one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafDisclosure {
    /// Absent optional field
    Absent {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
    },
    /// Encoded value bytes
    Value {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
        /// Value bytes
        bytes: Vec<u8>,
    },
    /// Value hash of a hashable leaf
    ValueHash {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
        /// Hash of the value bytes
        hash: Hash,
    },
    /// Structure or array whose leaves follow
    Subtree {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
        /// Number of leaves of the nested scope
        count: u64,
    },
    /// Both halves of a maskable string
    MaskPlain {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
        /// Salt of the visible half
        visible_salt: [u8; SALT_LENGTH],
        /// Visible part
        visible: Vec<u8>,
        /// Salt of the hidden half
        hidden_salt: [u8; SALT_LENGTH],
        /// Hidden part
        hidden: Vec<u8>,
    },
    /// Visible half of a maskable string
    Masked {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
        /// Salt of the visible half
        visible_salt: [u8; SALT_LENGTH],
        /// Visible part
        visible: Vec<u8>,
        /// Hidden half commitment
        hidden_hash: Hash,
    },
    /// Value hash of the visible half of a maskable string
    MaskedHashed {
        /// Leaf salt
        salt: [u8; SALT_LENGTH],
        /// Salt of the visible half
        visible_salt: [u8; SALT_LENGTH],
        /// Value hash of the visible part
        visible_hash: Hash,
        /// Hidden half commitment
        hidden_hash: Hash,
    },
}

impl LeafDisclosure {
    /// Mode under which this disclosure is emitted
    pub fn mode(&self) -> DisclosureMode {
        match self {
            LeafDisclosure::Absent { .. }
            | LeafDisclosure::Value { .. }
            | LeafDisclosure::Subtree { .. }
            | LeafDisclosure::MaskPlain { .. } => DisclosureMode::Plain,
            LeafDisclosure::ValueHash { .. } => DisclosureMode::Hashed,
            LeafDisclosure::Masked { .. } => DisclosureMode::Masked,
            LeafDisclosure::MaskedHashed { .. } => DisclosureMode::MaskedHashed,
        }
    }
}

/// Proof for one subsection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofObject {
    /// Mode of every visited leaf
    pub modes: Vec<DisclosureMode>,
    /// Disclosure of every non-redacted leaf
    pub data: Vec<LeafDisclosure>,
    /// Witness hashes per revealed scope
    pub proofs: Vec<Vec<Hash>>,
}

impl ProofObject {
    /// Serialize with bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bincode
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Total number of witness hashes
    pub fn witness_count(&self) -> usize {
        self.proofs.iter().map(Vec::len).sum()
    }
}
