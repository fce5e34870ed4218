//! # Carmentis Section Encoding Engine
//!
//! Schema-driven binary codec for ledger records. A record is split by
//! access rules into a public subsection and private subsections. Each
//! private subsection is sealed with a key derived from its channel key.
//! Provable subsections commit to a salted field Merkle tree that supports
//! selective disclosure proofs.
//!
//! ```text
//! record ──► AccessRouter ──► RecordEncoder ──► Envelope ──► AEAD ──► Subsection
//!                                  │
//!                                  └──► FieldMerklizer ──► merkle_root, proofs
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod access;
pub mod config;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod proof;
pub mod record;
pub mod schema;
pub mod section;
pub mod stream;

/// Re-export common types for ease of use
pub use access::{AccessRouter, AccessRule, DisclosureModifier};
pub use config::EngineConfig;
pub use error::{CoreError, Result};
pub use proof::{verify_section_proof, DisclosureMode, ProofObject, SectionProof};
pub use record::{EncodeOptions, Value};
pub use schema::{FieldType, Schema, SchemaNode};
pub use section::{
    KeyId, KeyResolver, Section, SectionDecoder, SectionDefinition, SectionEncoder, SectionPosition,
    StaticKeyResolver, SubsectionDefinition,
};

/// Version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a domain-separated secure hash
pub fn secure_hash(domain: &str, data: &[u8]) -> crypto::Hash {
    crypto::secure_hash(domain, data)
}

/// Create a domain-separated secure hash of multiple inputs
pub fn secure_hash_multiple(domain: &str, data: &[&[u8]]) -> crypto::Hash {
    crypto::secure_hash_multiple(domain, data)
}
