//! Error types for the core crate
//!
//! Every component owns a closed error enum carrying structured context
//! (field paths, subsection ids). `CoreError` wraps them all so callers of the
//! section codec deal with a single type.

use std::io;
use thiserror::Error;

/// Binary stream errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A read would go past the end of the buffer
    #[error("stream exhausted: needed {needed} byte(s), {remaining} remaining")]
    Exhausted {
        /// Bytes requested by the read
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// A variable-length integer does not fit in 64 bits
    #[error("varint overflows 64 bits")]
    Overflow,

    /// An encoding that a canonical writer never produces
    #[error("non-canonical encoding: {0}")]
    NonCanonical(&'static str),

    /// String bytes are not valid UTF-8
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Fixed-size write with the wrong number of bytes
    #[error("size mismatch: expected {expected} byte(s), got {actual}")]
    SizeMismatch {
        /// Size required by the encoding
        expected: usize,
        /// Size supplied
        actual: usize,
    },

    /// Bytes left over after a complete read
    #[error("{0} trailing byte(s) after end of data")]
    TrailingBytes(usize),

    /// Unknown tag byte in a tagged encoding
    #[error("unknown tag {0:#04x}")]
    UnknownTag(u8),
}

/// Schema and record codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A required field is missing from the record
    #[error("undefined required field '{0}'")]
    UndefinedField(String),

    /// The decoded stream length does not match the input length
    #[error("invalid stream: consumed {consumed} of {length} byte(s)")]
    InvalidStream {
        /// Bytes consumed by the decoder
        consumed: usize,
        /// Total bytes supplied
        length: usize,
    },

    /// A value is not part of the referenced enumeration
    #[error("value '{value}' of field '{path}' is not in enumeration '{enumeration}'")]
    NotInEnum {
        /// Dotted field path
        path: String,
        /// Enumeration name
        enumeration: String,
        /// Offending value
        value: String,
    },

    /// Two fields share a name within one level
    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    /// A field name is empty or contains reserved characters
    #[error("invalid field name '{0}'")]
    InvalidFieldName(String),

    /// A structure reference is out of range
    #[error("unknown structure #{0}")]
    UnknownStructure(usize),

    /// An enumeration reference is out of range
    #[error("unknown enumeration #{0}")]
    UnknownEnumeration(usize),

    /// Structures reference each other in a cycle
    #[error("cyclic structure reference through '{0}'")]
    CyclicStructure(String),

    /// A node definition is internally inconsistent
    #[error("invalid definition of '{path}': {reason}")]
    InvalidNode {
        /// Dotted path of the node
        path: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Field validation errors, always carrying the dotted field path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Value variant does not fit the field type
    #[error("field '{path}': expected {expected}")]
    WrongType {
        /// Dotted field path
        path: String,
        /// Expected type description
        expected: &'static str,
    },

    /// Numeric value outside the representable range
    #[error("field '{path}': value out of range ({reason})")]
    OutOfRange {
        /// Dotted field path
        path: String,
        /// Range description
        reason: String,
    },

    /// Wrong byte or element count
    #[error("field '{path}': bad size, expected {expected}, got {actual}")]
    BadSize {
        /// Dotted field path
        path: String,
        /// Expected size or limit
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Mask intervals or mask rule cannot be applied
    #[error("field '{path}': invalid mask ({reason})")]
    InvalidMask {
        /// Dotted field path
        path: String,
        /// Why the mask was rejected
        reason: String,
    },
}

/// Access routing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// A private field is not matched by any rule
    #[error("field '{0}' is not assigned to any subsection")]
    Unassigned(String),

    /// A public field is targeted by an exact private rule
    #[error("public field '{path}' is routed to private subsection {subsection}")]
    PublicToPrivate {
        /// Dotted field path
        path: String,
        /// Subsection named by the rule
        subsection: u32,
    },

    /// A rule path cannot be parsed or does not name a schema field
    #[error("invalid access rule '{path}': {reason}")]
    InvalidRule {
        /// Rule path as written
        path: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Section encoding and decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    /// No external definition is registered for the section
    #[error("missing external definition for section {0}")]
    MissingDefinition(u32),

    /// Recomputed Merkle root differs from the committed one
    #[error("bad Merkle hash for subsection {0}")]
    BadMerkleHash(u32),

    /// AEAD decryption failed with the resolved key
    #[error("decryption failed for subsection {0}")]
    DecryptionFailed(u32),

    /// Subsection plaintext envelope is malformed
    #[error("malformed envelope in subsection {0}")]
    MalformedEnvelope(u32),

    /// Subsection id is not declared by the section definition
    #[error("unknown subsection {0}")]
    UnknownSubsection(u32),

    /// Provable subsection without a committed root
    #[error("subsection {0} is provable but carries no Merkle root")]
    MissingMerkleRoot(u32),

    /// Two subsections decoded different values for the same field
    #[error("conflicting values for field '{0}'")]
    Conflict(String),

    /// Section definition is inconsistent
    #[error("invalid definition of section {section}: {reason}")]
    InvalidDefinition {
        /// Section id
        section: u32,
        /// What is wrong with it
        reason: String,
    },

    /// Key resolution failed for reasons other than unavailability
    #[error("key resolution failed: {0}")]
    KeyResolution(String),
}

/// Merkle tree errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// The tree has no leaves
    #[error("empty tree is not provable")]
    EmptyTree,

    /// A leaf position is outside the tree
    #[error("leaf position {position} out of range for {leaf_count} leaves")]
    PositionOutOfRange {
        /// Requested position
        position: usize,
        /// Number of leaves
        leaf_count: usize,
    },

    /// Fewer witnesses than the replay needs
    #[error("missing witness hash")]
    MissingWitness,

    /// More witnesses than the replay consumed
    #[error("{0} unused witness hash(es)")]
    UnusedWitnesses(usize),

    /// Serialized tree is truncated or inconsistent
    #[error("malformed tree encoding")]
    Malformed,
}

/// Proof generation and verification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// The policy asked for a mode the leaf cannot support
    #[error("mode {mode} is not supported by leaf '{path}'")]
    UnsupportedMode {
        /// Dotted field path
        path: String,
        /// Requested mode
        mode: String,
    },

    /// The proof object does not match the schema walk
    #[error("malformed proof: {0}")]
    Malformed(String),

    /// Recomputed root differs from the expected one
    #[error("proof root does not match the committed root")]
    RootMismatch,
}

/// Cryptographic primitive errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key or IV of the wrong length
    #[error("invalid key material length {0}")]
    InvalidLength(usize),

    /// Requested more output than the KDF can produce
    #[error("KDF output of {0} bits is not supported")]
    OutputTooLong(usize),

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption or authentication failed
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Binary stream error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Schema or record codec error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Field validation error
    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    /// Access routing error
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// Section codec error
    #[error("Section error: {0}")]
    Section(#[from] SectionError),

    /// Merkle tree error
    #[error("Merkle tree error: {0}")]
    Merkle(#[from] MerkleError),

    /// Proof error
    #[error("Proof error: {0}")]
    Proof(#[from] ProofError),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bincode error
    #[error("Bincode error: {0}")]
    BincodeError(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for the core crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// Convert a string error to a ConfigError
pub fn to_config_error<E: std::fmt::Display>(err: E) -> CoreError {
    CoreError::ConfigError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        match core_err {
            CoreError::IoError(_) => {}
            _ => panic!("Expected IoError variant"),
        }

        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let core_err: CoreError = json_err.into();
        match core_err {
            CoreError::JsonError(_) => {}
            _ => panic!("Expected JsonError variant"),
        }

        let core_err: CoreError = StreamError::Overflow.into();
        assert!(matches!(core_err, CoreError::Stream(StreamError::Overflow)));

        let core_err = to_config_error("bad padding range");
        match core_err {
            CoreError::ConfigError(msg) => assert_eq!(msg, "bad padding range"),
            _ => panic!("Expected ConfigError variant"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::from(SchemaError::UndefinedField("address.line1".to_string()));
        assert_eq!(
            err.to_string(),
            "Schema error: undefined required field 'address.line1'"
        );

        let err = CoreError::from(SectionError::BadMerkleHash(2));
        assert_eq!(err.to_string(), "Section error: bad Merkle hash for subsection 2");

        let err = FieldError::BadSize { path: "hash".to_string(), expected: 32, actual: 31 };
        assert_eq!(err.to_string(), "field 'hash': bad size, expected 32, got 31");
    }
}
