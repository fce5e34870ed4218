//! Record schemas
//!
//! This module provides the declarative schema tree describing a record,
//! the walker shared by every traversal, and definition-time validation.

mod validator;
mod walker;

pub use validator::SchemaValidator;
pub use walker::{FieldPath, PathSegment, SchemaVisitor, SchemaWalker, WalkContext};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Kinds of fixed-size binary blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobKind {
    /// 32-byte hash
    Hash,
    /// 33-byte compressed public key
    PublicKey,
    /// 32-byte private key
    PrivateKey,
    /// 32-byte AES key
    AesKey,
    /// 64-byte signature
    Signature,
}

impl BlobKind {
    /// Size of the blob in bytes
    pub fn size(&self) -> usize {
        match self {
            BlobKind::Hash | BlobKind::PrivateKey | BlobKind::AesKey => 32,
            BlobKind::PublicKey => 33,
            BlobKind::Signature => 64,
        }
    }
}

/// Type of a schema node, resolved once when the schema is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Variable-length signed integer
    Int,
    /// Variable-length unsigned integer
    UInt,
    /// Unsigned integer of a fixed byte width (1..=8)
    FixedUint(u8),
    /// Signed integer of a fixed byte width (1..=8)
    FixedInt(u8),
    /// UTF-8 string, length-prefixed unless `size` is set
    String,
    /// Scaled decimal, the scale comes from the node
    Decimal,
    /// Token amount in atomic units
    Amount,
    /// Seconds since the Unix epoch
    Timestamp,
    /// Integer or float with a tagged encoding
    Number,
    /// Fixed-size blob
    Blob(BlobKind),
    /// Binary data, length-prefixed unless `size` is set
    Binary,
    /// File descriptor, see [`file_structure`]
    File,
    /// Reference into the schema's structure table
    Struct(usize),
    /// Inline structure
    Object(Vec<SchemaNode>),
    /// Reference into the schema's enumeration table
    Enum(usize),
}

/// Array modifier of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayShape {
    /// Length is written as a varuint prefix
    Variable,
    /// Length is fixed by the schema, nothing is written
    Fixed(usize),
}

/// Default routing hint of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    /// Routed to the public subsection unless a rule says otherwise
    #[default]
    Public,
    /// Must be routed by an access rule
    Private,
}

/// A named, typed node of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// Field name, unique within its level
    pub name: String,

    /// Field type
    pub field_type: FieldType,

    /// Array modifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<ArrayShape>,

    /// Presence tracked in the optional-field bitmask
    #[serde(default)]
    pub optional: bool,

    /// Routing hint
    #[serde(default)]
    pub visibility: Visibility,

    /// Fixed byte size of strings and binary data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    /// Number of decimal places of a decimal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl SchemaNode {
    /// Create a required, public, scalar node
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        SchemaNode {
            name: name.into(),
            field_type,
            array: None,
            optional: false,
            visibility: Visibility::Public,
            size: None,
            scale: None,
        }
    }

    /// Mark the node optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the node private
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Repeat the node as a length-prefixed array
    pub fn array(mut self) -> Self {
        self.array = Some(ArrayShape::Variable);
        self
    }

    /// Repeat the node exactly `count` times
    pub fn fixed_array(mut self, count: usize) -> Self {
        self.array = Some(ArrayShape::Fixed(count));
        self
    }

    /// Fix the byte size of a string or binary node
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the scale of a decimal node
    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Whether the node has children
    pub fn is_composite(&self) -> bool {
        matches!(self.field_type, FieldType::Struct(_) | FieldType::Object(_) | FieldType::File)
    }
}

/// A named sub-schema referenced by `FieldType::Struct`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Structure name
    pub name: String,
    /// Fields of the structure
    pub nodes: Vec<SchemaNode>,
}

/// A named value list referenced by `FieldType::Enum`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumeration {
    /// Enumeration name
    pub name: String,
    /// Allowed values, encoded by their index
    pub values: Vec<String>,
}

impl Enumeration {
    /// Index of a value in the list
    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }
}

/// A complete record schema with its structure and enumeration tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Top-level fields
    pub nodes: Vec<SchemaNode>,

    /// Structures referenced by index
    #[serde(default)]
    pub structures: Vec<Structure>,

    /// Enumerations referenced by index
    #[serde(default)]
    pub enumerations: Vec<Enumeration>,
}

/// Built-in structure behind `FieldType::File`
static FILE_STRUCTURE: Lazy<Structure> = Lazy::new(|| Structure {
    name: "FILE".to_string(),
    nodes: vec![
        SchemaNode::new("name", FieldType::String),
        SchemaNode::new("size", FieldType::UInt),
        SchemaNode::new("hash", FieldType::Blob(BlobKind::Hash)),
    ],
});

/// The process-wide file descriptor structure
pub fn file_structure() -> &'static Structure {
    &FILE_STRUCTURE
}

impl Schema {
    /// Create a schema without structures or enumerations
    pub fn new(nodes: Vec<SchemaNode>) -> Self {
        Schema { nodes, structures: Vec::new(), enumerations: Vec::new() }
    }

    /// Append a structure, returning the schema and the structure's index
    pub fn add_structure(&mut self, name: impl Into<String>, nodes: Vec<SchemaNode>) -> usize {
        self.structures.push(Structure { name: name.into(), nodes });
        self.structures.len() - 1
    }

    /// Append an enumeration, returning its index
    pub fn add_enumeration<S: Into<String>>(&mut self, name: impl Into<String>, values: Vec<S>) -> usize {
        self.enumerations.push(Enumeration {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self.enumerations.len() - 1
    }

    /// Index of a structure by name
    pub fn structure_index(&self, name: &str) -> Option<usize> {
        self.structures.iter().position(|s| s.name == name)
    }

    /// Index of an enumeration by name
    pub fn enumeration_index(&self, name: &str) -> Option<usize> {
        self.enumerations.iter().position(|e| e.name == name)
    }

    /// Enumeration by index
    pub fn enumeration(&self, index: usize) -> Result<&Enumeration, SchemaError> {
        self.enumerations.get(index).ok_or(SchemaError::UnknownEnumeration(index))
    }

    /// Child nodes of a composite type, `None` for leaves
    pub fn children<'s>(&'s self, field_type: &'s FieldType) -> Result<Option<&'s [SchemaNode]>, SchemaError> {
        match field_type {
            FieldType::Struct(index) => {
                let structure = self.structures.get(*index).ok_or(SchemaError::UnknownStructure(*index))?;
                Ok(Some(&structure.nodes))
            }
            FieldType::Object(nodes) => Ok(Some(nodes)),
            FieldType::File => Ok(Some(&FILE_STRUCTURE.nodes)),
            _ => Ok(None),
        }
    }

    /// Load a schema from JSON and validate it
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let schema: Schema = serde_json::from_str(json)?;
        SchemaValidator::validate(&schema)?;
        Ok(schema)
    }
}
