//! Record codec
//!
//! Encodes a [`Value`] against a [`Schema`] into the canonical byte form and
//! back. Optional fields of each structure share presence bitmasks written
//! inline:
//!
//! ```text
//! { a?  b  c?  ...  i? }     status byte reserved at the 1st, 9th, 17th
//!   ^          ^             ... optional field; bit k = k-th optional
//!   status     bit 1         field of the byte, least significant first
//! ```
//!
//! The subsection variants run the same codec with the access router as a
//! filter and may feed every leaf into a [`FieldMerklizer`].

mod decoder;
mod encoder;
mod leaf;
mod mask;
mod value;

pub use mask::{CompiledMask, MaskInterval, MaskRule, MaskSegment, MaskedText};
pub use value::{Decimal, Value};

pub(crate) use leaf::decode_leaf;
pub(crate) use value::{ValueBuilder, ValueCursor};

use std::collections::{BTreeMap, HashMap};

use crate::access::AccessRouter;
use crate::config::DecodeConfig;
use crate::crypto::Hash;
use crate::merkle::{FieldMerkleTree, FieldMerklizer};
use crate::schema::Schema;
use crate::Result;

use decoder::RecordDecoder;
use encoder::RecordEncoder;

/// Per-encode inputs beyond the record itself
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Mask intervals of maskable strings, by dotted field path
    pub masks: HashMap<String, Vec<MaskInterval>>,

    /// Peppers of provable subsections; missing ones are drawn at random
    pub peppers: BTreeMap<u32, Hash>,
}

impl EncodeOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide byte ranges of the maskable string at `path`
    pub fn with_mask(mut self, path: &str, intervals: Vec<MaskInterval>) -> Self {
        self.masks.insert(path.to_string(), intervals);
        self
    }

    /// Fix the pepper of a subsection
    pub fn with_pepper(mut self, subsection: u32, pepper: Hash) -> Self {
        self.peppers.insert(subsection, pepper);
        self
    }
}

/// Encode a whole record
pub fn encode_record(schema: &Schema, value: &Value) -> Result<Vec<u8>> {
    let options = EncodeOptions::default();
    let (bytes, _) = RecordEncoder::new(schema, None, &options, value, None).run()?;
    Ok(bytes)
}

/// Decode a whole record with the default limits
pub fn decode_record(schema: &Schema, bytes: &[u8]) -> Result<Value> {
    decode_record_with_limits(schema, bytes, &DecodeConfig::default())
}

/// Decode a whole record
pub fn decode_record_with_limits(schema: &Schema, bytes: &[u8], limits: &DecodeConfig) -> Result<Value> {
    let (value, _) = RecordDecoder::new(schema, None, bytes, limits, None).run()?;
    Ok(value)
}

/// Encode the fields of `value` routed to `subsection`
///
/// With a merklizer, every leaf is committed as it is written and the
/// resulting tree is returned alongside the bytes.
pub fn encode_subsection(
    schema: &Schema,
    router: &AccessRouter,
    subsection: u32,
    value: &Value,
    options: &EncodeOptions,
    merklizer: Option<FieldMerklizer>,
) -> Result<(Vec<u8>, Option<FieldMerkleTree>)> {
    RecordEncoder::new(schema, Some((router, subsection)), options, value, merklizer).run()
}

/// Decode the fields of one subsection
pub fn decode_subsection(
    schema: &Schema,
    router: &AccessRouter,
    subsection: u32,
    bytes: &[u8],
    limits: &DecodeConfig,
    merklizer: Option<FieldMerklizer>,
) -> Result<(Value, Option<FieldMerkleTree>)> {
    RecordDecoder::new(schema, Some((router, subsection)), bytes, limits, merklizer).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, FieldError, SchemaError};
    use crate::schema::{BlobKind, FieldType, SchemaNode};

    fn person_schema() -> Schema {
        let mut schema = Schema::new(vec![]);
        let colors = schema.add_enumeration("color", vec!["red", "green", "blue"]);
        let address = schema.add_structure(
            "address",
            vec![
                SchemaNode::new("line1", FieldType::String),
                SchemaNode::new("line2", FieldType::String).optional(),
            ],
        );
        schema.nodes = vec![
            SchemaNode::new("name", FieldType::String),
            SchemaNode::new("age", FieldType::UInt).optional(),
            SchemaNode::new("color", FieldType::Enum(colors)),
            SchemaNode::new("address", FieldType::Struct(address)),
            SchemaNode::new("tags", FieldType::String).array(),
            SchemaNode::new("scores", FieldType::Int).fixed_array(2),
            SchemaNode::new("balance", FieldType::Decimal).scale(2),
            SchemaNode::new("document", FieldType::File).optional(),
        ];
        schema
    }

    fn person() -> Value {
        Value::object()
            .with("name", "Ada")
            .with("age", 36u64)
            .with("color", "green")
            .with("address", Value::object().with("line1", "10 Downing St"))
            .with("tags", Value::Array(vec!["a".into(), "b".into()]))
            .with("scores", Value::Array(vec![Value::Int(-1), Value::Int(7)]))
            .with("balance", Decimal::new(12_345, 2))
    }

    #[test]
    fn test_roundtrip() {
        let schema = person_schema();
        let record = person();

        let bytes = encode_record(&schema, &record).unwrap();
        assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
    }

    #[test]
    fn test_byte_layout() {
        let schema = Schema::new(vec![
            SchemaNode::new("a", FieldType::UInt).optional(),
            SchemaNode::new("b", FieldType::FixedUint(2)),
            SchemaNode::new("c", FieldType::String).optional(),
        ]);
        let record = Value::object().with("b", 258u64).with("c", "hi");

        // status byte (bit 1 = c present), b big-endian, c length-prefixed
        assert_eq!(encode_record(&schema, &record).unwrap(), vec![0b10, 0x01, 0x02, 2, b'h', b'i']);
    }

    #[test]
    fn test_file_descriptor() {
        let schema = Schema::new(vec![SchemaNode::new("document", FieldType::File)]);
        let record = Value::object().with(
            "document",
            Value::object().with("name", "report.pdf").with("size", 1024u64).with("hash", vec![9u8; 32]),
        );

        let bytes = encode_record(&schema, &record).unwrap();
        assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = person_schema();
        let record = match person() {
            Value::Object(mut map) => {
                map.remove("address");
                Value::Object(map)
            }
            other => other,
        };

        match encode_record(&schema, &record) {
            Err(CoreError::Schema(SchemaError::UndefinedField(path))) => assert_eq!(path, "address"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_missing_nested_field_reports_dotted_path() {
        let schema = person_schema();
        let record = person().with("address", Value::object());

        match encode_record(&schema, &record) {
            Err(CoreError::Schema(SchemaError::UndefinedField(path))) => assert_eq!(path, "address.line1"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_fixed_array_size() {
        let schema = person_schema();
        let record = person().with("scores", Value::Array(vec![Value::Int(1)]));

        assert!(matches!(
            encode_record(&schema, &record),
            Err(CoreError::Field(FieldError::BadSize { expected: 2, actual: 1, .. }))
        ));
    }

    #[test]
    fn test_wrong_container_types() {
        let schema = person_schema();

        let record = person().with("tags", "not an array");
        assert!(matches!(
            encode_record(&schema, &record),
            Err(CoreError::Field(FieldError::WrongType { expected: "array", .. }))
        ));

        let record = person().with("address", "not an object");
        assert!(matches!(
            encode_record(&schema, &record),
            Err(CoreError::Field(FieldError::WrongType { expected: "object", .. }))
        ));
    }

    #[test]
    fn test_stream_exactness() {
        let schema = person_schema();
        let bytes = encode_record(&schema, &person()).unwrap();

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(
            decode_record(&schema, &longer),
            Err(CoreError::Schema(SchemaError::InvalidStream { .. }))
        ));
        assert!(matches!(
            decode_record(&schema, &bytes[..bytes.len() - 1]),
            Err(CoreError::Schema(SchemaError::InvalidStream { .. }))
        ));
    }

    #[test]
    fn test_unused_status_bits_are_rejected() {
        let schema = Schema::new(vec![SchemaNode::new("a", FieldType::UInt).optional()]);
        assert!(decode_record(&schema, &[0b10]).is_err());
        assert_eq!(decode_record(&schema, &[0]).unwrap(), Value::object());
    }

    #[test]
    fn test_array_length_limit() {
        let schema = Schema::new(vec![SchemaNode::new("blobs", FieldType::Blob(BlobKind::Hash)).array()]);
        let record = Value::object().with("blobs", Value::Array(vec![Value::Bytes(vec![0; 32]); 3]));
        let bytes = encode_record(&schema, &record).unwrap();

        let limits = DecodeConfig { max_array_length: 2, ..DecodeConfig::default() };
        assert!(matches!(
            decode_record_with_limits(&schema, &bytes, &limits),
            Err(CoreError::Field(FieldError::BadSize { .. }))
        ));
    }
}
