//! Scalar leaf codec
//!
//! Coerces a [`Value`] to the wire form of a scalar field and back. Every
//! error carries the dotted path of the field.

use chrono::DateTime;

use super::value::{Decimal, Value};
use crate::config::DecodeConfig;
use crate::error::{FieldError, SchemaError};
use crate::schema::{FieldType, Schema, SchemaNode};
use crate::stream::{Number, ReadStream, WriteStream};
use crate::Result;

fn wrong_type(path: &str, expected: &'static str) -> FieldError {
    FieldError::WrongType { path: path.to_string(), expected }
}

fn out_of_range(path: &str, reason: impl Into<String>) -> FieldError {
    FieldError::OutOfRange { path: path.to_string(), reason: reason.into() }
}

fn as_integer(value: &Value, path: &str) -> std::result::Result<i128, FieldError> {
    match value {
        Value::Int(v) => Ok(i128::from(*v)),
        Value::UInt(v) => Ok(i128::from(*v)),
        _ => Err(wrong_type(path, "integer")),
    }
}

fn as_bytes(value: &Value, path: &str) -> std::result::Result<Vec<u8>, FieldError> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.clone()),
        Value::String(text) => hex::decode(text.trim_start_matches("0x")).map_err(|_| wrong_type(path, "bytes or hex string")),
        _ => Err(wrong_type(path, "bytes or hex string")),
    }
}

fn as_decimal(value: &Value, path: &str) -> std::result::Result<Decimal, FieldError> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::Int(v) => Ok(Decimal::new(*v, 0)),
        Value::UInt(v) => i64::try_from(*v)
            .map(|v| Decimal::new(v, 0))
            .map_err(|_| out_of_range(path, "decimal mantissa exceeds 64 bits")),
        Value::String(text) => text.parse().map_err(|reason: String| out_of_range(path, reason)),
        Value::Float(f) => f.to_string().parse().map_err(|reason: String| out_of_range(path, reason)),
        _ => Err(wrong_type(path, "decimal")),
    }
}

fn check_size(path: &str, expected: usize, actual: usize) -> std::result::Result<(), FieldError> {
    if expected != actual {
        return Err(FieldError::BadSize { path: path.to_string(), expected, actual });
    }
    Ok(())
}

/// Write a scalar value of `node`
pub(crate) fn encode_leaf(
    schema: &Schema,
    node: &SchemaNode,
    path: &str,
    value: &Value,
    out: &mut WriteStream,
) -> Result<()> {
    match &node.field_type {
        FieldType::Int => {
            let v = i64::try_from(as_integer(value, path)?).map_err(|_| out_of_range(path, "exceeds 64-bit signed"))?;
            out.write_varint(v);
        }
        FieldType::UInt | FieldType::Amount => {
            let v = u64::try_from(as_integer(value, path)?).map_err(|_| out_of_range(path, "not a 64-bit unsigned"))?;
            out.write_varuint(v);
        }
        FieldType::FixedUint(width) => {
            let v = u64::try_from(as_integer(value, path)?).map_err(|_| out_of_range(path, "negative"))?;
            out.write_uint(v, usize::from(*width))
                .map_err(|_| out_of_range(path, format!("does not fit in {} byte(s)", width)))?;
        }
        FieldType::FixedInt(width) => {
            let v = i64::try_from(as_integer(value, path)?).map_err(|_| out_of_range(path, "exceeds 64-bit signed"))?;
            out.write_int(v, usize::from(*width))
                .map_err(|_| out_of_range(path, format!("does not fit in {} byte(s)", width)))?;
        }
        FieldType::Timestamp => {
            let seconds = match value {
                Value::String(text) => DateTime::parse_from_rfc3339(text)
                    .map_err(|_| wrong_type(path, "RFC 3339 timestamp"))?
                    .timestamp(),
                other => i64::try_from(as_integer(other, path)?).map_err(|_| out_of_range(path, "timestamp"))?,
            };
            out.write_varint(seconds);
        }
        FieldType::Number => {
            let number = match value {
                Value::Float(f) => Number::Float(*f),
                other => Number::Integer(as_integer(other, path)?),
            };
            out.write_number(&number).map_err(|_| out_of_range(path, "number exceeds 64 bits"))?;
        }
        FieldType::Decimal => {
            let scale = node.scale.unwrap_or(0);
            let decimal = as_decimal(value, path)?
                .rescale(scale)
                .ok_or_else(|| out_of_range(path, format!("cannot be represented with scale {}", scale)))?;
            out.write_varint(decimal.mantissa);
        }
        FieldType::String => {
            let text = value.as_str().ok_or_else(|| wrong_type(path, "string"))?;
            match node.size {
                Some(size) => {
                    check_size(path, size, text.len())?;
                    out.write_bytes(text.as_bytes());
                }
                None => out.write_string(text),
            }
        }
        FieldType::Blob(kind) => {
            let bytes = as_bytes(value, path)?;
            check_size(path, kind.size(), bytes.len())?;
            out.write_bytes(&bytes);
        }
        FieldType::Binary => {
            let bytes = as_bytes(value, path)?;
            match node.size {
                Some(size) => {
                    check_size(path, size, bytes.len())?;
                    out.write_bytes(&bytes);
                }
                None => out.write_binary(&bytes),
            }
        }
        FieldType::Enum(index) => {
            let enumeration = schema.enumeration(*index)?;
            let text = value.as_str().ok_or_else(|| wrong_type(path, "enumeration value"))?;
            let position = enumeration.index_of(text).ok_or_else(|| SchemaError::NotInEnum {
                path: path.to_string(),
                enumeration: enumeration.name.clone(),
                value: text.to_string(),
            })?;
            out.write_byte(position as u8);
        }
        FieldType::File | FieldType::Struct(_) | FieldType::Object(_) => {
            return Err(SchemaError::InvalidNode {
                path: path.to_string(),
                reason: "composite field reached the leaf codec".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn read_length(input: &mut ReadStream<'_>, path: &str, limit: usize) -> Result<usize> {
    let length = input.read_varuint()?;
    match usize::try_from(length) {
        Ok(length) if length <= limit => Ok(length),
        _ => Err(FieldError::BadSize { path: path.to_string(), expected: limit, actual: length as usize }.into()),
    }
}

/// Read a scalar value of `node`
pub(crate) fn decode_leaf(
    schema: &Schema,
    node: &SchemaNode,
    path: &str,
    input: &mut ReadStream<'_>,
    limits: &DecodeConfig,
) -> Result<Value> {
    let value = match &node.field_type {
        FieldType::Int | FieldType::Timestamp => Value::Int(input.read_varint()?),
        FieldType::UInt | FieldType::Amount => Value::UInt(input.read_varuint()?),
        FieldType::FixedUint(width) => Value::UInt(input.read_uint(usize::from(*width))?),
        FieldType::FixedInt(width) => Value::Int(input.read_int(usize::from(*width))?),
        FieldType::Number => match input.read_number()? {
            Number::Float(f) => Value::Float(f),
            Number::Integer(n) if n >= 0 => Value::UInt(n as u64),
            Number::Integer(n) => Value::Int(n as i64),
        },
        FieldType::Decimal => Value::Decimal(Decimal::new(input.read_varint()?, node.scale.unwrap_or(0))),
        FieldType::String => {
            let length = match node.size {
                Some(size) => size,
                None => read_length(input, path, limits.max_string_length)?,
            };
            Value::String(input.read_fixed_string(length)?)
        }
        FieldType::Blob(kind) => Value::Bytes(input.read_bytes(kind.size())?.to_vec()),
        FieldType::Binary => {
            let length = match node.size {
                Some(size) => size,
                None => read_length(input, path, limits.max_string_length)?,
            };
            Value::Bytes(input.read_bytes(length)?.to_vec())
        }
        FieldType::Enum(index) => {
            let enumeration = schema.enumeration(*index)?;
            let position = input.read_byte()?;
            let text = enumeration.values.get(usize::from(position)).ok_or_else(|| SchemaError::NotInEnum {
                path: path.to_string(),
                enumeration: enumeration.name.clone(),
                value: format!("#{}", position),
            })?;
            Value::String(text.clone())
        }
        FieldType::File | FieldType::Struct(_) | FieldType::Object(_) => {
            return Err(SchemaError::InvalidNode {
                path: path.to_string(),
                reason: "composite field reached the leaf codec".to_string(),
            }
            .into());
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::schema::BlobKind;
    use rstest::rstest;

    fn roundtrip(node: SchemaNode, value: Value) -> Result<Value> {
        let schema = Schema::new(vec![]);
        let mut out = WriteStream::new();
        encode_leaf(&schema, &node, &node.name, &value, &mut out)?;
        let bytes = out.into_bytes();
        let mut input = ReadStream::new(&bytes);
        let decoded = decode_leaf(&schema, &node, &node.name, &mut input, &DecodeConfig::default())?;
        input.finish()?;
        Ok(decoded)
    }

    #[rstest]
    #[case(SchemaNode::new("v", FieldType::Int), Value::Int(-123_456))]
    #[case(SchemaNode::new("v", FieldType::UInt), Value::UInt(u64::MAX))]
    #[case(SchemaNode::new("v", FieldType::FixedUint(2)), Value::UInt(65_535))]
    #[case(SchemaNode::new("v", FieldType::FixedInt(1)), Value::Int(-128))]
    #[case(SchemaNode::new("v", FieldType::Amount), Value::UInt(1_000_000))]
    #[case(SchemaNode::new("v", FieldType::Number), Value::Float(2.5))]
    #[case(SchemaNode::new("v", FieldType::Number), Value::Int(-9))]
    #[case(SchemaNode::new("v", FieldType::String), Value::from("Paris"))]
    #[case(SchemaNode::new("v", FieldType::String).size(2), Value::from("FR"))]
    #[case(SchemaNode::new("v", FieldType::Binary), Value::Bytes(vec![1, 2, 3]))]
    #[case(SchemaNode::new("v", FieldType::Blob(BlobKind::Hash)), Value::Bytes(vec![7; 32]))]
    fn test_leaf_roundtrip(#[case] node: SchemaNode, #[case] value: Value) {
        assert_eq!(roundtrip(node, value.clone()).unwrap(), value);
    }

    #[test]
    fn test_decimal_uses_schema_scale() {
        let node = SchemaNode::new("price", FieldType::Decimal).scale(2);
        let decoded = roundtrip(node.clone(), Value::from("12.5")).unwrap();
        assert_eq!(decoded, Value::Decimal(Decimal::new(1250, 2)));

        let err = roundtrip(node, Value::from("12.345")).unwrap_err();
        assert!(matches!(err, CoreError::Field(FieldError::OutOfRange { .. })));
    }

    #[test]
    fn test_timestamp_accepts_rfc3339() {
        let node = SchemaNode::new("at", FieldType::Timestamp);
        let decoded = roundtrip(node, Value::from("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(decoded, Value::Int(1_704_067_200));
    }

    #[test]
    fn test_hex_blobs() {
        let node = SchemaNode::new("hash", FieldType::Blob(BlobKind::Hash));
        let decoded = roundtrip(node.clone(), Value::String(hex::encode([0xAB; 32]))).unwrap();
        assert_eq!(decoded, Value::Bytes(vec![0xAB; 32]));

        let err = roundtrip(node, Value::Bytes(vec![0; 31])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Field(FieldError::BadSize { expected: 32, actual: 31, .. })
        ));
    }

    #[test]
    fn test_range_errors_carry_the_path() {
        let node = SchemaNode::new("byte", FieldType::FixedUint(1));
        match roundtrip(node, Value::UInt(256)).unwrap_err() {
            CoreError::Field(FieldError::OutOfRange { path, .. }) => assert_eq!(path, "byte"),
            other => panic!("unexpected error {:?}", other),
        }

        let node = SchemaNode::new("count", FieldType::UInt);
        assert!(matches!(
            roundtrip(node, Value::Int(-1)).unwrap_err(),
            CoreError::Field(FieldError::OutOfRange { .. })
        ));

        let node = SchemaNode::new("name", FieldType::String);
        assert!(matches!(
            roundtrip(node, Value::UInt(1)).unwrap_err(),
            CoreError::Field(FieldError::WrongType { .. })
        ));
    }

    #[test]
    fn test_enumerations() {
        let mut schema = Schema::new(vec![]);
        let country = schema.add_enumeration("country", vec!["FR", "DE"]);
        let node = SchemaNode::new("country", FieldType::Enum(country));

        let mut out = WriteStream::new();
        encode_leaf(&schema, &node, "country", &Value::from("DE"), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[1]);

        let err = encode_leaf(&schema, &node, "country", &Value::from("IT"), &mut out).unwrap_err();
        assert!(matches!(err, CoreError::Schema(SchemaError::NotInEnum { .. })));

        let mut input = ReadStream::new(&[5]);
        let err = decode_leaf(&schema, &node, "country", &mut input, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::Schema(SchemaError::NotInEnum { .. })));
    }

    #[test]
    fn test_string_length_limit() {
        let node = SchemaNode::new("text", FieldType::String);
        let mut out = WriteStream::new();
        out.write_string("too long");
        let bytes = out.into_bytes();

        let limits = DecodeConfig { max_string_length: 4, ..DecodeConfig::default() };
        let err = decode_leaf(&Schema::default(), &node, "text", &mut ReadStream::new(&bytes), &limits).unwrap_err();
        assert!(matches!(err, CoreError::Field(FieldError::BadSize { expected: 4, actual: 8, .. })));
    }
}
