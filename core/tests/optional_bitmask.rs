//! Presence bitmask of optional fields

use proptest::prelude::*;
use rstest::rstest;

use carmentis_core::record::{decode_record, encode_record, Value};
use carmentis_core::schema::{FieldType, Schema, SchemaNode};

fn optional_fields(count: usize) -> Schema {
    Schema::new((0..count).map(|i| SchemaNode::new(format!("f{}", i), FieldType::UInt).optional()).collect())
}

fn record_with(presence: u32, count: usize) -> Value {
    (0..count)
        .filter(|i| presence >> i & 1 == 1)
        .fold(Value::object(), |record, i| record.with(&format!("f{}", i), (i as u64) * 3))
}

fn status_bytes(count: usize) -> usize {
    (count + 7) / 8
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(4)]
fn test_every_presence_combination(#[case] count: usize) {
    let schema = optional_fields(count);
    for presence in 0..(1u32 << count) {
        let record = record_with(presence, count);
        let bytes = encode_record(&schema, &record).unwrap();

        assert_eq!(bytes[0] as u32, presence);
        assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
    }
}

#[rstest]
#[case(8)]
#[case(9)]
#[case(16)]
fn test_status_byte_boundaries(#[case] count: usize) {
    let schema = optional_fields(count);

    let empty = encode_record(&schema, &Value::object()).unwrap();
    assert_eq!(empty, vec![0u8; status_bytes(count)]);
    assert_eq!(decode_record(&schema, &empty).unwrap(), Value::object());

    for presence in [1u32, 1 << (count - 1), (1 << count) - 1, 0x5555 & ((1 << count) - 1)] {
        let record = record_with(presence, count);
        let bytes = encode_record(&schema, &record).unwrap();
        assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
    }
}

#[test]
fn test_ninth_field_opens_second_byte() {
    let schema = optional_fields(9);
    let bytes = encode_record(&schema, &record_with(1 << 8, 9)).unwrap();

    // the second status byte is reserved when the ninth field is reached
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes[1], 1);
}

#[test]
fn test_each_structure_has_its_own_mask() {
    let mut schema = Schema::new(vec![]);
    let inner = schema.add_structure("inner", vec![SchemaNode::new("x", FieldType::UInt).optional()]);
    schema.nodes = vec![
        SchemaNode::new("a", FieldType::UInt).optional(),
        SchemaNode::new("inner", FieldType::Struct(inner)),
        SchemaNode::new("b", FieldType::UInt).optional(),
    ];

    let record = Value::object().with("b", 2u64).with("inner", Value::object().with("x", 1u64));
    let bytes = encode_record(&schema, &record).unwrap();
    assert_eq!(bytes[0], 0b10);
    assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
}

proptest! {
    #[test]
    fn prop_sixteen_optional_fields_round_trip(presence in 0u32..(1 << 16)) {
        let schema = optional_fields(16);
        let record = record_with(presence, 16);
        let bytes = encode_record(&schema, &record).unwrap();

        prop_assert_eq!(bytes[0], (presence & 0xff) as u8);
        prop_assert_eq!(decode_record(&schema, &bytes).unwrap(), record);
    }
}
