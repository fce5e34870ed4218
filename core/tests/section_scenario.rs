//! End-to-end section encoding with partial keys and selective disclosure

use carmentis_core::crypto::ChannelKey;
use carmentis_core::proof::{decode_proof, DisclosureMode, LeafRef};
use carmentis_core::record::{EncodeOptions, Value};
use carmentis_core::schema::{FieldType, Schema, SchemaNode};
use carmentis_core::section::{
    EncodedSection, KeyId, SectionDecoder, SectionDefinition, SectionEncoder, SectionPosition, StaticKeyResolver,
    SubsectionDefinition,
};
use carmentis_core::{verify_section_proof, EngineConfig};

const CHANNEL_A: KeyId = KeyId { key_type: 1, key_index: 10 };
const CHANNEL_B: KeyId = KeyId { key_type: 1, key_index: 20 };
const POSITION: SectionPosition = SectionPosition { height: 1_024, section_index: 3 };

fn definition() -> SectionDefinition {
    let mut schema = Schema::new(vec![]);
    let address = schema.add_structure(
        "address",
        vec![SchemaNode::new("line1", FieldType::String), SchemaNode::new("line2", FieldType::String)],
    );
    schema.nodes = vec![
        SchemaNode::new("name", FieldType::String),
        SchemaNode::new("city", FieldType::String).private(),
        SchemaNode::new("address", FieldType::Struct(address)).private(),
        SchemaNode::new("countryCode", FieldType::String).private(),
    ];

    let channel_a = SubsectionDefinition::new(1, CHANNEL_A)
        .provable()
        .with_rule("city")
        .and_then(|s| s.with_rule("address.*"))
        .unwrap();
    let channel_b = SubsectionDefinition::new(2, CHANNEL_B).provable().with_rule("countryCode").unwrap();
    SectionDefinition::new(5, schema, true, vec![channel_a, channel_b]).unwrap()
}

fn record() -> Value {
    Value::object()
        .with("name", "Carmentis SAS")
        .with("city", "Paris")
        .with("address", Value::object().with("line1", "10 avenue des Champs").with("line2", "3e étage"))
        .with("countryCode", "FR")
}

fn keys(ids: &[KeyId]) -> StaticKeyResolver {
    let mut resolver = StaticKeyResolver::new();
    for id in ids {
        resolver.insert(*id, ChannelKey::from_bytes([id.key_index as u8; 32]));
    }
    resolver
}

async fn encode(definition: &SectionDefinition) -> EncodedSection {
    let config = EngineConfig::testing();
    let resolver = keys(&[CHANNEL_A, CHANNEL_B]);
    SectionEncoder::new(definition, &resolver, &config)
        .encode(&record(), POSITION, &EncodeOptions::new())
        .await
        .unwrap()
}

async fn decode(definition: &SectionDefinition, encoded: &EncodedSection, ids: &[KeyId]) -> Value {
    let config = EngineConfig::testing();
    let resolver = keys(ids);
    SectionDecoder::new(definition, &resolver, &config)
        .decode(&encoded.section, POSITION)
        .await
        .unwrap()
        .record
}

#[tokio::test]
async fn test_without_keys_only_public_fields() {
    let definition = definition();
    let encoded = encode(&definition).await;

    let decoded = decode(&definition, &encoded, &[]).await;
    assert_eq!(decoded, Value::object().with("name", "Carmentis SAS"));
}

#[tokio::test]
async fn test_with_channel_a_key() {
    let definition = definition();
    let encoded = encode(&definition).await;

    let decoded = decode(&definition, &encoded, &[CHANNEL_A]).await;
    let expected = Value::object()
        .with("name", "Carmentis SAS")
        .with("city", "Paris")
        .with("address", Value::object().with("line1", "10 avenue des Champs").with("line2", "3e étage"));
    assert_eq!(decoded, expected);
    assert!(decoded.get("countryCode").is_none());
}

#[tokio::test]
async fn test_with_both_keys_full_record() {
    let definition = definition();
    let encoded = encode(&definition).await;

    assert_eq!(decode(&definition, &encoded, &[CHANNEL_A, CHANNEL_B]).await, record());
}

#[tokio::test]
async fn test_proof_of_name_and_country_code() {
    let definition = definition();
    let encoded = encode(&definition).await;
    let config = EngineConfig::testing();

    // the reader holding both keys rebuilds the same trees the writer kept
    let resolver = keys(&[CHANNEL_A, CHANNEL_B]);
    let decoded = SectionDecoder::new(&definition, &resolver, &config)
        .decode(&encoded.section, POSITION)
        .await
        .unwrap();
    assert_eq!(decoded.trees.len(), 3);

    let proof = decoded
        .prove(encoded.section.id, |_, leaf: &LeafRef<'_>| match leaf.path.dotted().as_str() {
            "name" | "countryCode" => DisclosureMode::Plain,
            _ => DisclosureMode::Redacted,
        })
        .unwrap();

    for part in &proof.subsections {
        let (_, root) =
            decode_proof(&definition.schema, definition.router(), part.subsection_id, &part.proof, &config).unwrap();
        assert_eq!(root, encoded.trees[&part.subsection_id].root_hash());
        assert_eq!(Some(root), encoded.section.subsection(part.subsection_id).unwrap().merkle_root);
    }

    let disclosed = verify_section_proof(&definition, &encoded.section, &proof, &config).unwrap();
    let expected = Value::object()
        .with("name", "Carmentis SAS")
        .with("city", Value::Redacted)
        .with("address", Value::Redacted)
        .with("countryCode", "FR");
    assert_eq!(disclosed, expected);
}
