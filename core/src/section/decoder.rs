//! Section decoder

use std::collections::BTreeMap;

use log::{debug, warn};

use super::envelope::Envelope;
use super::{KeyContext, KeyResolver, Section, SectionDefinition, SectionPosition, Subsection};
use crate::access::PUBLIC_SUBSECTION;
use crate::config::EngineConfig;
use crate::crypto::{verify_hash, AesGcmCipher, HkdfSha256, KeyDerivation, SubsectionCipher, SubsectionKeyMaterial};
use crate::error::SectionError;
use crate::merkle::{FieldMerkleTree, FieldMerklizer};
use crate::proof::{DisclosureMode, LeafRef, SectionProof};
use crate::record::{decode_subsection, Value};
use crate::Result;

/// What a reader could recover from a section
#[derive(Debug, Clone)]
pub struct DecodedSection {
    /// Merged fields of every readable subsection
    pub record: Value,
    /// Ids of the subsections that were read
    pub visible: Vec<u32>,
    /// Rebuilt Merkle trees of the readable provable subsections
    pub trees: BTreeMap<u32, FieldMerkleTree>,
}

impl DecodedSection {
    /// Prove the readable provable subsections under `policy`
    pub fn prove<F>(&self, section_id: u32, policy: F) -> Result<SectionProof>
    where
        F: FnMut(u32, &LeafRef<'_>) -> DisclosureMode,
    {
        SectionProof::generate(section_id, &self.trees, policy)
    }
}

/// Opens the subsections a reader holds keys for
pub struct SectionDecoder<'a> {
    definition: &'a SectionDefinition,
    resolver: &'a dyn KeyResolver,
    config: &'a EngineConfig,
    kdf: &'a dyn KeyDerivation,
    cipher: &'a dyn SubsectionCipher,
}

impl<'a> SectionDecoder<'a> {
    /// Create a decoder with HKDF-SHA256 and AES-256-GCM
    pub fn new(definition: &'a SectionDefinition, resolver: &'a dyn KeyResolver, config: &'a EngineConfig) -> Self {
        SectionDecoder { definition, resolver, config, kdf: &HkdfSha256, cipher: &AesGcmCipher }
    }

    /// Use another key derivation function
    pub fn with_kdf(mut self, kdf: &'a dyn KeyDerivation) -> Self {
        self.kdf = kdf;
        self
    }

    /// Use another cipher
    pub fn with_cipher(mut self, cipher: &'a dyn SubsectionCipher) -> Self {
        self.cipher = cipher;
        self
    }

    /// Decode every subsection of `section` the resolver has a key for
    pub async fn decode(&self, section: &Section, position: SectionPosition) -> Result<DecodedSection> {
        let definition = self.definition;
        if section.id != definition.id {
            return Err(SectionError::InvalidDefinition {
                section: section.id,
                reason: format!("decoder is bound to section {}", definition.id),
            }
            .into());
        }

        let mut decoded = DecodedSection { record: Value::object(), visible: Vec::new(), trees: BTreeMap::new() };

        for subsection in &section.subsections {
            let Some(plaintext) = self.open(subsection, position).await? else { continue };
            let envelope = Envelope::open(&plaintext, subsection.id)?;

            let merklizer = match definition.is_provable(subsection.id) {
                true => {
                    let pepper = envelope.pepper.ok_or(SectionError::MalformedEnvelope(subsection.id))?;
                    Some(FieldMerklizer::new(pepper))
                }
                false => None,
            };
            let (value, tree) = decode_subsection(
                &definition.schema,
                definition.router(),
                subsection.id,
                &envelope.data,
                &self.config.decode,
                merklizer,
            )?;

            if let Some(tree) = tree {
                let committed = subsection.merkle_root.ok_or(SectionError::MissingMerkleRoot(subsection.id))?;
                if !verify_hash(&committed, &tree.root_hash()) {
                    return Err(SectionError::BadMerkleHash(subsection.id).into());
                }
                decoded.trees.insert(subsection.id, tree);
            }

            merge_values(&mut decoded.record, value, "")?;
            decoded.visible.push(subsection.id);
        }

        debug!("section {}: read subsections {:?}", section.id, decoded.visible);
        Ok(decoded)
    }

    /// Plaintext envelope of a subsection, or `None` when it cannot be read
    async fn open(&self, subsection: &Subsection, position: SectionPosition) -> Result<Option<Vec<u8>>> {
        let id = subsection.id;
        if id == PUBLIC_SUBSECTION {
            if subsection.kind.private {
                return Err(SectionError::MalformedEnvelope(id).into());
            }
            return Ok(Some(subsection.data.clone()));
        }

        let declared = self.definition.subsection(id).ok_or(SectionError::UnknownSubsection(id))?;
        if let Some(published) = &subsection.access_rules {
            if published != &declared.rules {
                warn!("subsection {} publishes rules that differ from its definition, discarding it", id);
                return Ok(None);
            }
        }

        let context = KeyContext {
            section_id: self.definition.id,
            height: position.height,
            section_index: position.section_index,
            subsection_id: id,
        };
        let Some(key) = self.resolver.resolve(&declared.key, &context).await? else {
            debug!("no key for subsection {}, skipping", id);
            return Ok(None);
        };

        let material = SubsectionKeyMaterial::derive(&key, self.kdf, position.height, position.section_index, id)?;
        let plaintext = self
            .cipher
            .decrypt(material.key(), &subsection.data, material.iv())
            .map_err(|_| SectionError::DecryptionFailed(id))?;
        Ok(Some(plaintext))
    }
}

/// Deep-merge the fields of one subsection into a record
///
/// Redacted values yield to anything; other values must agree.
pub(crate) fn merge_values(into: &mut Value, from: Value, path: &str) -> std::result::Result<(), SectionError> {
    if matches!(from, Value::Redacted) {
        return Ok(());
    }
    if matches!(into, Value::Redacted) {
        *into = from;
        return Ok(());
    }

    let child = |name: &str| if path.is_empty() { name.to_string() } else { format!("{}.{}", path, name) };
    match (into, from) {
        (Value::Object(target), Value::Object(source)) => {
            for (name, value) in source {
                let child_path = child(&name);
                match target.get_mut(&name) {
                    Some(existing) => merge_values(existing, value, &child_path)?,
                    None => {
                        target.insert(name, value);
                    }
                }
            }
            Ok(())
        }
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (index, (existing, value)) in target.iter_mut().zip(source).enumerate() {
                merge_values(existing, value, &child(&index.to_string()))?;
            }
            Ok(())
        }
        (target, value) if *target == value => Ok(()),
        _ => Err(SectionError::Conflict(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessRule;
    use crate::crypto::ChannelKey;
    use crate::error::CoreError;
    use crate::record::EncodeOptions;
    use crate::section::fixtures::{company_definition, company_record, resolver, OfflineResolver, KEY_A, KEY_B};
    use crate::section::{EncodedSection, SectionEncoder, StaticKeyResolver};

    const POSITION: SectionPosition = SectionPosition { height: 12, section_index: 2 };

    async fn encoded() -> (SectionDefinition, EncodedSection) {
        let definition = company_definition();
        let keys = resolver(&[KEY_A, KEY_B]);
        let config = EngineConfig::testing();
        let encoded = SectionEncoder::new(&definition, &keys, &config)
            .encode(&company_record(), POSITION, &EncodeOptions::new())
            .await
            .unwrap();
        (definition, encoded)
    }

    async fn decode_with(definition: &SectionDefinition, section: &Section, keys: &StaticKeyResolver) -> Result<DecodedSection> {
        let config = EngineConfig::testing();
        SectionDecoder::new(definition, keys, &config).decode(section, POSITION).await
    }

    #[tokio::test]
    async fn test_visibility_follows_keys() {
        let (definition, encoded) = encoded().await;

        let none = decode_with(&definition, &encoded.section, &resolver(&[])).await.unwrap();
        assert_eq!(none.record, Value::object().with("name", "Carmentis SAS"));
        assert_eq!(none.visible, vec![0]);

        let only_a = decode_with(&definition, &encoded.section, &resolver(&[KEY_A])).await.unwrap();
        assert_eq!(only_a.visible, vec![0, 1]);
        assert!(only_a.record.get("city").is_some());
        assert!(only_a.record.get("address").is_some());
        assert!(only_a.record.get("countryCode").is_none());

        let both = decode_with(&definition, &encoded.section, &resolver(&[KEY_A, KEY_B])).await.unwrap();
        assert_eq!(both.record, company_record());
        for (id, tree) in &both.trees {
            assert_eq!(tree.root_hash(), encoded.trees[id].root_hash());
        }
    }

    #[tokio::test]
    async fn test_wrong_key_fails_decryption() {
        let (definition, encoded) = encoded().await;
        let keys = StaticKeyResolver::new().with_key(KEY_A, ChannelKey::from_bytes([0xee; 32]));

        let result = decode_with(&definition, &encoded.section, &keys).await;
        assert!(matches!(result, Err(CoreError::Section(SectionError::DecryptionFailed(1)))));
    }

    #[tokio::test]
    async fn test_resolver_failure_aborts_decode() {
        let (definition, encoded) = encoded().await;
        let config = EngineConfig::testing();

        let result = SectionDecoder::new(&definition, &OfflineResolver, &config).decode(&encoded.section, POSITION).await;
        match result {
            Err(CoreError::Section(SectionError::KeyResolution(msg))) => assert!(msg.contains("subsection 1")),
            other => panic!("expected KeyResolution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_position_fails_decryption() {
        let (definition, encoded) = encoded().await;
        let config = EngineConfig::testing();
        let keys = resolver(&[KEY_B]);

        let result = SectionDecoder::new(&definition, &keys, &config)
            .decode(&encoded.section, SectionPosition { height: 13, section_index: 2 })
            .await;
        assert!(matches!(result, Err(CoreError::Section(SectionError::DecryptionFailed(2)))));
    }

    #[tokio::test]
    async fn test_committed_root_is_checked() {
        let (definition, mut encoded) = encoded().await;
        encoded.section.subsections[1].merkle_root = Some([0u8; 32]);

        let result = decode_with(&definition, &encoded.section, &resolver(&[KEY_A])).await;
        assert!(matches!(result, Err(CoreError::Section(SectionError::BadMerkleHash(1)))));

        encoded.section.subsections[1].merkle_root = None;
        let result = decode_with(&definition, &encoded.section, &resolver(&[KEY_A])).await;
        assert!(matches!(result, Err(CoreError::Section(SectionError::MissingMerkleRoot(1)))));
    }

    #[tokio::test]
    async fn test_mismatching_published_rules_discard_subsection() {
        let (definition, mut encoded) = encoded().await;
        encoded.section.subsections[2].access_rules = Some(vec![AccessRule::new("city", 2).unwrap()]);

        let decoded = decode_with(&definition, &encoded.section, &resolver(&[KEY_A, KEY_B])).await.unwrap();
        assert_eq!(decoded.visible, vec![0, 1]);
        assert!(decoded.record.get("countryCode").is_none());
    }

    #[tokio::test]
    async fn test_unknown_subsection() {
        let (definition, mut encoded) = encoded().await;
        encoded.section.subsections[2].id = 9;

        let result = decode_with(&definition, &encoded.section, &resolver(&[])).await;
        assert!(matches!(result, Err(CoreError::Section(SectionError::UnknownSubsection(9)))));
    }

    #[tokio::test]
    async fn test_wire_bytes() {
        let (definition, encoded) = encoded().await;
        let section = Section::from_bytes(&encoded.section.to_bytes().unwrap()).unwrap();

        let decoded = decode_with(&definition, &section, &resolver(&[KEY_A, KEY_B])).await.unwrap();
        assert_eq!(decoded.record, company_record());
    }

    #[test]
    fn test_merge_values() {
        let mut record = Value::object().with("a", Value::object().with("x", 1u64)).with("n", Value::Redacted);
        let part = Value::object()
            .with("a", Value::object().with("y", 2u64))
            .with("n", 3u64)
            .with("l", Value::Array(vec![Value::Redacted, 5u64.into()]));
        merge_values(&mut record, part, "").unwrap();
        merge_values(&mut record, Value::object().with("l", Value::Array(vec![4u64.into(), Value::Redacted])), "")
            .unwrap();

        let expected = Value::object()
            .with("a", Value::object().with("x", 1u64).with("y", 2u64))
            .with("n", 3u64)
            .with("l", Value::Array(vec![4u64.into(), 5u64.into()]));
        assert_eq!(record, expected);

        let conflict = merge_values(&mut record, Value::object().with("a", Value::object().with("x", 9u64)), "");
        assert_eq!(conflict, Err(SectionError::Conflict("a.x".to_string())));
    }
}
