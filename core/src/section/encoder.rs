//! Section encoder

use std::collections::BTreeMap;

use log::debug;

use super::envelope::{padding_length, Envelope};
use super::{KeyContext, KeyResolver, Section, SectionDefinition, SectionPosition, Subsection, SubsectionKind};
use crate::access::PUBLIC_SUBSECTION;
use crate::config::EngineConfig;
use crate::crypto::{
    random_hash, AesGcmCipher, Hash, HkdfSha256, KeyDerivation, SubsectionCipher, SubsectionKeyMaterial,
};
use crate::merkle::{FieldMerkleTree, FieldMerklizer};
use crate::proof::{DisclosureMode, LeafRef, SectionProof};
use crate::record::{encode_subsection, EncodeOptions, Value};
use crate::Result;

/// A freshly encoded section
#[derive(Debug, Clone)]
pub struct EncodedSection {
    /// Wire section
    pub section: Section,
    /// Merkle trees of the provable subsections, by subsection id
    pub trees: BTreeMap<u32, FieldMerkleTree>,
}

impl EncodedSection {
    /// Prove the provable subsections under `policy`
    pub fn prove<F>(&self, policy: F) -> Result<SectionProof>
    where
        F: FnMut(u32, &LeafRef<'_>) -> DisclosureMode,
    {
        SectionProof::generate(self.section.id, &self.trees, policy)
    }
}

/// Splits records into sealed subsections
pub struct SectionEncoder<'a> {
    definition: &'a SectionDefinition,
    resolver: &'a dyn KeyResolver,
    config: &'a EngineConfig,
    kdf: &'a dyn KeyDerivation,
    cipher: &'a dyn SubsectionCipher,
}

impl<'a> SectionEncoder<'a> {
    /// Create an encoder with HKDF-SHA256 and AES-256-GCM
    pub fn new(definition: &'a SectionDefinition, resolver: &'a dyn KeyResolver, config: &'a EngineConfig) -> Self {
        SectionEncoder { definition, resolver, config, kdf: &HkdfSha256, cipher: &AesGcmCipher }
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

    /// Encode `record` for the section at `position`
    ///
    /// Private subsections whose key cannot be resolved are left out.
    pub async fn encode(&self, record: &Value, position: SectionPosition, options: &EncodeOptions) -> Result<EncodedSection> {
        let definition = self.definition;
        let used = definition.router().assign(&definition.schema, record)?;

        let mut subsections = Vec::new();
        let mut trees = BTreeMap::new();

        if used.contains(&PUBLIC_SUBSECTION) {
            let (envelope, tree) = self.encode_fields(PUBLIC_SUBSECTION, record, options)?;
            let merkle_root = tree.as_ref().map(FieldMerkleTree::root_hash);
            let provable = merkle_root.is_some();
            subsections.push(Subsection {
                id: PUBLIC_SUBSECTION,
                kind: SubsectionKind { private: false, provable, has_access_rules: false },
                key_id: None,
                merkle_root,
                access_rules: None,
                data: envelope.seal(0),
            });
            if let Some(tree) = tree {
                trees.insert(PUBLIC_SUBSECTION, tree);
            }
        }

        for subsection in &definition.subsections {
            if !used.contains(&subsection.id) {
                continue;
            }

            let context = KeyContext {
                section_id: definition.id,
                height: position.height,
                section_index: position.section_index,
                subsection_id: subsection.id,
            };
            let Some(key) = self.resolver.resolve(&subsection.key, &context).await? else {
                debug!("no key for subsection {} of section {}, skipping", subsection.id, definition.id);
                continue;
            };

            let (envelope, tree) = self.encode_fields(subsection.id, record, options)?;
            let plaintext = envelope.seal(padding_length(&self.config.envelope));
            let material = SubsectionKeyMaterial::derive(
                &key,
                self.kdf,
                position.height,
                position.section_index,
                subsection.id,
            )?;
            let data = self.cipher.encrypt(material.key(), &plaintext, material.iv())?;

            let merkle_root = tree.as_ref().map(FieldMerkleTree::root_hash);
            debug!("sealed subsection {} ({} bytes of fields, {} on the wire)", subsection.id, envelope.data.len(), data.len());
            subsections.push(Subsection {
                id: subsection.id,
                kind: SubsectionKind {
                    private: true,
                    provable: merkle_root.is_some(),
                    has_access_rules: subsection.publish_rules,
                },
                key_id: Some(subsection.key),
                merkle_root,
                access_rules: subsection.publish_rules.then(|| subsection.rules.clone()),
                data,
            });
            if let Some(tree) = tree {
                trees.insert(subsection.id, tree);
            }
        }

        Ok(EncodedSection { section: Section { id: definition.id, subsections }, trees })
    }

    fn encode_fields(&self, id: u32, record: &Value, options: &EncodeOptions) -> Result<(Envelope, Option<FieldMerkleTree>)> {
        let definition = self.definition;
        let pepper: Option<Hash> = definition
            .is_provable(id)
            .then(|| options.peppers.get(&id).copied().unwrap_or_else(random_hash));

        let (data, tree) = encode_subsection(
            &definition.schema,
            definition.router(),
            id,
            record,
            options,
            pepper.map(FieldMerklizer::new),
        )?;
        Ok((Envelope::new(data, pepper), tree))
    }
}
