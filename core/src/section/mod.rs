//! Sections and subsections
//!
//! A section splits one record over a public subsection and private
//! subsections, each sealed with a key derived from its channel key.
//!
//! ```text
//! Section { id, subsections: [
//!     Subsection { id: 0, public,  data: envelope }
//!     Subsection { id: 1, private, key_id, merkle_root?, data: AEAD(envelope) }
//!     ...
//! ] }
//! ```

mod decoder;
mod encoder;
mod envelope;

pub use decoder::{DecodedSection, SectionDecoder};
pub use encoder::{EncodedSection, SectionEncoder};
pub use envelope::Envelope;

pub(crate) use decoder::merge_values;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::access::{AccessRouter, AccessRule, PUBLIC_SUBSECTION};
use crate::crypto::{ChannelKey, Hash};
use crate::error::SectionError;
use crate::schema::{Enumeration, Schema, SchemaNode, SchemaValidator, Structure};
use crate::Result;

/// Identifier of a channel key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId {
    /// Key family
    pub key_type: u8,
    /// Index within the family
    pub key_index: u32,
}

impl KeyId {
    /// Create a key id
    pub fn new(key_type: u8, key_index: u32) -> Self {
        KeyId { key_type, key_index }
    }
}

/// Position of a section in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionPosition {
    /// Height of the enclosing block
    pub height: u64,
    /// Index of the section within the block
    pub section_index: u32,
}

/// What a key resolver knows about the subsection being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyContext {
    /// Section id
    pub section_id: u32,
    /// Block height
    pub height: u64,
    /// Section index within the block
    pub section_index: u32,
    /// Subsection id
    pub subsection_id: u32,
}

/// Resolves channel keys, possibly by consulting chain state
///
/// `Ok(None)` means the caller cannot see the subsection; it is skipped,
/// never reported as an error. An `Err`, typically
/// [`SectionError::KeyResolution`], aborts the encode or decode.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Look up the key identified by `key`
    async fn resolve(&self, key: &KeyId, context: &KeyContext) -> Result<Option<ChannelKey>>;
}

/// In-memory key resolver
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<KeyId, ChannelKey>,
}

impl StaticKeyResolver {
    /// Create a resolver without keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key
    pub fn with_key(mut self, id: KeyId, key: ChannelKey) -> Self {
        self.keys.insert(id, key);
        self
    }

    /// Add or replace a key
    pub fn insert(&mut self, id: KeyId, key: ChannelKey) {
        self.keys.insert(id, key);
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, key: &KeyId, _context: &KeyContext) -> Result<Option<ChannelKey>> {
        Ok(self.keys.get(key).cloned())
    }
}

/// Declaration of one private subsection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionDefinition {
    /// Subsection id, at least 1
    pub id: u32,
    /// Channel key sealing the subsection
    pub key: KeyId,
    /// Whether the subsection commits to a Merkle root
    #[serde(default)]
    pub provable: bool,
    /// Whether the rules are copied into the wire subsection
    #[serde(default)]
    pub publish_rules: bool,
    /// Rules routing fields to this subsection, in priority order
    #[serde(default)]
    pub rules: Vec<AccessRule>,
}

impl SubsectionDefinition {
    /// Create a non-provable subsection without rules
    pub fn new(id: u32, key: KeyId) -> Self {
        SubsectionDefinition { id, key, provable: false, publish_rules: false, rules: Vec::new() }
    }

    /// Commit to a Merkle root
    pub fn provable(mut self) -> Self {
        self.provable = true;
        self
    }

    /// Copy the rules into the wire subsection
    pub fn publish_rules(mut self) -> Self {
        self.publish_rules = true;
        self
    }

    /// Append a rule routing `path` here
    pub fn with_rule(mut self, path: &str) -> Result<Self> {
        self.rules.push(AccessRule::new(path, self.id)?);
        Ok(self)
    }

    /// Append a prepared rule
    pub fn with_access_rule(mut self, rule: AccessRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Schema parts supplied by the application for one section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDefinition {
    /// Structure table
    #[serde(default)]
    pub structures: Vec<Structure>,
    /// Enumeration table
    #[serde(default)]
    pub enumerations: Vec<Enumeration>,
    /// Private subsections with their rules
    #[serde(default)]
    pub subsections: Vec<SubsectionDefinition>,
    /// Whether the public subsection commits to a Merkle root
    #[serde(default)]
    pub public_provable: bool,
}

impl ExternalDefinition {
    /// Parse a definition from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Source of external definitions
pub trait DefinitionProvider: Send + Sync {
    /// Definition of section `section_id`, if any
    fn definition(&self, section_id: u32) -> Option<ExternalDefinition>;
}

/// In-memory definition provider
#[derive(Debug, Clone, Default)]
pub struct StaticDefinitionProvider {
    definitions: HashMap<u32, ExternalDefinition>,
}

impl StaticDefinitionProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the definition of a section
    pub fn with_definition(mut self, section_id: u32, definition: ExternalDefinition) -> Self {
        self.definitions.insert(section_id, definition);
        self
    }
}

impl DefinitionProvider for StaticDefinitionProvider {
    fn definition(&self, section_id: u32) -> Option<ExternalDefinition> {
        self.definitions.get(&section_id).cloned()
    }
}

/// A validated section layout
#[derive(Debug, Clone)]
pub struct SectionDefinition {
    /// Section id
    pub id: u32,
    /// Record schema
    pub schema: Schema,
    /// Whether the public subsection commits to a Merkle root
    pub public_provable: bool,
    /// Private subsections in emission order
    pub subsections: Vec<SubsectionDefinition>,
    router: AccessRouter,
}

impl SectionDefinition {
    /// Validate a layout and compile its rules
    pub fn new(id: u32, schema: Schema, public_provable: bool, subsections: Vec<SubsectionDefinition>) -> Result<Self> {
        SchemaValidator::validate(&schema)?;
        let invalid = |reason: String| SectionError::InvalidDefinition { section: id, reason };

        let mut seen = BTreeSet::new();
        for subsection in &subsections {
            if subsection.id == PUBLIC_SUBSECTION {
                return Err(invalid("subsection 0 is reserved for public fields".to_string()).into());
            }
            if !seen.insert(subsection.id) {
                return Err(invalid(format!("subsection {} declared twice", subsection.id)).into());
            }
        }
        for rule in subsections.iter().flat_map(|s| s.rules.iter()) {
            if !seen.contains(&rule.subsection_id) {
                return Err(SectionError::UnknownSubsection(rule.subsection_id).into());
            }
        }

        let rules = subsections.iter().flat_map(|s| s.rules.iter().cloned()).collect();
        let router = AccessRouter::new(rules)?;
        router.validate(&schema)?;

        Ok(SectionDefinition { id, schema, public_provable, subsections, router })
    }

    /// Complete `nodes` with the external definition of section `id`
    pub fn resolve(id: u32, nodes: Vec<SchemaNode>, provider: &dyn DefinitionProvider) -> Result<Self> {
        let external = provider.definition(id).ok_or(SectionError::MissingDefinition(id))?;
        let schema = Schema { nodes, structures: external.structures, enumerations: external.enumerations };
        Self::new(id, schema, external.public_provable, external.subsections)
    }

    /// Compiled routing rules
    pub fn router(&self) -> &AccessRouter {
        &self.router
    }

    /// Declaration of a private subsection
    pub fn subsection(&self, id: u32) -> Option<&SubsectionDefinition> {
        self.subsections.iter().find(|s| s.id == id)
    }

    /// Whether subsection `id` commits to a Merkle root
    pub fn is_provable(&self, id: u32) -> bool {
        match id {
            PUBLIC_SUBSECTION => self.public_provable,
            _ => self.subsection(id).map_or(false, |s| s.provable),
        }
    }
}

/// Declared nature of a wire subsection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionKind {
    /// Sealed with a channel key
    pub private: bool,
    /// Carries a Merkle root
    pub provable: bool,
    /// Carries its access rules
    pub has_access_rules: bool,
}

/// One subsection as stored on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsection {
    /// Subsection id, 0 for the public one
    pub id: u32,
    /// Declared nature
    pub kind: SubsectionKind,
    /// Channel key of a private subsection
    pub key_id: Option<KeyId>,
    /// Committed root of a provable subsection
    pub merkle_root: Option<Hash>,
    /// Published rules
    pub access_rules: Option<Vec<AccessRule>>,
    /// Envelope, encrypted when private
    pub data: Vec<u8>,
}

/// A section as stored on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Section id
    pub id: u32,
    /// Public subsection first, then private ones in definition order
    pub subsections: Vec<Subsection>,
}

impl Section {
    /// Subsection by id
    pub fn subsection(&self, id: u32) -> Option<&Subsection> {
        self.subsections.iter().find(|s| s.id == id)
    }

    /// Serialize with bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bincode
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::record::Value;
    use crate::schema::FieldType;

    pub(crate) const KEY_A: KeyId = KeyId { key_type: 0, key_index: 1 };
    pub(crate) const KEY_B: KeyId = KeyId { key_type: 0, key_index: 2 };

    /// Company record split over two provable channels
    pub(crate) fn company_definition() -> SectionDefinition {
        let mut schema = Schema::new(vec![]);
        let address = schema.add_structure(
            "address",
            vec![
                SchemaNode::new("line1", FieldType::String),
                SchemaNode::new("line2", FieldType::String).optional(),
            ],
        );
        schema.nodes = vec![
            SchemaNode::new("name", FieldType::String),
            SchemaNode::new("city", FieldType::String).private(),
            SchemaNode::new("address", FieldType::Struct(address)).private(),
            SchemaNode::new("countryCode", FieldType::String).private(),
        ];

        let channel_a = SubsectionDefinition::new(1, KEY_A)
            .provable()
            .with_rule("city")
            .and_then(|s| s.with_rule("address.*"))
            .unwrap();
        let channel_b = SubsectionDefinition::new(2, KEY_B).provable().publish_rules().with_rule("countryCode").unwrap();

        SectionDefinition::new(1, schema, true, vec![channel_a, channel_b]).unwrap()
    }

    pub(crate) fn company_record() -> Value {
        Value::object()
            .with("name", "Carmentis SAS")
            .with("city", "Paris")
            .with("address", Value::object().with("line1", "5 rue de la Paix").with("line2", "Bâtiment B"))
            .with("countryCode", "FR")
    }

    /// Resolver holding a deterministic key for each of `ids`
    pub(crate) fn resolver(ids: &[KeyId]) -> StaticKeyResolver {
        ids.iter().fold(StaticKeyResolver::new(), |resolver, id| {
            resolver.with_key(*id, ChannelKey::from_bytes([id.key_index as u8; 32]))
        })
    }

    /// Resolver whose key store is unreachable
    pub(crate) struct OfflineResolver;

    #[async_trait]
    impl KeyResolver for OfflineResolver {
        async fn resolve(&self, key: &KeyId, context: &KeyContext) -> Result<Option<ChannelKey>> {
            Err(SectionError::KeyResolution(format!(
                "key ({}, {}) for subsection {}: store offline",
                key.key_type, key.key_index, context.subsection_id
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AccessError, CoreError};
    use crate::schema::FieldType;

    fn nodes() -> Vec<SchemaNode> {
        vec![
            SchemaNode::new("name", FieldType::String),
            SchemaNode::new("city", FieldType::String).private(),
        ]
    }

    fn channel() -> SubsectionDefinition {
        SubsectionDefinition::new(1, KeyId::new(0, 1)).with_rule("city").unwrap()
    }

    #[test]
    fn test_definition_validation() {
        assert!(SectionDefinition::new(1, Schema::new(nodes()), false, vec![channel()]).is_ok());

        let duplicate = vec![channel(), channel()];
        assert!(matches!(
            SectionDefinition::new(1, Schema::new(nodes()), false, duplicate),
            Err(CoreError::Section(SectionError::InvalidDefinition { .. }))
        ));

        let stray = SubsectionDefinition::new(1, KeyId::new(0, 1)).with_access_rule(AccessRule::new("city", 2).unwrap());
        assert!(matches!(
            SectionDefinition::new(1, Schema::new(nodes()), false, vec![stray]),
            Err(CoreError::Section(SectionError::UnknownSubsection(2)))
        ));

        let unknown = SubsectionDefinition::new(1, KeyId::new(0, 1)).with_rule("zip").unwrap();
        assert!(matches!(
            SectionDefinition::new(1, Schema::new(nodes()), false, vec![unknown]),
            Err(CoreError::Access(AccessError::InvalidRule { .. }))
        ));
    }

    #[test]
    fn test_resolve_from_provider() {
        let external = ExternalDefinition { subsections: vec![channel()], ..ExternalDefinition::default() };
        let provider = StaticDefinitionProvider::new().with_definition(7, external);

        let definition = SectionDefinition::resolve(7, nodes(), &provider).unwrap();
        assert_eq!(definition.id, 7);
        assert!(definition.subsection(1).is_some());
        assert!(!definition.is_provable(0));

        assert!(matches!(
            SectionDefinition::resolve(8, nodes(), &provider),
            Err(CoreError::Section(SectionError::MissingDefinition(8)))
        ));
    }

    #[test]
    fn test_external_definition_json() {
        let json = r#"{
            "subsections": [
                { "id": 1, "key": { "key_type": 0, "key_index": 3 }, "provable": true,
                  "rules": [ { "path": "city", "subsection_id": 1 } ] }
            ]
        }"#;
        let external = ExternalDefinition::from_json(json).unwrap();
        assert_eq!(external.subsections[0].key, KeyId::new(0, 3));
        assert!(external.subsections[0].provable);
        assert_eq!(external.subsections[0].rules[0].path.to_string(), "city");
    }

    #[tokio::test]
    async fn test_static_key_resolver() {
        let key = ChannelKey::from_bytes([1u8; 32]);
        let resolver = StaticKeyResolver::new().with_key(KeyId::new(0, 1), key.clone());
        let context = KeyContext { section_id: 1, height: 0, section_index: 0, subsection_id: 1 };

        assert_eq!(resolver.resolve(&KeyId::new(0, 1), &context).await.unwrap(), Some(key));
        assert_eq!(resolver.resolve(&KeyId::new(0, 2), &context).await.unwrap(), None);
    }
}
