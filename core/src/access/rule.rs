//! Access rules

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::record::MaskRule;
use crate::schema::{FieldPath, PathSegment};

/// Dotted rule path, optionally ending with a `*` wildcard
///
/// Numeric segments address array elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RulePath {
    segments: Vec<PathSegment>,
    wildcard: bool,
}

impl RulePath {
    /// Segments before the wildcard, or all of them
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Whether the path ends with `*`
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Whether the path names exactly this field
    pub fn matches_exactly(&self, path: &FieldPath) -> bool {
        !self.wildcard && self.segments == path.name_path
    }

    /// Priority of a wildcard match, `None` if the prefix does not strictly
    /// precede the field
    pub fn wildcard_priority(&self, path: &FieldPath) -> Option<usize> {
        let prefix = &self.segments;
        if self.wildcard && path.name_path.len() > prefix.len() && path.name_path.starts_with(prefix) {
            Some(prefix.len())
        } else {
            None
        }
    }

    /// Whether the rule may match a field below the container at `path`
    pub fn may_reach_below(&self, path: &FieldPath) -> bool {
        let common = self.segments.len().min(path.name_path.len());
        if self.segments[..common] != path.name_path[..common] {
            return false;
        }
        self.wildcard || self.segments.len() > path.name_path.len()
    }
}

impl FromStr for RulePath {
    type Err = AccessError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| AccessError::InvalidRule { path: text.to_string(), reason: reason.to_string() };
        if text.is_empty() {
            return Err(invalid("empty path"));
        }

        let parts: Vec<&str> = text.split('.').collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut wildcard = false;
        for (i, part) in parts.iter().enumerate() {
            if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(invalid("wildcard must be the last segment"));
                }
                wildcard = true;
            } else if part.is_empty() || part.contains('*') {
                return Err(invalid("empty or partial wildcard segment"));
            } else if part.chars().all(|c| c.is_ascii_digit()) {
                segments.push(PathSegment::Index(part.parse().map_err(|_| invalid("index out of range"))?));
            } else {
                segments.push(PathSegment::Name(part.to_string()));
            }
        }
        Ok(RulePath { segments, wildcard })
    }
}

impl TryFrom<String> for RulePath {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RulePath> for String {
    fn from(path: RulePath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for RulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.segments.iter().map(ToString::to_string).collect();
        if self.wildcard {
            parts.push("*".to_string());
        }
        f.write_str(&parts.join("."))
    }
}

/// How a routed leaf is committed and may later be disclosed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisclosureModifier {
    /// Committed by value
    #[default]
    Plain,
    /// Committed by value hash, can be disclosed as that hash
    Hashable,
    /// String committed as visible and hidden parts
    Maskable(Option<MaskRule>),
}

/// Routing directive from a field path to a subsection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Field path, may end with a wildcard
    pub path: RulePath,
    /// Target subsection
    pub subsection_id: u32,
    /// Disclosure modifier of the matched leaves
    #[serde(default)]
    pub modifier: DisclosureModifier,
}

impl AccessRule {
    /// Parse a rule with the plain modifier
    pub fn new(path: &str, subsection_id: u32) -> Result<Self, AccessError> {
        Ok(AccessRule { path: path.parse()?, subsection_id, modifier: DisclosureModifier::Plain })
    }

    /// Replace the modifier
    pub fn with_modifier(mut self, modifier: DisclosureModifier) -> Self {
        self.modifier = modifier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(dotted: &[PathSegment]) -> FieldPath {
        let mut path = FieldPath::root();
        for (i, segment) in dotted.iter().enumerate() {
            path = match segment {
                PathSegment::Name(name) => path.child(i, name),
                PathSegment::Index(index) => path.element(*index),
            };
        }
        path
    }

    fn name(n: &str) -> PathSegment {
        PathSegment::Name(n.to_string())
    }

    #[test]
    fn test_parse_and_display() {
        let path: RulePath = "address.*".parse().unwrap();
        assert!(path.is_wildcard());
        assert_eq!(path.segments(), &[name("address")]);
        assert_eq!(path.to_string(), "address.*");

        let path: RulePath = "items.2.name".parse().unwrap();
        assert_eq!(path.segments()[1], PathSegment::Index(2));

        for bad in ["", "a..b", "*.a", "a*"] {
            assert!(bad.parse::<RulePath>().is_err(), "{:?} should be rejected", bad);
        }
        assert!("*".parse::<RulePath>().unwrap().segments().is_empty());
    }

    #[test]
    fn test_matching() {
        let wildcard: RulePath = "address.*".parse().unwrap();
        let exact: RulePath = "address.line1".parse().unwrap();
        let line1 = field(&[name("address"), name("line1")]);
        let address = field(&[name("address")]);

        assert!(exact.matches_exactly(&line1));
        assert!(!wildcard.matches_exactly(&line1));
        assert_eq!(wildcard.wildcard_priority(&line1), Some(1));
        assert_eq!(wildcard.wildcard_priority(&address), None);
        assert_eq!("*".parse::<RulePath>().unwrap().wildcard_priority(&address), Some(0));
    }

    #[test]
    fn test_may_reach_below() {
        let items = field(&[name("items")]);
        let element = field(&[name("items"), PathSegment::Index(1)]);

        let indexed: RulePath = "items.0.name".parse().unwrap();
        assert!(indexed.may_reach_below(&items));
        assert!(!indexed.may_reach_below(&element));

        let exact_container: RulePath = "items".parse().unwrap();
        assert!(!exact_container.may_reach_below(&items));

        let below: RulePath = "items.*".parse().unwrap();
        assert!(below.may_reach_below(&element));
        assert!(!below.may_reach_below(&field(&[name("other")])));
    }

    #[test]
    fn test_rule_serde() {
        let rule = AccessRule::new("address.*", 1).unwrap().with_modifier(DisclosureModifier::Hashable);
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"address.*\""));
        let back: AccessRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);

        assert!(serde_json::from_str::<AccessRule>(r#"{"path":"a.*.b","subsection_id":1}"#).is_err());
    }
}
