//! Schema validation
//!
//! This module checks schemas once, when they are defined, so that the
//! traversals never meet an inconsistent tree.

use std::collections::HashSet;

use super::{ArrayShape, FieldType, Schema, SchemaNode};
use crate::error::SchemaError;

/// Largest scale accepted for decimals
pub const MAX_DECIMAL_SCALE: u32 = 18;

/// Largest enumeration, indices are encoded on one byte
pub const MAX_ENUM_VALUES: usize = 256;

/// Schema validator
#[derive(Debug, Clone)]
pub struct SchemaValidator;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl SchemaValidator {
    /// Validate a whole schema
    pub fn validate(schema: &Schema) -> Result<(), SchemaError> {
        for enumeration in &schema.enumerations {
            if enumeration.values.is_empty() || enumeration.values.len() > MAX_ENUM_VALUES {
                return Err(SchemaError::InvalidNode {
                    path: enumeration.name.clone(),
                    reason: format!("enumeration must have 1 to {} values", MAX_ENUM_VALUES),
                });
            }
            let mut seen = HashSet::new();
            for value in &enumeration.values {
                if !seen.insert(value) {
                    return Err(SchemaError::InvalidNode {
                        path: enumeration.name.clone(),
                        reason: format!("duplicate enumeration value '{}'", value),
                    });
                }
            }
        }

        Self::validate_level(schema, &schema.nodes, "")?;
        for structure in &schema.structures {
            Self::validate_level(schema, &structure.nodes, &structure.name)?;
        }

        Self::check_acyclic(schema)
    }

    /// Validate the nodes of one level
    fn validate_level(schema: &Schema, nodes: &[SchemaNode], prefix: &str) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        for node in nodes {
            let path = if prefix.is_empty() {
                node.name.clone()
            } else {
                format!("{}.{}", prefix, node.name)
            };

            Self::validate_name(&node.name, &path)?;
            if !names.insert(node.name.as_str()) {
                return Err(SchemaError::DuplicateField(path));
            }
            Self::validate_node(schema, node, &path)?;

            if let FieldType::Object(children) = &node.field_type {
                Self::validate_level(schema, children, &path)?;
            }
        }
        Ok(())
    }

    fn validate_name(name: &str, path: &str) -> Result<(), SchemaError> {
        let numeric = name.chars().all(|c| c.is_ascii_digit());
        if name.is_empty() || numeric || name.contains('.') || name.contains('*') {
            return Err(SchemaError::InvalidFieldName(path.to_string()));
        }
        Ok(())
    }

    fn validate_node(schema: &Schema, node: &SchemaNode, path: &str) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidNode { path: path.to_string(), reason: reason.to_string() };

        match &node.field_type {
            FieldType::FixedUint(width) | FieldType::FixedInt(width) if *width == 0 || *width > 8 => {
                return Err(invalid("fixed integer width must be 1 to 8 bytes"));
            }
            FieldType::Struct(index) if *index >= schema.structures.len() => {
                return Err(SchemaError::UnknownStructure(*index));
            }
            FieldType::Enum(index) if *index >= schema.enumerations.len() => {
                return Err(SchemaError::UnknownEnumeration(*index));
            }
            _ => {}
        }

        match node.size {
            Some(0) => return Err(invalid("size must be non-zero")),
            Some(_) if !matches!(node.field_type, FieldType::String | FieldType::Binary) => {
                return Err(invalid("size only applies to strings and binary data"));
            }
            _ => {}
        }

        match node.scale {
            Some(scale) if node.field_type != FieldType::Decimal => {
                return Err(invalid(&format!("scale {} set on a non-decimal field", scale)));
            }
            Some(scale) if scale > MAX_DECIMAL_SCALE => {
                return Err(invalid(&format!("scale must not exceed {}", MAX_DECIMAL_SCALE)));
            }
            _ => {}
        }

        if node.array == Some(ArrayShape::Fixed(0)) {
            return Err(invalid("fixed array size must be non-zero"));
        }

        Ok(())
    }

    /// Reject structures that reach themselves through struct references
    fn check_acyclic(schema: &Schema) -> Result<(), SchemaError> {
        let mut marks = vec![Mark::Unvisited; schema.structures.len()];
        for index in 0..schema.structures.len() {
            Self::visit_structure(schema, index, &mut marks)?;
        }
        Ok(())
    }

    fn visit_structure(schema: &Schema, index: usize, marks: &mut [Mark]) -> Result<(), SchemaError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(SchemaError::CyclicStructure(schema.structures[index].name.clone())),
            Mark::Unvisited => {}
        }

        marks[index] = Mark::InProgress;
        let mut references = Vec::new();
        collect_references(&schema.structures[index].nodes, &mut references);
        for reference in references {
            Self::visit_structure(schema, reference, marks)?;
        }
        marks[index] = Mark::Done;

        Ok(())
    }
}

/// Struct indices referenced by a level, including inline objects
fn collect_references(nodes: &[SchemaNode], out: &mut Vec<usize>) {
    for node in nodes {
        match &node.field_type {
            FieldType::Struct(index) => out.push(*index),
            FieldType::Object(children) => collect_references(children, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BlobKind;

    #[test]
    fn test_valid_schema() {
        let mut schema = Schema::new(vec![]);
        let line = schema.add_structure("line", vec![SchemaNode::new("text", FieldType::String)]);
        let country = schema.add_enumeration("country", vec!["FR", "DE"]);
        schema.nodes = vec![
            SchemaNode::new("name", FieldType::String).size(16),
            SchemaNode::new("lines", FieldType::Struct(line)).fixed_array(2),
            SchemaNode::new("country", FieldType::Enum(country)),
            SchemaNode::new("price", FieldType::Decimal).scale(2),
            SchemaNode::new("hash", FieldType::Blob(BlobKind::Hash)),
            SchemaNode::new("counter", FieldType::FixedUint(4)),
            SchemaNode::new("attachment", FieldType::File).optional(),
        ];

        assert!(SchemaValidator::validate(&schema).is_ok());
    }

    #[test]
    fn test_duplicate_field() {
        let schema = Schema::new(vec![
            SchemaNode::new("name", FieldType::String),
            SchemaNode::new("name", FieldType::UInt),
        ]);
        assert_eq!(
            SchemaValidator::validate(&schema),
            Err(SchemaError::DuplicateField("name".to_string()))
        );
    }

    #[test]
    fn test_duplicate_in_inline_object() {
        let schema = Schema::new(vec![SchemaNode::new(
            "meta",
            FieldType::Object(vec![SchemaNode::new("a", FieldType::Int), SchemaNode::new("a", FieldType::Int)]),
        )]);
        assert_eq!(
            SchemaValidator::validate(&schema),
            Err(SchemaError::DuplicateField("meta.a".to_string()))
        );
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "12", "a.b", "a*"] {
            let schema = Schema::new(vec![SchemaNode::new(name, FieldType::String)]);
            assert!(
                matches!(SchemaValidator::validate(&schema), Err(SchemaError::InvalidFieldName(_))),
                "name {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_cyclic_structures() {
        let mut schema = Schema::new(vec![]);
        schema.add_structure("a", vec![SchemaNode::new("b", FieldType::Struct(1))]);
        schema.add_structure(
            "b",
            vec![SchemaNode::new("inner", FieldType::Object(vec![SchemaNode::new("a", FieldType::Struct(0))]))],
        );

        assert!(matches!(
            SchemaValidator::validate(&schema),
            Err(SchemaError::CyclicStructure(_))
        ));
    }

    #[test]
    fn test_bad_references() {
        let schema = Schema::new(vec![SchemaNode::new("s", FieldType::Struct(3))]);
        assert_eq!(SchemaValidator::validate(&schema), Err(SchemaError::UnknownStructure(3)));

        let schema = Schema::new(vec![SchemaNode::new("e", FieldType::Enum(0))]);
        assert_eq!(SchemaValidator::validate(&schema), Err(SchemaError::UnknownEnumeration(0)));
    }

    #[test]
    fn test_modifier_misuse() {
        let cases = vec![
            SchemaNode::new("n", FieldType::UInt).size(4),
            SchemaNode::new("n", FieldType::String).scale(2),
            SchemaNode::new("n", FieldType::Decimal).scale(19),
            SchemaNode::new("n", FieldType::FixedInt(9)),
            SchemaNode::new("n", FieldType::String).fixed_array(0),
            SchemaNode::new("n", FieldType::Binary).size(0),
        ];
        for node in cases {
            let schema = Schema::new(vec![node.clone()]);
            assert!(
                matches!(SchemaValidator::validate(&schema), Err(SchemaError::InvalidNode { .. })),
                "{:?} should be rejected",
                node
            );
        }
    }

    #[test]
    fn test_enumeration_limits() {
        let mut schema = Schema::new(vec![]);
        schema.add_enumeration::<&str>("empty", vec![]);
        assert!(SchemaValidator::validate(&schema).is_err());

        let mut schema = Schema::new(vec![]);
        schema.add_enumeration("dup", vec!["x", "x"]);
        assert!(SchemaValidator::validate(&schema).is_err());
    }
}
