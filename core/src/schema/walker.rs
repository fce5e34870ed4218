//! Schema walker
//!
//! The single traversal used by every pass over a record: encoding, decoding,
//! access mapping and proof decoding differ only in their visitor.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Schema, SchemaNode, Visibility};
use crate::Result;

/// One segment of a human-readable field path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathSegment {
    /// Field name
    Name(String),
    /// Array index
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Name(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Position of a field, as schema indices and as names
///
/// Both representations always have the same length. Array elements append
/// their index to both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    /// Positional indices within each schema level
    pub index_path: Vec<u32>,
    /// Names and array indices
    pub name_path: Vec<PathSegment>,
}

impl FieldPath {
    /// The empty path of the record root
    pub fn root() -> Self {
        Self::default()
    }

    /// Path of the field at `position` named `name` below this one
    pub fn child(&self, position: usize, name: &str) -> Self {
        let mut path = self.clone();
        path.index_path.push(position as u32);
        path.name_path.push(PathSegment::Name(name.to_string()));
        path
    }

    /// Path of array element `index` below this one
    pub fn element(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.index_path.push(index as u32);
        path.name_path.push(PathSegment::Index(index));
        path
    }

    /// This path without its last segment
    pub fn parent(&self) -> Self {
        let mut path = self.clone();
        path.index_path.pop();
        path.name_path.pop();
        path
    }

    /// Last segment, `None` at the root
    pub fn last(&self) -> Option<&PathSegment> {
        self.name_path.last()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.name_path.len()
    }

    /// Whether this is the root path
    pub fn is_empty(&self) -> bool {
        self.name_path.is_empty()
    }

    /// Whether the path ends with an array index
    pub fn is_element(&self) -> bool {
        matches!(self.last(), Some(PathSegment::Index(_)))
    }

    /// Dotted rendering, e.g. `items.0.name`
    pub fn dotted(&self) -> String {
        self.to_string()
    }

    /// Index path as concatenated varuints, committed by Merkle leaves
    pub fn index_bytes(&self) -> Vec<u8> {
        let mut stream = crate::stream::WriteStream::new();
        stream.write_varuint(self.index_path.len() as u64);
        for index in &self.index_path {
            stream.write_varuint(u64::from(*index));
        }
        stream.into_bytes()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.name_path.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Traversal state handed to every visitor hook
#[derive(Debug)]
pub struct WalkContext<'p> {
    /// Path of the node being visited
    pub path: FieldPath,
    /// Whether this node or one of its ancestors is private
    pub private: bool,
    parent: Option<&'p WalkContext<'p>>,
}

impl<'p> WalkContext<'p> {
    /// Context of the record root
    pub fn root() -> WalkContext<'static> {
        WalkContext { path: FieldPath::root(), private: false, parent: None }
    }

    /// Context of a node below this one
    pub fn child(&'p self, position: usize, node: &SchemaNode) -> WalkContext<'p> {
        WalkContext {
            path: self.path.child(position, &node.name),
            private: self.private || node.visibility == Visibility::Private,
            parent: Some(self),
        }
    }

    /// Context of an array element, sharing its array's visibility
    pub fn element(&'p self, index: usize) -> WalkContext<'p> {
        WalkContext { path: self.path.element(index), private: self.private, parent: Some(self) }
    }

    /// Enclosing context, `None` at the root
    pub fn parent(&self) -> Option<&WalkContext<'p>> {
        self.parent
    }

    /// Nesting depth, 0 at the root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent;
        while let Some(ctx) = current {
            depth += 1;
            current = ctx.parent;
        }
        depth
    }
}

/// Hooks invoked by [`SchemaWalker`]
///
/// Scalar nodes reach `leaf` directly. Array nodes reach `enter_array` once
/// and every element is then visited with the same node definition and an
/// element context. Composite nodes and composite elements are bracketed by
/// `enter_structure` and `leave_structure`.
pub trait SchemaVisitor {
    /// Called once per node; `false` skips the node and its whole subtree
    fn enter_node(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<bool> {
        Ok(true)
    }

    /// Called once per array node, returns the number of elements to visit
    fn enter_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<usize>;

    /// Called after the last element of an array
    fn leave_array(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called before the children of a structure; `false` skips them and
    /// `leave_structure` is not called
    fn enter_structure(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<bool> {
        Ok(true)
    }

    /// Called after the children of a structure
    fn leave_structure(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called for every scalar value
    fn leaf(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()>;
}

/// Recursive traversal of a schema in declaration order
#[derive(Debug, Clone, Copy)]
pub struct SchemaWalker<'s> {
    schema: &'s Schema,
}

impl<'s> SchemaWalker<'s> {
    /// Create a walker over `schema`
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Visit every top-level node of the schema
    pub fn walk<V: SchemaVisitor + ?Sized>(&self, visitor: &mut V) -> Result<()> {
        let root = WalkContext::root();
        self.walk_nodes(&self.schema.nodes, &root, visitor)
    }

    fn walk_nodes<V: SchemaVisitor + ?Sized>(
        &self,
        nodes: &'s [SchemaNode],
        parent: &WalkContext<'_>,
        visitor: &mut V,
    ) -> Result<()> {
        for (position, node) in nodes.iter().enumerate() {
            let ctx = parent.child(position, node);
            if !visitor.enter_node(node, &ctx)? {
                continue;
            }

            if node.array.is_some() {
                let count = visitor.enter_array(node, &ctx)?;
                for index in 0..count {
                    let element = ctx.element(index);
                    self.walk_item(node, &element, visitor)?;
                }
                visitor.leave_array(node, &ctx)?;
            } else {
                self.walk_item(node, &ctx, visitor)?;
            }
        }
        Ok(())
    }

    fn walk_item<V: SchemaVisitor + ?Sized>(
        &self,
        node: &'s SchemaNode,
        ctx: &WalkContext<'_>,
        visitor: &mut V,
    ) -> Result<()> {
        match self.schema.children(&node.field_type)? {
            Some(children) => {
                if visitor.enter_structure(node, ctx)? {
                    self.walk_nodes(children, ctx, visitor)?;
                    visitor.leave_structure(node, ctx)?;
                }
                Ok(())
            }
            None => visitor.leaf(node, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    /// Records every hook as a line of text
    #[derive(Default)]
    struct Trace {
        events: Vec<String>,
        skip: Option<&'static str>,
        array_len: usize,
    }

    impl SchemaVisitor for Trace {
        fn enter_node(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
            self.events.push(format!("node {}", ctx.path));
            Ok(self.skip != Some(node.name.as_str()))
        }

        fn enter_array(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<usize> {
            self.events.push(format!("array {}", ctx.path));
            Ok(self.array_len)
        }

        fn leave_array(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
            self.events.push(format!("/array {}", ctx.path));
            Ok(())
        }

        fn enter_structure(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
            self.events.push(format!("struct {}", ctx.path));
            Ok(true)
        }

        fn leave_structure(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
            self.events.push(format!("/struct {}", ctx.path));
            Ok(())
        }

        fn leaf(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
            let flag = if ctx.private { " private" } else { "" };
            self.events.push(format!("leaf {}{}", ctx.path, flag));
            Ok(())
        }
    }

    fn sample_schema() -> Schema {
        let mut schema = Schema::new(vec![]);
        let address = schema.add_structure(
            "address",
            vec![SchemaNode::new("line1", FieldType::String), SchemaNode::new("line2", FieldType::String)],
        );
        schema.nodes = vec![
            SchemaNode::new("name", FieldType::String),
            SchemaNode::new("address", FieldType::Struct(address)).private(),
            SchemaNode::new("tags", FieldType::String).array(),
        ];
        schema
    }

    #[test]
    fn test_walk_order_and_visibility() {
        let schema = sample_schema();
        let mut trace = Trace { array_len: 2, ..Default::default() };
        SchemaWalker::new(&schema).walk(&mut trace).unwrap();

        assert_eq!(
            trace.events,
            vec![
                "node name",
                "leaf name",
                "node address",
                "struct address",
                "node address.line1",
                "leaf address.line1 private",
                "node address.line2",
                "leaf address.line2 private",
                "/struct address",
                "node tags",
                "array tags",
                "leaf tags.0",
                "leaf tags.1",
                "/array tags",
            ]
        );
    }

    #[test]
    fn test_enter_node_false_skips_subtree() {
        let schema = sample_schema();
        let mut trace = Trace { skip: Some("address"), ..Default::default() };
        SchemaWalker::new(&schema).walk(&mut trace).unwrap();

        assert!(trace.events.contains(&"node address".to_string()));
        assert!(!trace.events.iter().any(|e| e.contains("line1")));
        assert!(!trace.events.iter().any(|e| e.starts_with("struct")));
    }

    #[test]
    fn test_field_path() {
        let path = FieldPath::root().child(2, "items").element(3).child(0, "name");
        assert_eq!(path.dotted(), "items.3.name");
        assert_eq!(path.index_path, vec![2, 3, 0]);
        assert_eq!(path.len(), 3);
        assert!(!path.is_element());
        assert!(path.parent().is_element());
        assert_eq!(path.index_bytes(), vec![3, 2, 3, 0]);
    }

    #[test]
    fn test_context_depth() {
        let root = WalkContext::root();
        let node = SchemaNode::new("items", FieldType::String).array();
        let items = root.child(0, &node);
        let element = items.element(1);

        assert_eq!(element.depth(), 2);
        assert_eq!(element.parent().map(|p| p.path.dotted()), Some("items".to_string()));
        assert_eq!(element.path.dotted(), "items.1");
    }
}
