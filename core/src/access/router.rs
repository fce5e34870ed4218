//! Access router
//!
//! Resolves the subsection and disclosure modifier of every leaf.
//!
//! ```text
//! public field, no exact rule        -> subsection 0, plain
//! exact rule                         -> priority infinite
//! wildcard rule, strict prefix       -> priority = prefix length (private fields only)
//! private field, no match            -> unassigned
//! ```

use std::collections::BTreeSet;

use log::debug;

use super::rule::{AccessRule, DisclosureModifier};
use crate::error::{AccessError, CoreError, SchemaError};
use crate::record::{CompiledMask, Value, ValueCursor};
use crate::schema::{ArrayShape, FieldPath, FieldType, PathSegment, Schema, SchemaNode, SchemaVisitor, SchemaWalker, WalkContext, Visibility};
use crate::Result;

/// Id of the public subsection
pub const PUBLIC_SUBSECTION: u32 = 0;

static PLAIN: DisclosureModifier = DisclosureModifier::Plain;

/// Routing decision for one leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Public subsection with the plain modifier
    Public,
    /// Matched by the rule at `rule`
    Rule {
        /// Target subsection
        subsection: u32,
        /// Index of the winning rule
        rule: usize,
    },
    /// Private field matched by no rule
    Unassigned,
}

impl Route {
    /// Target subsection, `None` when unassigned
    pub fn subsection(&self) -> Option<u32> {
        match self {
            Route::Public => Some(PUBLIC_SUBSECTION),
            Route::Rule { subsection, .. } => Some(*subsection),
            Route::Unassigned => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: AccessRule,
    mask: Option<CompiledMask>,
}

/// Flattened rule set of one section
#[derive(Debug, Clone, Default)]
pub struct AccessRouter {
    rules: Vec<CompiledRule>,
}

impl AccessRouter {
    /// Compile rules, keeping their declaration order
    pub fn new(rules: Vec<AccessRule>) -> std::result::Result<Self, AccessError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let mask = match &rule.modifier {
                    DisclosureModifier::Maskable(Some(mask)) => Some(mask.compile().map_err(|reason| {
                        AccessError::InvalidRule { path: rule.path.to_string(), reason }
                    })?),
                    _ => None,
                };
                Ok(CompiledRule { rule, mask })
            })
            .collect::<std::result::Result<Vec<_>, AccessError>>()?;
        Ok(AccessRouter { rules })
    }

    /// Rules in declaration order
    pub fn rules(&self) -> impl Iterator<Item = &AccessRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// Check every rule against the schema it routes
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for compiled in &self.rules {
            let rule = &compiled.rule;
            let invalid = |reason: &str| AccessError::InvalidRule { path: rule.path.to_string(), reason: reason.to_string() };
            let target = resolve_rule_path(schema, rule.path.segments()).map_err(|_| invalid("no such field"))?;

            match target {
                RuleTarget::Root => {
                    if !rule.path.is_wildcard() {
                        return Err(invalid("empty path").into());
                    }
                }
                RuleTarget::Node { node, element } => {
                    let composite = node.is_composite();
                    if rule.path.is_wildcard() && !composite {
                        return Err(invalid("wildcard below a scalar field").into());
                    }
                    if !rule.path.is_wildcard() && composite {
                        return Err(invalid("exact rule on a structure, use a wildcard").into());
                    }
                    if !rule.path.is_wildcard() && element {
                        return Err(invalid("scalar array elements route with their array").into());
                    }
                }
            }

            if let DisclosureModifier::Maskable(_) = rule.modifier {
                let is_string = matches!(target, RuleTarget::Node { node, .. } if node.field_type == FieldType::String);
                if rule.path.is_wildcard() || !is_string {
                    return Err(invalid("maskable modifier requires an exact rule on a string field").into());
                }
            }
            if rule.subsection_id == PUBLIC_SUBSECTION && rule.path.is_wildcard() {
                return Err(invalid("wildcard rules cannot target the public subsection").into());
            }
        }
        Ok(())
    }

    /// Route one field path
    pub fn route(&self, path: &FieldPath, private: bool) -> std::result::Result<Route, AccessError> {
        let mut best: Option<(usize, usize)> = None;

        for (index, compiled) in self.rules.iter().enumerate() {
            let rule = &compiled.rule;
            let priority = if rule.path.matches_exactly(path) {
                if !private && rule.subsection_id != PUBLIC_SUBSECTION {
                    return Err(AccessError::PublicToPrivate { path: path.dotted(), subsection: rule.subsection_id });
                }
                usize::MAX
            } else if private {
                match rule.path.wildcard_priority(path) {
                    Some(priority) => priority,
                    None => continue,
                }
            } else {
                continue;
            };

            if best.map_or(true, |(best_priority, _)| priority > best_priority) {
                best = Some((priority, index));
            }
        }

        match best {
            Some((_, index)) => {
                let subsection = self.rules[index].rule.subsection_id;
                if private && subsection == PUBLIC_SUBSECTION {
                    return Err(AccessError::InvalidRule {
                        path: self.rules[index].rule.path.to_string(),
                        reason: format!("private field '{}' routed to the public subsection", path),
                    });
                }
                Ok(Route::Rule { subsection, rule: index })
            }
            None if private => Ok(Route::Unassigned),
            None => Ok(Route::Public),
        }
    }

    /// Route a scalar leaf; elements of scalar arrays route as their array
    pub fn route_leaf(&self, node: &SchemaNode, ctx: &WalkContext<'_>) -> std::result::Result<Route, AccessError> {
        if node.array.is_some() && ctx.path.is_element() {
            self.route(&ctx.path.parent(), ctx.private)
        } else {
            self.route(&ctx.path, ctx.private)
        }
    }

    /// Modifier attached to a route
    pub fn modifier(&self, route: &Route) -> &DisclosureModifier {
        match route {
            Route::Rule { rule, .. } => &self.rules[*rule].rule.modifier,
            _ => &PLAIN,
        }
    }

    /// Compiled mask rule attached to a route
    pub fn mask(&self, route: &Route) -> Option<&CompiledMask> {
        match route {
            Route::Rule { rule, .. } => self.rules[*rule].mask.as_ref(),
            _ => None,
        }
    }

    /// Whether `node` may hold fields of `subsection`
    ///
    /// The answer depends on the schema and the rules only, never on record
    /// data, so encoder and decoder include exactly the same nodes. It may be
    /// `true` for a container that turns out to hold nothing of the
    /// subsection.
    pub fn may_contain(&self, schema: &Schema, node: &SchemaNode, ctx: &WalkContext<'_>, subsection: u32) -> Result<bool> {
        if !node.is_composite() {
            return Ok(self.route(&ctx.path, ctx.private)?.subsection() == Some(subsection));
        }
        if subsection == PUBLIC_SUBSECTION {
            return Ok(!ctx.private && has_leaf(schema, node, false)?);
        }
        if !ctx.private && !has_leaf(schema, node, true)? {
            return Ok(false);
        }
        Ok(self
            .rules
            .iter()
            .any(|r| r.rule.subsection_id == subsection && r.rule.path.may_reach_below(&ctx.path)))
    }

    /// Subsections used by a record, failing on unassigned private fields
    pub fn assign(&self, schema: &Schema, record: &Value) -> Result<BTreeSet<u32>> {
        let mut mapper = AccessMapper { router: self, values: ValueCursor::new(record), used: BTreeSet::new() };
        SchemaWalker::new(schema).walk(&mut mapper)?;
        debug!("record routes to subsections {:?}", mapper.used);
        Ok(mapper.used)
    }
}

/// Whether a composite node has a leaf of the requested visibility
///
/// With `private` false, only leaves with no private ancestor below `node`
/// count.
fn has_leaf(schema: &Schema, node: &SchemaNode, private: bool) -> std::result::Result<bool, SchemaError> {
    let children = match schema.children(&node.field_type)? {
        Some(children) => children,
        None => return Ok(true),
    };
    for child in children {
        let child_private = child.visibility == Visibility::Private;
        if private && child_private {
            return Ok(true);
        }
        if !private && child_private {
            continue;
        }
        if has_leaf(schema, child, private)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Clone, Copy)]
enum RuleTarget<'s> {
    Root,
    Node { node: &'s SchemaNode, element: bool },
}

fn resolve_rule_path<'s>(schema: &'s Schema, segments: &[PathSegment]) -> std::result::Result<RuleTarget<'s>, ()> {
    let mut level: &'s [SchemaNode] = &schema.nodes;
    let mut target = RuleTarget::Root;

    for segment in segments {
        target = match (segment, target) {
            (PathSegment::Name(name), RuleTarget::Root) => {
                RuleTarget::Node { node: level.iter().find(|n| &n.name == name).ok_or(())?, element: false }
            }
            (PathSegment::Name(name), RuleTarget::Node { node, element }) => {
                if node.array.is_some() && !element {
                    return Err(());
                }
                level = schema.children(&node.field_type).map_err(|_| ())?.ok_or(())?;
                RuleTarget::Node { node: level.iter().find(|n| &n.name == name).ok_or(())?, element: false }
            }
            (PathSegment::Index(index), RuleTarget::Node { node, element: false }) => match &node.array {
                Some(ArrayShape::Fixed(n)) if *index >= *n => return Err(()),
                Some(_) => RuleTarget::Node { node, element: true },
                None => return Err(()),
            },
            _ => return Err(()),
        };
    }
    Ok(target)
}

/// First walk of a section encode: finds the subsections a record uses
struct AccessMapper<'r, 'v> {
    router: &'r AccessRouter,
    values: ValueCursor<'v>,
    used: BTreeSet<u32>,
}

impl<'r, 'v> SchemaVisitor for AccessMapper<'r, 'v> {
    fn enter_node(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        match self.values.lookup(node, ctx) {
            Some(_) => Ok(true),
            None if node.optional => Ok(false),
            None => Err(SchemaError::UndefinedField(ctx.path.dotted()).into()),
        }
    }

    fn enter_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<usize> {
        let value = self.values.lookup(node, ctx).ok_or_else(|| SchemaError::UndefinedField(ctx.path.dotted()))?;
        let items = value.as_array().ok_or_else(|| CoreError::from(crate::error::FieldError::WrongType {
            path: ctx.path.dotted(),
            expected: "array",
        }))?;
        self.values.push(value);
        Ok(items.len())
    }

    fn leave_array(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<()> {
        self.values.pop();
        Ok(())
    }

    fn enter_structure(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        let value = self.values.lookup(node, ctx).ok_or_else(|| SchemaError::UndefinedField(ctx.path.dotted()))?;
        self.values.push(value);
        Ok(true)
    }

    fn leave_structure(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<()> {
        self.values.pop();
        Ok(())
    }

    fn leaf(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        match self.router.route_leaf(node, ctx)?.subsection() {
            Some(subsection) => {
                self.used.insert(subsection);
                Ok(())
            }
            None => {
                let path = if node.array.is_some() && ctx.path.is_element() { ctx.path.parent() } else { ctx.path.clone() };
                Err(AccessError::Unassigned(path.dotted()).into())
            }
        }
    }
}
