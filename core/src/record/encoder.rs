//! Record encoder visitor

use super::leaf::encode_leaf;
use super::mask::MaskedText;
use super::value::{Value, ValueCursor};
use super::EncodeOptions;
use crate::access::{AccessRouter, DisclosureModifier};
use crate::error::{FieldError, SchemaError};
use crate::merkle::{FieldMerkleTree, FieldMerklizer};
use crate::schema::{ArrayShape, FieldType, Schema, SchemaNode, SchemaVisitor, SchemaWalker, WalkContext};
use crate::stream::WriteStream;
use crate::Result;

/// Presence bits of the optional fields of one structure instance
#[derive(Default)]
struct OptionalMask {
    count: usize,
    slot: usize,
    bits: u8,
}

pub(crate) struct RecordEncoder<'a> {
    schema: &'a Schema,
    filter: Option<(&'a AccessRouter, u32)>,
    options: &'a EncodeOptions,
    values: ValueCursor<'a>,
    out: WriteStream,
    masks: Vec<OptionalMask>,
    merklizer: Option<FieldMerklizer>,
}

impl<'a> RecordEncoder<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        filter: Option<(&'a AccessRouter, u32)>,
        options: &'a EncodeOptions,
        value: &'a Value,
        merklizer: Option<FieldMerklizer>,
    ) -> Self {
        RecordEncoder {
            schema,
            filter,
            options,
            values: ValueCursor::new(value),
            out: WriteStream::new(),
            masks: vec![OptionalMask::default()],
            merklizer,
        }
    }

    pub(crate) fn run(mut self) -> Result<(Vec<u8>, Option<FieldMerkleTree>)> {
        SchemaWalker::new(self.schema).walk(&mut self)?;
        let tree = self.merklizer.map(FieldMerklizer::finish);
        Ok((self.out.into_bytes(), tree))
    }

    fn mark_optional(&mut self, present: bool) {
        let Some(mask) = self.masks.last_mut() else { return };
        let bit = mask.count % 8;
        if bit == 0 {
            mask.slot = self.out.reserve_byte();
            mask.bits = 0;
        }
        if present {
            mask.bits |= 1 << bit;
        }
        self.out.patch_byte(mask.slot, mask.bits);
        mask.count += 1;
    }

    fn lookup(&self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<&'a Value> {
        self.values
            .lookup(node, ctx)
            .ok_or_else(|| SchemaError::UndefinedField(ctx.path.dotted()).into())
    }

    fn modifier(&self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<(DisclosureModifier, Option<MaskedTextSource<'a>>)> {
        let Some((router, _)) = self.filter else {
            return Ok((DisclosureModifier::Plain, None));
        };
        let route = router.route_leaf(node, ctx)?;
        let modifier = router.modifier(&route).clone();
        let source = match &modifier {
            DisclosureModifier::Maskable(_) => {
                let dotted = ctx.path.dotted();
                match self.options.masks.get(&dotted) {
                    Some(intervals) => Some(MaskedTextSource::Intervals(intervals)),
                    None => router.mask(&route).map(MaskedTextSource::Rule),
                }
            }
            _ => None,
        };
        Ok((modifier, source))
    }
}

enum MaskedTextSource<'a> {
    Intervals(&'a [super::mask::MaskInterval]),
    Rule(&'a super::mask::CompiledMask),
}

impl<'a> SchemaVisitor for RecordEncoder<'a> {
    fn enter_node(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        if let Some((router, subsection)) = self.filter {
            if !router.may_contain(self.schema, node, ctx, subsection)? {
                return Ok(false);
            }
        }

        let present = self.values.lookup(node, ctx).is_some();
        if node.optional {
            self.mark_optional(present);
        }
        if !present {
            if !node.optional {
                return Err(SchemaError::UndefinedField(ctx.path.dotted()).into());
            }
            if let Some(merklizer) = self.merklizer.as_mut() {
                merklizer.add_absent(&ctx.path);
            }
        }
        Ok(present)
    }

    fn enter_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<usize> {
        let value = self.lookup(node, ctx)?;
        let items = value
            .as_array()
            .ok_or_else(|| FieldError::WrongType { path: ctx.path.dotted(), expected: "array" })?;

        match node.array {
            Some(ArrayShape::Fixed(size)) if size != items.len() => {
                return Err(FieldError::BadSize { path: ctx.path.dotted(), expected: size, actual: items.len() }.into());
            }
            Some(ArrayShape::Fixed(_)) => {}
            _ => self.out.write_varuint(items.len() as u64),
        }

        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.open_scope();
        }
        self.values.push(value);
        Ok(items.len())
    }

    fn leave_array(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        self.values.pop();
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.close_scope(&ctx.path);
        }
        Ok(())
    }

    fn enter_structure(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        let value = self.lookup(node, ctx)?;
        if !matches!(value, Value::Object(_)) {
            return Err(FieldError::WrongType { path: ctx.path.dotted(), expected: "object" }.into());
        }

        self.masks.push(OptionalMask::default());
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.open_scope();
        }
        self.values.push(value);
        Ok(true)
    }

    fn leave_structure(&mut self, _node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        self.values.pop();
        self.masks.pop();
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.close_scope(&ctx.path);
        }
        Ok(())
    }

    fn leaf(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        let value = self.lookup(node, ctx)?;
        let dotted = ctx.path.dotted();
        let (modifier, source) = self.modifier(node, ctx)?;

        if let (DisclosureModifier::Maskable(_), FieldType::String) = (&modifier, &node.field_type) {
            let text = value.as_str().ok_or_else(|| FieldError::WrongType { path: dotted.clone(), expected: "string" })?;
            let masked = match source {
                Some(MaskedTextSource::Intervals(intervals)) => MaskedText::from_intervals(text, intervals, &dotted)?,
                Some(MaskedTextSource::Rule(rule)) => MaskedText::from_rule(text, rule, &dotted)?,
                None => MaskedText::plain(text),
            };
            masked.write(&mut self.out);
            if let Some(merklizer) = self.merklizer.as_mut() {
                merklizer.add_maskable(&ctx.path, &masked);
            }
            return Ok(());
        }

        let start = self.out.position();
        encode_leaf(self.schema, node, &dotted, value, &mut self.out)?;
        if let Some(merklizer) = self.merklizer.as_mut() {
            let bytes = self.out.as_bytes()[start..].to_vec();
            match modifier {
                DisclosureModifier::Hashable => merklizer.add_hashable(&ctx.path, bytes),
                _ => merklizer.add_raw(&ctx.path, bytes),
            }
        }
        Ok(())
    }
}
