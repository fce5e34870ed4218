//! Record decoder visitor

use super::leaf::decode_leaf;
use super::mask::MaskedText;
use super::value::{Value, ValueBuilder};
use crate::access::{AccessRouter, DisclosureModifier};
use crate::config::DecodeConfig;
use crate::error::{CoreError, FieldError, SchemaError, StreamError};
use crate::merkle::{FieldMerkleTree, FieldMerklizer};
use crate::schema::{ArrayShape, FieldType, Schema, SchemaNode, SchemaVisitor, SchemaWalker, WalkContext};
use crate::stream::ReadStream;
use crate::Result;

/// Presence bits read for the optional fields of one structure instance
#[derive(Default)]
struct OptionalMask {
    count: usize,
    bits: u8,
}

impl OptionalMask {
    /// Unused high bits of the last status byte must be clear
    fn check(&self) -> std::result::Result<(), StreamError> {
        let used = self.count % 8;
        if used != 0 && self.bits >> used != 0 {
            return Err(StreamError::NonCanonical("unused optional-field bits set"));
        }
        Ok(())
    }
}

pub(crate) struct RecordDecoder<'a> {
    schema: &'a Schema,
    filter: Option<(&'a AccessRouter, u32)>,
    input: ReadStream<'a>,
    limits: &'a DecodeConfig,
    builder: ValueBuilder,
    masks: Vec<OptionalMask>,
    merklizer: Option<FieldMerklizer>,
}

impl<'a> RecordDecoder<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        filter: Option<(&'a AccessRouter, u32)>,
        bytes: &'a [u8],
        limits: &'a DecodeConfig,
        merklizer: Option<FieldMerklizer>,
    ) -> Self {
        RecordDecoder {
            schema,
            filter,
            input: ReadStream::new(bytes),
            limits,
            builder: ValueBuilder::new(),
            masks: vec![OptionalMask::default()],
            merklizer,
        }
    }

    /// Decode the whole input; truncated or over-long input is an invalid stream
    pub(crate) fn run(mut self) -> Result<(Value, Option<FieldMerkleTree>)> {
        let walked = SchemaWalker::new(self.schema).walk(&mut self).and_then(|_| {
            for mask in &self.masks {
                mask.check()?;
            }
            Ok(())
        });

        let invalid = SchemaError::InvalidStream { consumed: self.input.position(), length: self.input.len() };
        match walked {
            Err(CoreError::Stream(StreamError::Exhausted { .. })) => return Err(invalid.into()),
            Err(err) => return Err(err),
            Ok(()) => {}
        }
        if self.input.finish().is_err() {
            return Err(invalid.into());
        }

        let tree = self.merklizer.map(FieldMerklizer::finish);
        Ok((self.builder.finish(), tree))
    }

    fn read_optional(&mut self) -> Result<bool> {
        let Some(mask) = self.masks.last_mut() else { return Ok(true) };
        let bit = mask.count % 8;
        if bit == 0 {
            mask.bits = self.input.read_byte()?;
        }
        mask.count += 1;
        Ok(mask.bits >> bit & 1 == 1)
    }

    fn modifier(&self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<DisclosureModifier> {
        match self.filter {
            Some((router, _)) => Ok(router.modifier(&router.route_leaf(node, ctx)?).clone()),
            None => Ok(DisclosureModifier::Plain),
        }
    }
}

impl<'a> SchemaVisitor for RecordDecoder<'a> {
    fn enter_node(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        if let Some((router, subsection)) = self.filter {
            if !router.may_contain(self.schema, node, ctx, subsection)? {
                return Ok(false);
            }
        }
        if node.optional && !self.read_optional()? {
            if let Some(merklizer) = self.merklizer.as_mut() {
                merklizer.add_absent(&ctx.path);
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn enter_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<usize> {
        let count = match node.array {
            Some(ArrayShape::Fixed(size)) => size,
            _ => {
                let length = self.input.read_varuint()?;
                usize::try_from(length).map_err(|_| StreamError::Overflow)?
            }
        };
        if count > self.limits.max_array_length {
            return Err(FieldError::BadSize {
                path: ctx.path.dotted(),
                expected: self.limits.max_array_length,
                actual: count,
            }
            .into());
        }

        self.builder.begin_array();
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.open_scope();
        }
        Ok(count)
    }

    fn leave_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        self.builder.end(&node.name);
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.close_scope(&ctx.path);
        }
        Ok(())
    }

    fn enter_structure(&mut self, _node: &SchemaNode, _ctx: &WalkContext<'_>) -> Result<bool> {
        self.masks.push(OptionalMask::default());
        self.builder.begin_object();
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.open_scope();
        }
        Ok(true)
    }

    fn leave_structure(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        if let Some(mask) = self.masks.pop() {
            mask.check()?;
        }
        self.builder.end(&node.name);
        if let Some(merklizer) = self.merklizer.as_mut() {
            merklizer.close_scope(&ctx.path);
        }
        Ok(())
    }

    fn leaf(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        let modifier = self.modifier(node, ctx)?;

        if let (DisclosureModifier::Maskable(_), FieldType::String) = (&modifier, &node.field_type) {
            let masked = MaskedText::read(&mut self.input, self.limits.max_string_length)?;
            if let Some(merklizer) = self.merklizer.as_mut() {
                merklizer.add_maskable(&ctx.path, &masked);
            }
            self.builder.set(&node.name, Value::String(masked.full_text()));
            return Ok(());
        }

        let start = self.input.position();
        let value = decode_leaf(self.schema, node, &ctx.path.dotted(), &mut self.input, self.limits)?;
        if let Some(merklizer) = self.merklizer.as_mut() {
            let bytes = self.input.slice(start, self.input.position()).to_vec();
            match modifier {
                DisclosureModifier::Hashable => merklizer.add_hashable(&ctx.path, bytes),
                _ => merklizer.add_raw(&ctx.path, bytes),
            }
        }
        self.builder.set(&node.name, value);
        Ok(())
    }
}
