//! Proof decoder
//!
//! Walks the subsection's fields, rebuilds the disclosed record and replays
//! every scope's root from the revealed leaf hashes and the witnesses.

use std::slice::Iter;

use super::{DisclosureMode, LeafDisclosure, ProofObject};
use crate::access::{AccessRouter, DisclosureModifier};
use crate::config::EngineConfig;
use crate::crypto::{verify_hash, Hash, ZERO_HASH};
use crate::error::ProofError;
use crate::merkle::{hidden_hash, leaf_hash, subtree_payload, value_hash, visible_hash, LeafKind, MerkleTree, SALT_LENGTH};
use crate::record::{decode_leaf, MaskedText, Value, ValueBuilder};
use crate::schema::{ArrayShape, Schema, SchemaNode, SchemaVisitor, SchemaWalker, WalkContext};
use crate::stream::ReadStream;
use crate::Result;

fn malformed(reason: impl Into<String>) -> ProofError {
    ProofError::Malformed(reason.into())
}

fn maskable_payload(visible_salt: &[u8; SALT_LENGTH], visible_value_hash: &Hash, hidden_commitment: &Hash) -> Vec<u8> {
    let mut payload = visible_hash(visible_salt, visible_value_hash).to_vec();
    payload.extend_from_slice(hidden_commitment);
    payload
}

struct ScopeFrame {
    position: usize,
    salt: [u8; SALT_LENGTH],
    count: usize,
    next: usize,
    revealed: Vec<(usize, Hash)>,
}

impl ScopeFrame {
    fn new(position: usize, salt: [u8; SALT_LENGTH], count: usize) -> Self {
        ScopeFrame { position, salt, count, next: 0, revealed: Vec::new() }
    }
}

struct ProofDecoder<'a> {
    schema: &'a Schema,
    router: &'a AccessRouter,
    subsection: u32,
    config: &'a EngineConfig,
    modes: Iter<'a, DisclosureMode>,
    data: Iter<'a, LeafDisclosure>,
    proofs: Iter<'a, Vec<Hash>>,
    builder: ValueBuilder,
    scopes: Vec<ScopeFrame>,
}

impl<'a> ProofDecoder<'a> {
    fn take_position(&mut self) -> usize {
        match self.scopes.last_mut() {
            Some(frame) => {
                frame.next += 1;
                frame.next - 1
            }
            None => 0,
        }
    }

    fn reveal(&mut self, position: usize, hash: Hash) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.revealed.push((position, hash));
        }
    }

    fn next_mode(&mut self, ctx: &WalkContext<'_>) -> Result<DisclosureMode> {
        Ok(*self.modes.next().ok_or_else(|| malformed(format!("no mode left for '{}'", ctx.path)))?)
    }

    fn next_data(&mut self, ctx: &WalkContext<'_>, mode: DisclosureMode) -> Result<&'a LeafDisclosure> {
        let data = self.data.next().ok_or_else(|| malformed(format!("no disclosure left for '{}'", ctx.path)))?;
        if data.mode() != mode {
            return Err(malformed(format!("disclosure of '{}' does not match mode {}", ctx.path, mode)).into());
        }
        Ok(data)
    }

    fn open_scope(&mut self, position: usize, data: &LeafDisclosure, ctx: &WalkContext<'_>) -> Result<()> {
        let LeafDisclosure::Subtree { salt, count } = data else {
            return Err(malformed(format!("'{}' is a structure or array", ctx.path)).into());
        };
        if self.scopes.len() > self.config.merkle.max_scope_depth {
            return Err(malformed("scopes nested too deeply").into());
        }
        let count = usize::try_from(*count).map_err(|_| malformed("scope size overflows"))?;
        self.scopes.push(ScopeFrame::new(position, *salt, count));
        Ok(())
    }

    fn scope_root(&mut self, count: usize, revealed: &[(usize, Hash)]) -> Result<Hash> {
        if count == 0 {
            return Ok(ZERO_HASH);
        }
        let witnesses = self.proofs.next().ok_or_else(|| malformed("witness lists exhausted"))?;
        Ok(MerkleTree::replay(count, revealed, witnesses)?)
    }

    fn close_scope(&mut self, ctx: &WalkContext<'_>) -> Result<()> {
        let frame = self.scopes.pop().ok_or_else(|| malformed("unbalanced scopes"))?;
        if frame.next != frame.count {
            return Err(malformed(format!(
                "'{}' commits {} leaves, {} visited",
                ctx.path, frame.count, frame.next
            ))
            .into());
        }

        let root = self.scope_root(frame.count, &frame.revealed)?;
        let payload = subtree_payload(frame.count as u64, &root);
        self.reveal(frame.position, leaf_hash(&frame.salt, &ctx.path, LeafKind::Subtree, &payload));
        Ok(())
    }

    /// Rebuild a scalar leaf from its disclosure
    fn scalar(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>, position: usize, data: &LeafDisclosure) -> Result<()> {
        let route = self.router.route_leaf(node, ctx)?;
        let maskable = matches!(self.router.modifier(&route), DisclosureModifier::Maskable(_));
        let hashable = matches!(self.router.modifier(&route), DisclosureModifier::Hashable);
        let wrong_kind = || malformed(format!("disclosure of '{}' does not match its modifier", ctx.path));

        let (hash, value) = match data {
            LeafDisclosure::Value { salt, bytes } if !maskable => {
                let mut input = ReadStream::new(bytes);
                let value = decode_leaf(self.schema, node, &ctx.path.dotted(), &mut input, &self.config.decode)?;
                input.finish().map_err(|_| malformed(format!("'{}' has trailing value bytes", ctx.path)))?;
                let hash = if hashable {
                    leaf_hash(salt, &ctx.path, LeafKind::Hashable, &value_hash(bytes))
                } else {
                    leaf_hash(salt, &ctx.path, LeafKind::Raw, bytes)
                };
                (hash, value)
            }
            LeafDisclosure::ValueHash { salt, hash } if hashable => {
                (leaf_hash(salt, &ctx.path, LeafKind::Hashable, hash), Value::Hashed(*hash))
            }
            LeafDisclosure::MaskPlain { salt, visible_salt, visible, hidden_salt, hidden } if maskable => {
                let text = MaskedText::from_parts(visible, hidden)?;
                let hidden_commitment = hidden_hash(hidden_salt, hidden);
                let payload = maskable_payload(visible_salt, &value_hash(visible), &hidden_commitment);
                (leaf_hash(salt, &ctx.path, LeafKind::Maskable, &payload), Value::String(text.full_text()))
            }
            LeafDisclosure::Masked { salt, visible_salt, visible, hidden_hash } if maskable => {
                let rendered = MaskedText::render_visible(visible)?;
                let payload = maskable_payload(visible_salt, &value_hash(visible), hidden_hash);
                (leaf_hash(salt, &ctx.path, LeafKind::Maskable, &payload), Value::Masked(rendered))
            }
            LeafDisclosure::MaskedHashed { salt, visible_salt, visible_hash, hidden_hash } if maskable => {
                let payload = maskable_payload(visible_salt, visible_hash, hidden_hash);
                (leaf_hash(salt, &ctx.path, LeafKind::Maskable, &payload), Value::Hashed(*visible_hash))
            }
            _ => return Err(wrong_kind().into()),
        };

        self.reveal(position, hash);
        self.builder.set(&node.name, value);
        Ok(())
    }

    fn finish(mut self) -> Result<(Value, Hash)> {
        let frame = self.scopes.pop().ok_or_else(|| malformed("unbalanced scopes"))?;
        if !self.scopes.is_empty() {
            return Err(malformed("unbalanced scopes").into());
        }
        let root = self.scope_root(frame.next, &frame.revealed)?;

        if self.modes.next().is_some() || self.data.next().is_some() || self.proofs.next().is_some() {
            return Err(malformed("proof carries entries for no field").into());
        }
        Ok((self.builder.finish(), root))
    }
}

impl<'a> SchemaVisitor for ProofDecoder<'a> {
    fn enter_node(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        if !self.router.may_contain(self.schema, node, ctx, self.subsection)? {
            return Ok(false);
        }

        let position = self.take_position();
        let mode = self.next_mode(ctx)?;
        if mode == DisclosureMode::Redacted {
            self.builder.set(&node.name, Value::Redacted);
            return Ok(false);
        }

        let data = self.next_data(ctx, mode)?;
        if let LeafDisclosure::Absent { salt } = data {
            if !node.optional {
                return Err(malformed(format!("required field '{}' disclosed as absent", ctx.path)).into());
            }
            self.reveal(position, leaf_hash(salt, &ctx.path, LeafKind::Absent, &[]));
            return Ok(false);
        }

        if node.array.is_some() || node.is_composite() {
            self.open_scope(position, data, ctx)?;
            return Ok(true);
        }
        self.scalar(node, ctx, position, data)?;
        Ok(false)
    }

    fn enter_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<usize> {
        let count = self.scopes.last().map_or(0, |frame| frame.count);
        if let Some(ArrayShape::Fixed(size)) = node.array {
            if size != count {
                return Err(malformed(format!("'{}' has {} elements, expected {}", ctx.path, count, size)).into());
            }
        }
        if count > self.config.decode.max_array_length {
            return Err(crate::error::FieldError::BadSize {
                path: ctx.path.dotted(),
                expected: self.config.decode.max_array_length,
                actual: count,
            }
            .into());
        }

        self.builder.begin_array();
        Ok(count)
    }

    fn leave_array(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        self.builder.end(&node.name);
        self.close_scope(ctx)
    }

    fn enter_structure(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<bool> {
        if node.array.is_some() && ctx.path.is_element() {
            let position = self.take_position();
            let mode = self.next_mode(ctx)?;
            if mode == DisclosureMode::Redacted {
                self.builder.set(&node.name, Value::Redacted);
                return Ok(false);
            }
            let data = self.next_data(ctx, mode)?;
            self.open_scope(position, data, ctx)?;
        }

        self.builder.begin_object();
        Ok(true)
    }

    fn leave_structure(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        self.builder.end(&node.name);
        self.close_scope(ctx)
    }

    fn leaf(&mut self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Result<()> {
        // only array elements reach this hook, scalar nodes are settled in enter_node
        let position = self.take_position();
        let mode = self.next_mode(ctx)?;
        if mode == DisclosureMode::Redacted {
            self.builder.set(&node.name, Value::Redacted);
            return Ok(());
        }
        let data = self.next_data(ctx, mode)?;
        self.scalar(node, ctx, position, data)
    }
}

/// Rebuild the disclosed fields of `subsection` and the root they commit to
pub fn decode_proof(
    schema: &Schema,
    router: &AccessRouter,
    subsection: u32,
    proof: &ProofObject,
    config: &EngineConfig,
) -> Result<(Value, Hash)> {
    if proof.witness_count() > config.merkle.max_witnesses {
        return Err(malformed(format!("more than {} witness hashes", config.merkle.max_witnesses)).into());
    }

    let mut decoder = ProofDecoder {
        schema,
        router,
        subsection,
        config,
        modes: proof.modes.iter(),
        data: proof.data.iter(),
        proofs: proof.proofs.iter(),
        builder: ValueBuilder::new(),
        scopes: vec![ScopeFrame::new(0, [0u8; SALT_LENGTH], 0)],
    };
    SchemaWalker::new(schema).walk(&mut decoder)?;
    decoder.finish()
}

/// Decode a proof and check it against a committed root
pub fn verify_proof(
    schema: &Schema,
    router: &AccessRouter,
    subsection: u32,
    proof: &ProofObject,
    expected_root: &Hash,
    config: &EngineConfig,
) -> Result<Value> {
    let (value, root) = decode_proof(schema, router, subsection, proof, config)?;
    if !verify_hash(expected_root, &root) {
        return Err(ProofError::RootMismatch.into());
    }
    Ok(value)
}
