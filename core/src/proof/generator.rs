//! Proof generator

use std::collections::{BTreeSet, HashMap};

use log::trace;

use super::{DisclosureMode, LeafDisclosure, LeafRef, ProofObject};
use crate::error::ProofError;
use crate::merkle::{hidden_hash, value_hash, FieldMerkleTree, LeafContent, LeafKind, MerkleLeaf, MerkleScope};
use crate::Result;

struct Decision {
    mode: DisclosureMode,
    children: Vec<Decision>,
}

fn supports(kind: LeafKind, mode: DisclosureMode) -> bool {
    use DisclosureMode::*;
    match kind {
        LeafKind::Absent | LeafKind::Raw | LeafKind::Subtree => matches!(mode, Plain | Redacted),
        LeafKind::Hashable => matches!(mode, Plain | Hashed | Redacted),
        LeafKind::Maskable => matches!(mode, Plain | Masked | MaskedHashed | Redacted),
    }
}

fn unsupported(leaf: &MerkleLeaf, mode: DisclosureMode) -> ProofError {
    ProofError::UnsupportedMode { path: leaf.path.dotted(), mode: mode.to_string() }
}

struct Planner<'p, F> {
    policy: &'p mut F,
    memo: HashMap<String, DisclosureMode>,
}

impl<'p, F> Planner<'p, F>
where
    F: FnMut(&LeafRef<'_>) -> DisclosureMode,
{
    fn ask(&mut self, leaf: &MerkleLeaf) -> Result<DisclosureMode> {
        let kind = leaf.content.kind();
        let policy = &mut *self.policy;
        let mode = *self
            .memo
            .entry(leaf.path.dotted())
            .or_insert_with(|| policy(&LeafRef { path: &leaf.path, kind }));

        if !supports(kind, mode) {
            return Err(unsupported(leaf, mode).into());
        }
        Ok(mode)
    }

    fn plan(&mut self, scope: &MerkleScope) -> Result<Vec<Decision>> {
        scope
            .leaves
            .iter()
            .map(|leaf| match &leaf.content {
                // a non-empty subtree is revealed iff one of its leaves is
                LeafContent::Subtree(inner) if !inner.is_empty() => {
                    let children = self.plan(inner)?;
                    let revealed = children.iter().any(|c| c.mode != DisclosureMode::Redacted);
                    let mode = if revealed { DisclosureMode::Plain } else { DisclosureMode::Redacted };
                    Ok(Decision { mode, children })
                }
                _ => Ok(Decision { mode: self.ask(leaf)?, children: Vec::new() }),
            })
            .collect()
    }
}

fn disclose(leaf: &MerkleLeaf, mode: DisclosureMode) -> Result<LeafDisclosure> {
    let salt = leaf.salt.leaf;
    let disclosure = match (&leaf.content, mode) {
        (LeafContent::Absent, DisclosureMode::Plain) => LeafDisclosure::Absent { salt },
        (LeafContent::Raw(bytes) | LeafContent::Hashable(bytes), DisclosureMode::Plain) => {
            LeafDisclosure::Value { salt, bytes: bytes.clone() }
        }
        (LeafContent::Hashable(bytes), DisclosureMode::Hashed) => {
            LeafDisclosure::ValueHash { salt, hash: value_hash(bytes) }
        }
        (LeafContent::Maskable { visible, hidden }, DisclosureMode::Plain) => LeafDisclosure::MaskPlain {
            salt,
            visible_salt: leaf.salt.visible,
            visible: visible.clone(),
            hidden_salt: leaf.salt.hidden,
            hidden: hidden.clone(),
        },
        (LeafContent::Maskable { visible, hidden }, DisclosureMode::Masked) => LeafDisclosure::Masked {
            salt,
            visible_salt: leaf.salt.visible,
            visible: visible.clone(),
            hidden_hash: hidden_hash(&leaf.salt.hidden, hidden),
        },
        (LeafContent::Maskable { visible, hidden }, DisclosureMode::MaskedHashed) => LeafDisclosure::MaskedHashed {
            salt,
            visible_salt: leaf.salt.visible,
            visible_hash: value_hash(visible),
            hidden_hash: hidden_hash(&leaf.salt.hidden, hidden),
        },
        (LeafContent::Subtree(scope), DisclosureMode::Plain) => LeafDisclosure::Subtree { salt, count: scope.len() as u64 },
        _ => return Err(unsupported(leaf, mode).into()),
    };
    Ok(disclosure)
}

fn emit(scope: &MerkleScope, decisions: &[Decision], proof: &mut ProofObject) -> Result<()> {
    let mut revealed = BTreeSet::new();
    for (position, (leaf, decision)) in scope.leaves.iter().zip(decisions).enumerate() {
        proof.modes.push(decision.mode);
        if decision.mode == DisclosureMode::Redacted {
            continue;
        }

        revealed.insert(position);
        proof.data.push(disclose(leaf, decision.mode)?);
        if let LeafContent::Subtree(inner) = &leaf.content {
            emit(inner, &decision.children, proof)?;
        }
    }

    if let Some(tree) = &scope.tree {
        let witnesses = tree.witnesses(&revealed)?;
        trace!("scope of {} leaves: {} revealed, {} witnesses", scope.len(), revealed.len(), witnesses.len());
        proof.proofs.push(witnesses);
    }
    Ok(())
}

/// Build a proof of `tree` revealing what `policy` allows
///
/// The policy is asked once per field path. Subtree leaves are decided by
/// their contents; only empty structures and arrays are put to the policy.
pub fn generate_proof<F>(tree: &FieldMerkleTree, mut policy: F) -> Result<ProofObject>
where
    F: FnMut(&LeafRef<'_>) -> DisclosureMode,
{
    let mut planner = Planner { policy: &mut policy, memo: HashMap::new() };
    let decisions = planner.plan(&tree.root)?;

    let mut proof = ProofObject::default();
    emit(&tree.root, &decisions, &mut proof)?;
    Ok(proof)
}
