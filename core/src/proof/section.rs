//! Proofs spanning the subsections of one section

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use super::decoder::verify_proof;
use super::generator::generate_proof;
use super::{DisclosureMode, LeafRef, ProofObject};
use crate::config::EngineConfig;
use crate::error::{ProofError, SectionError};
use crate::merkle::FieldMerkleTree;
use crate::record::Value;
use crate::section::{merge_values, Section, SectionDefinition};
use crate::Result;

/// Proof of one subsection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionProof {
    /// Subsection id
    pub subsection_id: u32,
    /// Disclosures and witnesses
    pub proof: ProofObject,
}

/// Proofs for the provable subsections of a section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionProof {
    /// Section id
    pub section_id: u32,
    /// One proof per subsection, by ascending id
    pub subsections: Vec<SubsectionProof>,
}

impl SectionProof {
    /// Prove every tree of `trees` under `policy`
    ///
    /// The policy receives the subsection id with each leaf.
    pub fn generate<F>(section_id: u32, trees: &BTreeMap<u32, FieldMerkleTree>, mut policy: F) -> Result<Self>
    where
        F: FnMut(u32, &LeafRef<'_>) -> DisclosureMode,
    {
        let subsections = trees
            .iter()
            .map(|(id, tree)| -> Result<SubsectionProof> {
                let proof = generate_proof(tree, |leaf| policy(*id, leaf))?;
                Ok(SubsectionProof { subsection_id: *id, proof })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SectionProof { section_id, subsections })
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

/// Check `proof` against the roots committed in `section`
///
/// Returns the disclosed record; withheld fields are [`Value::Redacted`].
pub fn verify_section_proof(
    definition: &SectionDefinition,
    section: &Section,
    proof: &SectionProof,
    config: &EngineConfig,
) -> Result<Value> {
    if proof.section_id != section.id || section.id != definition.id {
        return Err(ProofError::Malformed(format!(
            "proof of section {} checked against section {}",
            proof.section_id, section.id
        ))
        .into());
    }

    let mut record = Value::object();
    let mut seen = BTreeSet::new();
    for part in &proof.subsections {
        let id = part.subsection_id;
        if !seen.insert(id) {
            return Err(ProofError::Malformed(format!("subsection {} proven twice", id)).into());
        }

        let wire = section.subsection(id).ok_or(SectionError::UnknownSubsection(id))?;
        let root = wire.merkle_root.ok_or(SectionError::MissingMerkleRoot(id))?;
        let value = verify_proof(&definition.schema, definition.router(), id, &part.proof, &root, config)?;
        debug!("subsection {} proof verified ({} witnesses)", id, part.proof.witness_count());

        merge_values(&mut record, value, "")?;
    }
    Ok(record)
}
