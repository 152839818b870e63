//! Carving a target residue's neighborhood out of the structure.
//!
//! A substructure is the target plus nearby residues written as an isolated
//! fragment. Atoms far from the target (and every alpha carbon) are held in
//! place during optimization; peptide bonds cut by the extraction are capped
//! with hydrogens so the fragment stays chemically sensible.

use super::config::{NeighborhoodConfig, OptimizationConfig};
use super::context::RefinementContext;
use super::error::EngineError;
use super::optimizer::{ConstraintSpec, OptimizerEngine};
use super::protonation::{PROTONATED_FILE, Protonator};
use super::tools::ToolError;
use crate::core::io::pdb::{AtomRecord, PdbFile};
use crate::core::models::atom::AtomKind;
use crate::core::models::structure::Structure;
use crate::core::utils::geometry;
use nalgebra::Point3;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FRAGMENT_FILE: &str = "substructure.pdb";

/// A residue included in a substructure.
///
/// `constrained` and `free` hold atom indices within the residue and together
/// cover every atom exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResidue {
    pub residue: usize,
    /// Position of the residue's first atom in the fragment.
    pub offset: usize,
    pub constrained: Vec<usize>,
    pub free: Vec<usize>,
}

impl MemberResidue {
    pub fn atom_count(&self) -> usize {
        self.constrained.len() + self.free.len()
    }
}

#[derive(Debug, Clone)]
pub struct Substructure {
    pub target: usize,
    pub members: Vec<MemberResidue>,
    pub work_dir: PathBuf,
    /// Member atom positions before optimization, in fragment order.
    pub reference: Vec<Point3<f64>>,
    /// Hydrogens kept to cap severed peptide bonds, appended after the member atoms.
    pub caps: Vec<AtomRecord>,
}

impl Substructure {
    /// Number of member atoms, excluding caps.
    pub fn atom_count(&self) -> usize {
        self.reference.len()
    }

    pub fn fragment_path(&self) -> PathBuf {
        self.work_dir.join(FRAGMENT_FILE)
    }

    pub fn target_member(&self) -> Option<&MemberResidue> {
        self.members.iter().find(|m| m.residue == self.target)
    }

    /// 0-based fragment positions of every constrained member atom.
    pub fn anchor_indices(&self) -> Vec<usize> {
        self.members
            .iter()
            .flat_map(|m| m.constrained.iter().map(move |a| m.offset + a))
            .collect()
    }

    /// 1-based indices of constrained member atoms followed by the caps.
    pub fn constrained_atoms(&self) -> Vec<usize> {
        let caps = (0..self.caps.len()).map(|k| self.atom_count() + k);
        self.anchor_indices()
            .into_iter()
            .chain(caps)
            .map(|i| i + 1)
            .collect()
    }

    pub fn constraint_spec(&self, config: &OptimizationConfig) -> ConstraintSpec {
        ConstraintSpec {
            atoms: self.constrained_atoms(),
            force_constant: config.force_constant,
            engine: OptimizerEngine::RationalFunction,
        }
    }

    fn member_indices(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.residue).collect()
    }
}

pub struct SubstructureBuilder<'a> {
    structure: &'a Structure,
    context: &'a RefinementContext,
    config: &'a NeighborhoodConfig,
}

impl<'a> SubstructureBuilder<'a> {
    pub fn new(
        structure: &'a Structure,
        context: &'a RefinementContext,
        config: &'a NeighborhoodConfig,
    ) -> Self {
        Self {
            structure,
            context,
            config,
        }
    }

    /// Neighbors of `target` whose closest atom lies within the member cutoff,
    /// in index order, with each atom classified as constrained or free.
    pub fn select_members(&self, target: usize) -> Vec<MemberResidue> {
        let Some(target_residue) = self.structure.residue(target) else {
            return Vec::new();
        };
        let target_positions = target_residue.positions();
        let mut offset = 0;

        self.context
            .neighbors
            .of(target)
            .iter()
            .filter_map(|&index| {
                let residue = self.structure.residue(index)?;
                let (distances, closest) =
                    geometry::min_distances(&residue.positions(), &target_positions)?;
                if closest >= self.config.member_cutoff {
                    return None;
                }

                let (constrained, free): (Vec<usize>, Vec<usize>) = (0..distances.len())
                    .partition(|&i| {
                        residue.atoms()[i].kind == AtomKind::AlphaCarbon
                            || distances[i] > self.config.constraint_cutoff
                    });
                let member = MemberResidue {
                    residue: index,
                    offset,
                    constrained,
                    free,
                };
                offset += member.atom_count();
                Some(member)
            })
            .collect()
    }

    /// Backbone C and N positions of members whose sequence neighbor exists in
    /// the structure but was left out of the fragment.
    pub fn severed_sites(&self, members: &[MemberResidue]) -> Vec<Point3<f64>> {
        let included: HashSet<usize> = members.iter().map(|m| m.residue).collect();
        let severed = |neighbor: Option<usize>| neighbor.is_some_and(|i| !included.contains(&i));

        members
            .iter()
            .filter(|m| {
                severed(self.structure.sequence_predecessor(m.residue))
                    || severed(self.structure.sequence_successor(m.residue))
            })
            .filter_map(|m| self.structure.residue(m.residue))
            .flat_map(|residue| {
                residue
                    .atoms()
                    .iter()
                    .filter(|atom| atom.kind.is_peptide_bond_end())
                    .map(|atom| atom.position)
            })
            .collect()
    }

    /// Writes the fragment for `target` into `work_dir`.
    ///
    /// Returns `Ok(None)` when the target would not be part of its own
    /// fragment; nothing is written in that case.
    pub fn extract(&self, target: usize, work_dir: &Path) -> Result<Option<Substructure>, EngineError> {
        let members = self.select_members(target);
        if !members.iter().any(|m| m.residue == target) {
            return Ok(None);
        }

        fs::create_dir_all(work_dir).map_err(|e| EngineError::io(work_dir, e))?;
        let indices: Vec<usize> = members.iter().map(|m| m.residue).collect();
        let records = PdbFile::residue_records(self.structure, &indices);
        let substructure = Substructure {
            target,
            reference: records.iter().map(|r| r.position).collect(),
            members,
            work_dir: work_dir.to_path_buf(),
            caps: Vec::new(),
        };
        PdbFile::write_records_to_path(&records, substructure.fragment_path())?;

        debug!(
            target,
            members = substructure.members.len(),
            atoms = substructure.atom_count(),
            "Extracted substructure"
        );
        Ok(Some(substructure))
    }

    /// Protonates the fragment, keeps only the hydrogens that cap severed
    /// bonds, and rewrites the fragment file with them appended.
    pub fn protonate(&self, substructure: &mut Substructure, protonator: &dyn Protonator) -> Result<(), EngineError> {
        let output = substructure.work_dir.join(PROTONATED_FILE);
        protonator.protonate(&substructure.work_dir, &substructure.fragment_path(), &output)?;

        let records = PdbFile::read_records_from_path(&output)?;
        let expected = substructure.atom_count();
        if records.len() < expected {
            return Err(ToolError::MalformedOutput {
                tool: protonator.name().to_string(),
                reason: format!("expected at least {} atoms, found {}", expected, records.len()),
            }
            .into());
        }

        let added: Vec<AtomRecord> = records[expected..]
            .iter()
            .filter(|r| is_hydrogen(r))
            .cloned()
            .collect();
        let sites = self.severed_sites(&substructure.members);
        substructure.caps = select_capping_hydrogens(&added, &sites, self.config.cap_distance);

        let mut fragment = PdbFile::residue_records(self.structure, &substructure.member_indices());
        fragment.extend(substructure.caps.iter().cloned());
        PdbFile::write_records_to_path(&fragment, substructure.fragment_path())?;

        debug!(
            target = substructure.target,
            added = added.len(),
            caps = substructure.caps.len(),
            "Capped severed peptide bonds"
        );
        Ok(())
    }
}

fn is_hydrogen(record: &AtomRecord) -> bool {
    record.element.trim().eq_ignore_ascii_case("H")
        || AtomKind::from_atom_name(&record.name) == AtomKind::Hydrogen
}

/// Hydrogens lying strictly closer than `cap_distance` to any of `sites`.
pub fn select_capping_hydrogens(
    added: &[AtomRecord],
    sites: &[Point3<f64>],
    cap_distance: f64,
) -> Vec<AtomRecord> {
    added
        .iter()
        .filter(|h| sites.iter().any(|site| (h.position - site).norm() < cap_distance))
        .cloned()
        .collect()
}
