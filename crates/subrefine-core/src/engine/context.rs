use super::config::NeighborhoodConfig;
use super::density::compute_densities;
use crate::core::models::structure::Structure;
use crate::core::spatial::{Granularity, Neighbors, SpatialIndex};
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

static NO_NEIGHBORS: BTreeSet<usize> = BTreeSet::new();

/// For each residue, the residues with at least one atom inside its search
/// sphere: centered on the residue's geometric center, with radius equal to
/// its characteristic radius plus a margin. The residue itself is included
/// whenever one of its own atoms falls inside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborSet {
    sets: Vec<BTreeSet<usize>>,
}

impl NeighborSet {
    pub fn compute(structure: &Structure, index: &SpatialIndex, margin: f64) -> Self {
        let sets = structure
            .residues()
            .par_iter()
            .map(|residue| {
                let Some(center) = residue.geometric_center() else {
                    return BTreeSet::new();
                };
                let radius = residue.residue_type.characteristic_radius() + margin;
                match index.neighbors(&center, radius, Granularity::Residue) {
                    Neighbors::Residues(found) => found,
                    Neighbors::Atoms(atoms) => atoms.into_iter().map(|a| a.residue).collect(),
                }
            })
            .collect();
        Self { sets }
    }

    pub fn from_sets(sets: Vec<BTreeSet<usize>>) -> Self {
        Self { sets }
    }

    pub fn of(&self, residue: usize) -> &BTreeSet<usize> {
        self.sets.get(residue).unwrap_or(&NO_NEIGHBORS)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Everything derived once from the input geometry and shared read-only by
/// all rounds: the spatial index, neighbor sets and densities.
///
/// Later coordinate updates never touch it, so membership and scheduling stay
/// tied to the structure as it was loaded.
pub struct RefinementContext {
    pub index: SpatialIndex,
    pub neighbors: NeighborSet,
    pub densities: Vec<f64>,
}

impl RefinementContext {
    #[instrument(skip_all, name = "refinement_context")]
    pub fn build(structure: &Structure, config: &NeighborhoodConfig) -> Self {
        let index = SpatialIndex::build(structure);
        let neighbors = NeighborSet::compute(structure, &index, config.neighbor_margin);
        let densities = compute_densities(&index, structure);
        debug!(
            residues = structure.len(),
            atoms = index.atom_count(),
            "Built frozen neighborhood context"
        );
        Self {
            index,
            neighbors,
            densities,
        }
    }
}
