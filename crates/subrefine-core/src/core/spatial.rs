//! Spatial neighbor queries over the atoms of a [`Structure`].
//!
//! The index is a k-d tree over every atom position, built once from the
//! geometry it is given and never mutated afterwards, so it can be shared by
//! reference across worker threads.

use crate::core::models::structure::Structure;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point3;
use std::collections::BTreeSet;

/// Locates an atom inside the indexed structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomRef {
    pub residue: usize,
    pub atom: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Atom,
    Residue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Neighbors {
    Atoms(BTreeSet<AtomRef>),
    Residues(BTreeSet<usize>),
}

impl Neighbors {
    pub fn len(&self) -> usize {
        match self {
            Neighbors::Atoms(atoms) => atoms.len(),
            Neighbors::Residues(residues) => residues.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SpatialIndex {
    tree: KdTree<f64, 3>,
    atoms: Vec<AtomRef>,
    residue_atoms: Vec<Vec<[f64; 3]>>,
}

impl SpatialIndex {
    pub fn build(structure: &Structure) -> Self {
        let mut positions: Vec<[f64; 3]> = Vec::with_capacity(structure.atom_count());
        let mut atoms = Vec::with_capacity(structure.atom_count());
        let mut residue_atoms = Vec::with_capacity(structure.len());

        for (residue_idx, residue) in structure.residues().iter().enumerate() {
            let mut coords = Vec::with_capacity(residue.atoms().len());
            for (atom_idx, atom) in residue.atoms().iter().enumerate() {
                let p = [atom.position.x, atom.position.y, atom.position.z];
                positions.push(p);
                coords.push(p);
                atoms.push(AtomRef {
                    residue: residue_idx,
                    atom: atom_idx,
                });
            }
            residue_atoms.push(coords);
        }

        // Items are positions in `atoms`.
        let tree: KdTree<f64, 3> = (&positions).into();
        Self {
            tree,
            atoms,
            residue_atoms,
        }
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    /// All atoms within `radius` (inclusive) of `point`.
    pub fn atoms_within(&self, point: &Point3<f64>, radius: f64) -> BTreeSet<AtomRef> {
        if radius < 0.0 || self.atoms.is_empty() {
            return BTreeSet::new();
        }
        let radius_sq = radius * radius;
        self.tree
            .within_unsorted::<SquaredEuclidean>(&[point.x, point.y, point.z], radius_sq + 1e-9)
            .into_iter()
            .filter(|hit| hit.distance <= radius_sq)
            .filter_map(|hit| self.atoms.get(hit.item as usize).copied())
            .collect()
    }

    /// Residues owning at least one atom within `radius` of `point`.
    pub fn residues_within(&self, point: &Point3<f64>, radius: f64) -> BTreeSet<usize> {
        self.atoms_within(point, radius)
            .into_iter()
            .map(|atom| atom.residue)
            .collect()
    }

    pub fn neighbors(&self, point: &Point3<f64>, radius: f64, granularity: Granularity) -> Neighbors {
        match granularity {
            Granularity::Atom => Neighbors::Atoms(self.atoms_within(point, radius)),
            Granularity::Residue => Neighbors::Residues(self.residues_within(point, radius)),
        }
    }

    /// Residues whose closest atom pair with `residue` is within `radius`.
    ///
    /// The distance is the minimum over all atom pairs of the two residues, so
    /// a long side chain reaching towards `residue` counts even when the two
    /// centers are far apart. The queried residue itself is included.
    pub fn residues_near(&self, residue: usize, radius: f64) -> BTreeSet<usize> {
        let Some(coords) = self.residue_atoms.get(residue) else {
            return BTreeSet::new();
        };
        coords
            .iter()
            .flat_map(|p| self.residues_within(&Point3::new(p[0], p[1], p[2]), radius))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::residue::{Residue, ResidueType};

    fn structure_from(residue_atoms: &[&[[f64; 3]]]) -> Structure {
        let mut structure = Structure::new('A');
        let mut serial = 1;
        for (i, atoms) in residue_atoms.iter().enumerate() {
            let mut residue = Residue::new(i as isize + 1, "GLY", ResidueType::Glycine);
            for p in atoms.iter() {
                residue.add_atom(Atom::new(serial, "CA", Point3::new(p[0], p[1], p[2])));
                serial += 1;
            }
            structure.push_residue(residue).unwrap();
        }
        structure
    }

    #[test]
    fn atoms_within_includes_boundary_and_excludes_beyond() {
        let structure = structure_from(&[&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]], &[[5.0, 0.0, 0.0]]]);
        let index = SpatialIndex::build(&structure);
        let hits = index.atoms_within(&Point3::origin(), 2.0);
        assert_eq!(
            hits,
            BTreeSet::from([
                AtomRef { residue: 0, atom: 0 },
                AtomRef { residue: 0, atom: 1 }
            ])
        );
        assert_eq!(index.atoms_within(&Point3::origin(), 10.0).len(), 3);
    }

    #[test]
    fn neighbors_reports_requested_granularity() {
        let structure = structure_from(&[&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], &[[3.0, 0.0, 0.0]]]);
        let index = SpatialIndex::build(&structure);
        let atoms = index.neighbors(&Point3::origin(), 3.5, Granularity::Atom);
        let residues = index.neighbors(&Point3::origin(), 3.5, Granularity::Residue);
        assert_eq!(atoms.len(), 3);
        assert_eq!(residues, Neighbors::Residues(BTreeSet::from([0, 1])));
    }

    #[test]
    fn negative_radius_finds_nothing() {
        let structure = structure_from(&[&[[0.0, 0.0, 0.0]]]);
        let index = SpatialIndex::build(&structure);
        assert!(index.neighbors(&Point3::origin(), -1.0, Granularity::Residue).is_empty());
    }

    #[test]
    fn residues_near_uses_closest_atom_pair_not_centers() {
        // Residue 1 has its center far away but one atom reaching to x = 4.
        let structure = structure_from(&[
            &[[0.0, 0.0, 0.0]],
            &[[4.0, 0.0, 0.0], [20.0, 0.0, 0.0]],
            &[[12.0, 0.0, 0.0]],
        ]);
        let index = SpatialIndex::build(&structure);
        assert_eq!(index.residues_near(0, 4.5), BTreeSet::from([0, 1]));
        assert_eq!(index.residues_near(0, 3.0), BTreeSet::from([0]));
        assert_eq!(index.residues_near(2, 8.0), BTreeSet::from([1, 2]));
    }

    #[test]
    fn unknown_residue_has_no_neighbors() {
        let structure = structure_from(&[&[[0.0, 0.0, 0.0]]]);
        let index = SpatialIndex::build(&structure);
        assert!(index.residues_near(7, 100.0).is_empty());
    }

    #[test]
    fn empty_structure_builds_an_empty_index() {
        let index = SpatialIndex::build(&Structure::new('A'));
        assert_eq!(index.atom_count(), 0);
        assert!(index.atoms_within(&Point3::origin(), 5.0).is_empty());
    }
}
