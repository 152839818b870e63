//! Weighted local atom density, the priority used to order refinement.

use crate::core::models::structure::Structure;
use crate::core::spatial::SpatialIndex;
use rayon::prelude::*;
use std::f64::consts::PI;

/// One concentric shell around a residue center.
///
/// Atoms are counted within `radius + count_offset`, divided by the volume of
/// a sphere of radius `radius + volume_offset`, and scaled by `weight`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityShell {
    pub count_offset: f64,
    pub volume_offset: f64,
    pub weight: f64,
}

pub const DENSITY_SHELLS: [DensityShell; 3] = [
    DensityShell {
        count_offset: 2.0,
        volume_offset: 3.0,
        weight: 1.0,
    },
    DensityShell {
        count_offset: 5.0,
        volume_offset: 10.0,
        weight: 0.1,
    },
    DensityShell {
        count_offset: 10.0,
        volume_offset: 15.0,
        weight: 0.05,
    },
];

fn sphere_volume(radius: f64) -> f64 {
    4.0 / 3.0 * PI * radius.powi(3)
}

/// Density of a single residue given its characteristic radius.
pub fn residue_density(index: &SpatialIndex, structure: &Structure, residue: usize) -> f64 {
    let Some(res) = structure.residue(residue) else {
        return 0.0;
    };
    let Some(center) = res.geometric_center() else {
        return 0.0;
    };
    let radius = res.residue_type.characteristic_radius();

    DENSITY_SHELLS
        .iter()
        .map(|shell| {
            let count = index.atoms_within(&center, radius + shell.count_offset).len() as f64;
            shell.weight * count / sphere_volume(radius + shell.volume_offset)
        })
        .sum()
}

/// Densities of every residue, indexed like `structure.residues()`.
pub fn compute_densities(index: &SpatialIndex, structure: &Structure) -> Vec<f64> {
    (0..structure.len())
        .into_par_iter()
        .map(|residue| residue_density(index, structure, residue))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::residue::{Residue, ResidueType};
    use nalgebra::Point3;

    fn glycine(number: isize, position: Point3<f64>) -> Residue {
        let mut residue = Residue::new(number, "GLY", ResidueType::Glycine);
        residue.add_atom(Atom::new(number as usize, "CA", position));
        residue
    }

    #[test]
    fn isolated_residue_counts_only_itself() {
        let mut structure = Structure::new('A');
        structure.push_residue(glycine(1, Point3::origin())).unwrap();
        let index = SpatialIndex::build(&structure);

        let radius = ResidueType::Glycine.characteristic_radius();
        let expected = 1.0 / sphere_volume(radius + 3.0)
            + 0.1 / sphere_volume(radius + 10.0)
            + 0.05 / sphere_volume(radius + 15.0);
        let density = residue_density(&index, &structure, 0);
        assert!((density - expected).abs() < 1e-12);
    }

    #[test]
    fn crowded_residue_is_denser() {
        let mut structure = Structure::new('A');
        structure.push_residue(glycine(1, Point3::origin())).unwrap();
        structure.push_residue(glycine(2, Point3::new(1.5, 0.0, 0.0))).unwrap();
        structure.push_residue(glycine(3, Point3::new(0.0, 1.5, 0.0))).unwrap();
        structure.push_residue(glycine(4, Point3::new(40.0, 0.0, 0.0))).unwrap();
        let index = SpatialIndex::build(&structure);

        let densities = compute_densities(&index, &structure);
        assert_eq!(densities.len(), 4);
        assert!(densities[0] > densities[3]);
        assert!(densities.iter().all(|d| *d > 0.0));
    }

    #[test]
    fn unknown_residue_has_zero_density() {
        let structure = Structure::new('A');
        let index = SpatialIndex::build(&structure);
        assert_eq!(residue_density(&index, &structure, 3), 0.0);
    }
}
