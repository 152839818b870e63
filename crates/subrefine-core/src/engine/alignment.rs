use super::error::EngineError;
use super::substructure::Substructure;
use super::tools::ToolError;
use crate::core::io::pdb::AtomRecord;
use crate::core::utils::geometry;
use nalgebra::Point3;

/// New coordinates for every atom of one residue, in atom order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidueUpdate {
    pub residue: usize,
    pub positions: Vec<Point3<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub updates: Vec<ResidueUpdate>,
    /// RMSD of the target residue between its pre- and post-optimization positions.
    pub residual: f64,
}

/// Brings optimized fragment coordinates back into the structure's frame.
///
/// The optimized member atoms are superposed onto their pre-optimization
/// positions using the constrained atoms as anchors. Cap hydrogens trailing
/// the member atoms are ignored.
pub fn reconcile(substructure: &Substructure, optimized: &[AtomRecord]) -> Result<Reconciliation, EngineError> {
    let count = substructure.atom_count();
    if optimized.len() < count {
        return Err(ToolError::MalformedOutput {
            tool: "optimizer".to_string(),
            reason: format!("expected at least {} atoms, found {}", count, optimized.len()),
        }
        .into());
    }
    let moved: Vec<Point3<f64>> = optimized[..count].iter().map(|r| r.position).collect();

    let anchors = substructure.anchor_indices();
    let mobile: Vec<Point3<f64>> = anchors.iter().map(|&i| moved[i]).collect();
    let fixed: Vec<Point3<f64>> = anchors.iter().map(|&i| substructure.reference[i]).collect();
    let transform = geometry::superpose(&mobile, &fixed).ok_or_else(|| {
        EngineError::Internal(format!(
            "cannot superpose substructure of residue index {} on {} anchor atoms",
            substructure.target,
            anchors.len()
        ))
    })?;
    let aligned: Vec<Point3<f64>> = moved.iter().map(|p| transform * p).collect();

    let updates: Vec<ResidueUpdate> = substructure
        .members
        .iter()
        .map(|m| ResidueUpdate {
            residue: m.residue,
            positions: aligned[m.offset..m.offset + m.atom_count()].to_vec(),
        })
        .collect();

    let target = substructure
        .target_member()
        .ok_or_else(|| EngineError::Internal("target missing from its own substructure".to_string()))?;
    let range = target.offset..target.offset + target.atom_count();
    let residual = geometry::calculate_rmsd(&substructure.reference[range.clone()], &aligned[range])
        .ok_or_else(|| EngineError::Internal("target residue has no atoms".to_string()))?;

    Ok(Reconciliation { updates, residual })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::substructure::MemberResidue;
    use nalgebra::{Isometry3, Vector3};
    use std::path::PathBuf;

    fn record(position: Point3<f64>) -> AtomRecord {
        AtomRecord {
            serial: 1,
            name: "CB".to_string(),
            alt_loc: None,
            residue_name: "ALA".to_string(),
            chain_id: 'A',
            residue_number: 1,
            insertion_code: None,
            position,
            occupancy: 1.0,
            temp_factor: 0.0,
            element: "C".to_string(),
        }
    }

    /// Target residue 0 (atoms 0..3, CA at 1) and a fully constrained neighbor 1 (atoms 3..6).
    fn substructure() -> Substructure {
        Substructure {
            target: 0,
            members: vec![
                MemberResidue {
                    residue: 0,
                    offset: 0,
                    constrained: vec![1],
                    free: vec![0, 2],
                },
                MemberResidue {
                    residue: 1,
                    offset: 3,
                    constrained: vec![0, 1, 2],
                    free: vec![],
                },
            ],
            work_dir: PathBuf::from("sub_1"),
            reference: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.5, 0.0, 0.0),
                Point3::new(2.0, 1.4, 0.0),
                Point3::new(5.0, 0.0, 0.0),
                Point3::new(6.0, 1.5, 0.5),
                Point3::new(5.5, -1.0, 2.0),
            ],
            caps: Vec::new(),
        }
    }

    #[test]
    fn rigidly_moved_fragment_is_restored() {
        let sub = substructure();
        let motion = Isometry3::new(Vector3::new(10.0, -4.0, 2.5), Vector3::new(0.2, 0.9, -0.4));
        let mut optimized: Vec<AtomRecord> = sub.reference.iter().map(|p| record(motion * p)).collect();
        optimized.push(record(Point3::new(100.0, 100.0, 100.0)));

        let result = reconcile(&sub, &optimized).unwrap();
        assert!(result.residual < 1e-8);
        assert_eq!(result.updates.len(), 2);
        for update in &result.updates {
            let member = sub.members.iter().find(|m| m.residue == update.residue).unwrap();
            for (i, p) in update.positions.iter().enumerate() {
                assert!((p - sub.reference[member.offset + i]).norm() < 1e-8);
            }
        }
    }

    #[test]
    fn residual_measures_target_motion_only() {
        let sub = substructure();
        let mut positions = sub.reference.clone();
        // Move both free atoms of the target by sqrt(3) Å; anchors stay.
        positions[0] += Vector3::new(1.0, 1.0, 1.0);
        positions[2] += Vector3::new(1.0, 1.0, 1.0);
        let optimized: Vec<AtomRecord> = positions.iter().map(|p| record(*p)).collect();

        let result = reconcile(&sub, &optimized).unwrap();
        // sqrt((3 + 3 + 0) / 3)
        assert!((result.residual - 2.0f64.sqrt()).abs() < 1e-8);
        let neighbor = &result.updates[1];
        for (i, p) in neighbor.positions.iter().enumerate() {
            assert!((p - sub.reference[3 + i]).norm() < 1e-8);
        }
    }

    #[test]
    fn truncated_optimizer_output_is_rejected() {
        let sub = substructure();
        let optimized: Vec<AtomRecord> = sub.reference[..4].iter().map(|p| record(*p)).collect();
        assert!(matches!(
            reconcile(&sub, &optimized),
            Err(EngineError::Tool(ToolError::MalformedOutput { .. }))
        ));
    }
}
