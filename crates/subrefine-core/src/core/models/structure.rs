use super::residue::Residue;
use nalgebra::Point3;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("Residue {0} occurs more than once in the chain")]
    DuplicateResidue(String),
    #[error("Residue index {0} is out of range")]
    ResidueOutOfRange(usize),
    #[error("Residue {number} has {expected} atoms but {found} positions were supplied")]
    AtomCountMismatch {
        number: isize,
        expected: usize,
        found: usize,
    },
}

/// A single protein chain, the unit the refinement operates on.
///
/// Residues are addressed by their position in the chain (`usize`, 0-based),
/// which is what scheduling and substructure bookkeeping use; the residue
/// sequence number from the source file is kept on each [`Residue`] and is what
/// gets reported to the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structure {
    chain_id: char,
    residues: Vec<Residue>,
    number_map: HashMap<(isize, Option<char>), usize>,
}

impl Structure {
    pub fn new(chain_id: char) -> Self {
        Self {
            chain_id,
            ..Default::default()
        }
    }

    pub fn chain_id(&self) -> char {
        self.chain_id
    }

    /// Appends a residue to the end of the chain and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::DuplicateResidue`] if a residue with the same
    /// sequence number and insertion code is already present.
    pub fn push_residue(&mut self, residue: Residue) -> Result<usize, StructureError> {
        let index = self.residues.len();
        let key = (residue.number, residue.insertion_code);
        if self.number_map.contains_key(&key) {
            return Err(StructureError::DuplicateResidue(residue.label()));
        }
        self.number_map.insert(key, index);
        self.residues.push(residue);
        Ok(index)
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    pub fn residue(&self, index: usize) -> Option<&Residue> {
        self.residues.get(index)
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    pub fn atom_count(&self) -> usize {
        self.residues.iter().map(|r| r.atoms().len()).sum()
    }

    pub fn index_of(&self, number: isize, insertion_code: Option<char>) -> Option<usize> {
        self.number_map.get(&(number, insertion_code)).copied()
    }

    /// The residue before `index` in chain order, if it continues the sequence.
    ///
    /// An inserted residue (`52A`) continues the residue it shares a number
    /// with; otherwise the numbers must be consecutive.
    pub fn sequence_predecessor(&self, index: usize) -> Option<usize> {
        let prev = index.checked_sub(1)?;
        self.continues(prev, index).then_some(prev)
    }

    /// The residue after `index` in chain order, if it continues the sequence.
    pub fn sequence_successor(&self, index: usize) -> Option<usize> {
        let next = index.checked_add(1)?;
        self.continues(index, next).then_some(next)
    }

    fn continues(&self, first: usize, second: usize) -> bool {
        match (self.residues.get(first), self.residues.get(second)) {
            (Some(a), Some(b)) => match b.number - a.number {
                0 => a.insertion_code != b.insertion_code,
                1 => true,
                _ => false,
            },
            _ => false,
        }
    }

    /// Overwrites the positions of every atom in a residue, in atom order.
    ///
    /// # Errors
    ///
    /// Fails without modifying anything if the index is out of range or the
    /// number of positions differs from the residue's atom count.
    pub fn set_residue_positions(
        &mut self,
        index: usize,
        positions: &[Point3<f64>],
    ) -> Result<(), StructureError> {
        let residue = self
            .residues
            .get_mut(index)
            .ok_or(StructureError::ResidueOutOfRange(index))?;
        if residue.atoms().len() != positions.len() {
            return Err(StructureError::AtomCountMismatch {
                number: residue.number,
                expected: residue.atoms().len(),
                found: positions.len(),
            });
        }
        for (atom, position) in residue.atoms_mut().iter_mut().zip(positions) {
            atom.position = *position;
        }
        Ok(())
    }
}
