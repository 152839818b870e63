use super::atom::{Atom, AtomKind};
use nalgebra::Point3;
use phf::{Map, phf_map};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResidueType {
    // --- Aliphatic, Nonpolar ---
    Alanine,
    Glycine,
    Isoleucine,
    Leucine,
    Proline,
    Valine,

    // --- Aromatic ---
    Phenylalanine,
    Tryptophan,
    Tyrosine,

    // --- Polar, Uncharged ---
    Asparagine,
    Cysteine,
    Glutamine,
    Serine,
    Threonine,
    Methionine,

    // --- Charged ---
    Arginine,
    Lysine,
    AsparticAcid,
    GlutamicAcid,
    Histidine,
}

// Protonation-state variants collapse onto their parent residue.
static THREE_LETTER_CODES: Map<&'static str, ResidueType> = phf_map! {
    "ALA" => ResidueType::Alanine,
    "GLY" => ResidueType::Glycine,
    "ILE" => ResidueType::Isoleucine,
    "LEU" => ResidueType::Leucine,
    "PRO" => ResidueType::Proline,
    "VAL" => ResidueType::Valine,
    "PHE" => ResidueType::Phenylalanine,
    "TRP" => ResidueType::Tryptophan,
    "TYR" => ResidueType::Tyrosine,
    "ASN" => ResidueType::Asparagine,
    "CYS" => ResidueType::Cysteine,
    "CYX" => ResidueType::Cysteine,
    "CYM" => ResidueType::Cysteine,
    "GLN" => ResidueType::Glutamine,
    "SER" => ResidueType::Serine,
    "THR" => ResidueType::Threonine,
    "MET" => ResidueType::Methionine,
    "ARG" => ResidueType::Arginine,
    "LYS" => ResidueType::Lysine,
    "LYN" => ResidueType::Lysine,
    "ASP" => ResidueType::AsparticAcid,
    "ASH" => ResidueType::AsparticAcid,
    "GLU" => ResidueType::GlutamicAcid,
    "GLH" => ResidueType::GlutamicAcid,
    "HIS" => ResidueType::Histidine,
    "HID" => ResidueType::Histidine,
    "HIE" => ResidueType::Histidine,
    "HIP" => ResidueType::Histidine,
    "HSD" => ResidueType::Histidine,
    "HSE" => ResidueType::Histidine,
    "HSP" => ResidueType::Histidine,
};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unsupported residue name: '{0}'")]
pub struct ParseResidueTypeError(pub String);

impl ResidueType {
    pub fn from_three_letter(code: &str) -> Option<Self> {
        THREE_LETTER_CODES
            .get(code.trim().to_ascii_uppercase().as_str())
            .copied()
    }

    pub fn to_three_letter(self) -> &'static str {
        match self {
            ResidueType::Alanine => "ALA",
            ResidueType::Glycine => "GLY",
            ResidueType::Isoleucine => "ILE",
            ResidueType::Leucine => "LEU",
            ResidueType::Proline => "PRO",
            ResidueType::Valine => "VAL",
            ResidueType::Phenylalanine => "PHE",
            ResidueType::Tryptophan => "TRP",
            ResidueType::Tyrosine => "TYR",
            ResidueType::Asparagine => "ASN",
            ResidueType::Cysteine => "CYS",
            ResidueType::Glutamine => "GLN",
            ResidueType::Serine => "SER",
            ResidueType::Threonine => "THR",
            ResidueType::Methionine => "MET",
            ResidueType::Arginine => "ARG",
            ResidueType::Lysine => "LYS",
            ResidueType::AsparticAcid => "ASP",
            ResidueType::GlutamicAcid => "GLU",
            ResidueType::Histidine => "HIS",
        }
    }

    pub fn to_one_letter(self) -> char {
        match self {
            ResidueType::Alanine => 'A',
            ResidueType::Glycine => 'G',
            ResidueType::Isoleucine => 'I',
            ResidueType::Leucine => 'L',
            ResidueType::Proline => 'P',
            ResidueType::Valine => 'V',
            ResidueType::Phenylalanine => 'F',
            ResidueType::Tryptophan => 'W',
            ResidueType::Tyrosine => 'Y',
            ResidueType::Asparagine => 'N',
            ResidueType::Cysteine => 'C',
            ResidueType::Glutamine => 'Q',
            ResidueType::Serine => 'S',
            ResidueType::Threonine => 'T',
            ResidueType::Methionine => 'M',
            ResidueType::Arginine => 'R',
            ResidueType::Lysine => 'K',
            ResidueType::AsparticAcid => 'D',
            ResidueType::GlutamicAcid => 'E',
            ResidueType::Histidine => 'H',
        }
    }

    /// Characteristic radius of the residue type in Angstroms.
    ///
    /// Roughly the extent of a fully built residue measured from its geometric
    /// center; it scales the neighbor search and the density shells.
    pub fn characteristic_radius(self) -> f64 {
        match self {
            ResidueType::Alanine => 2.4801,
            ResidueType::Arginine => 4.8618,
            ResidueType::Asparagine => 3.2237,
            ResidueType::AsparticAcid => 2.8036,
            ResidueType::Cysteine => 2.5439,
            ResidueType::Glutamine => 3.8456,
            ResidueType::GlutamicAcid => 3.3963,
            ResidueType::Glycine => 2.1455,
            ResidueType::Histidine => 3.8376,
            ResidueType::Isoleucine => 3.4050,
            ResidueType::Leucine => 3.5357,
            ResidueType::Lysine => 4.4521,
            ResidueType::Methionine => 4.1821,
            ResidueType::Phenylalanine => 4.1170,
            ResidueType::Proline => 2.8418,
            ResidueType::Serine => 2.4997,
            ResidueType::Threonine => 2.7487,
            ResidueType::Tryptophan => 4.6836,
            ResidueType::Tyrosine => 4.5148,
            ResidueType::Valine => 2.9515,
        }
    }
}

impl FromStr for ResidueType {
    type Err = ParseResidueTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_three_letter(s).ok_or_else(|| ParseResidueTypeError(s.trim().to_string()))
    }
}

impl fmt::Display for ResidueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_three_letter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub number: isize,               // Residue sequence number from source file
    pub insertion_code: Option<char>, // Insertion code from source file
    pub name: String,                // Residue name as written in the source (e.g., "HIE")
    pub residue_type: ResidueType,   // Canonical residue type
    atoms: Vec<Atom>,                // Atoms in source order
}

impl Residue {
    pub fn new(number: isize, name: &str, residue_type: ResidueType) -> Self {
        Self {
            number,
            insertion_code: None,
            name: name.trim().to_string(),
            residue_type,
            atoms: Vec::new(),
        }
    }

    /// Sequence number followed by the insertion code, if any (`52`, `52A`).
    pub fn label(&self) -> String {
        match self.insertion_code {
            Some(code) => format!("{}{}", self.number, code),
            None => self.number.to_string(),
        }
    }

    pub fn add_atom(&mut self, atom: Atom) {
        self.atoms.push(atom);
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub(crate) fn atoms_mut(&mut self) -> &mut [Atom] {
        &mut self.atoms
    }

    pub fn atom_by_kind(&self, kind: AtomKind) -> Option<&Atom> {
        self.atoms.iter().find(|atom| atom.kind == kind)
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|atom| atom.position).collect()
    }

    /// Unweighted mean of the atom positions, or `None` for an empty residue.
    pub fn geometric_center(&self) -> Option<Point3<f64>> {
        if self.atoms.is_empty() {
            return None;
        }
        let sum = self
            .atoms
            .iter()
            .fold(nalgebra::Vector3::zeros(), |acc, atom| acc + atom.position.coords);
        Some(Point3::from(sum / self.atoms.len() as f64))
    }
}
