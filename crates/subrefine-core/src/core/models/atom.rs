use nalgebra::Point3;

/// Classifies an atom by the label it carries within its residue.
///
/// Only the backbone atoms are distinguished individually, because they are the
/// only ones the refinement treats specially: the alpha carbon anchors every
/// substructure, and the backbone carbon and nitrogen are the sites where
/// severed peptide bonds get capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum AtomKind {
    /// Backbone amide nitrogen (`N`).
    BackboneNitrogen,
    /// Alpha carbon (`CA`).
    AlphaCarbon,
    /// Backbone carbonyl carbon (`C`).
    BackboneCarbon,
    /// Backbone carbonyl or terminal carboxyl oxygen (`O`, `OXT`).
    BackboneOxygen,
    /// Any hydrogen, backbone or side chain.
    Hydrogen,
    /// Heavy side-chain atom.
    #[default]
    Sidechain,
}

impl AtomKind {
    /// Classifies an atom from its PDB atom name.
    ///
    /// Hydrogen names may carry a leading digit (`1HB`, `2HG1`), as older PDB
    /// files write them.
    pub fn from_atom_name(name: &str) -> Self {
        let name = name.trim();
        match name {
            "N" => AtomKind::BackboneNitrogen,
            "CA" => AtomKind::AlphaCarbon,
            "C" => AtomKind::BackboneCarbon,
            "O" | "OXT" | "OT1" | "OT2" => AtomKind::BackboneOxygen,
            _ => {
                let first_letter = name.trim_start_matches(|c: char| c.is_ascii_digit()).chars().next();
                match first_letter.map(|c| c.to_ascii_uppercase()) {
                    Some('H') | Some('D') => AtomKind::Hydrogen,
                    _ => AtomKind::Sidechain,
                }
            }
        }
    }

    /// Backbone carbon and nitrogen are the two ends of a peptide bond.
    pub fn is_peptide_bond_end(self) -> bool {
        matches!(self, AtomKind::BackboneNitrogen | AtomKind::BackboneCarbon)
    }
}

/// An atom of a refined structure, together with the record fields needed to
/// write it back out unchanged apart from its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Serial number from the source file.
    pub serial: usize,
    /// The PDB atom name (e.g., "CA", "HB2").
    pub name: String,
    /// Label kind derived from the name.
    pub kind: AtomKind,
    /// Element symbol, empty if the source record did not carry one.
    pub element: String,
    /// Alternate location indicator.
    pub alt_loc: Option<char>,
    pub occupancy: f64,
    pub temp_factor: f64,
    /// Cartesian position in Angstroms.
    pub position: Point3<f64>,
}

impl Atom {
    /// Creates a new `Atom` with default record fields.
    ///
    /// # Arguments
    ///
    /// * `serial` - The serial number to write for this atom.
    /// * `name` - The PDB atom name.
    /// * `position` - The 3D coordinates of the atom.
    pub fn new(serial: usize, name: &str, position: Point3<f64>) -> Self {
        let name = name.trim();
        Self {
            serial,
            name: name.to_string(),
            kind: AtomKind::from_atom_name(name),
            element: String::new(),
            alt_loc: None,
            occupancy: 1.0,
            temp_factor: 0.0,
            position,
        }
    }

    pub fn with_element(mut self, element: &str) -> Self {
        self.element = element.trim().to_string();
        self
    }

    pub fn is_hydrogen(&self) -> bool {
        self.kind == AtomKind::Hydrogen
    }
}
