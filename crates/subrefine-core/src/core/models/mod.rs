//! # Core Models Module
//!
//! Data structures representing the protein chain being refined.
//!
//! ## Key Components
//!
//! - [`atom`] - Atom records with a closed classification of backbone/side-chain labels
//! - [`residue`] - Residue types, their lookup tables, and residue containers
//! - [`structure`] - A single chain, the only mutable state shared across a refinement run
//!
//! ## Usage
//!
//! ```ignore
//! use subrefine::core::models::{atom::Atom, residue::{Residue, ResidueType}, structure::Structure};
//!
//! let mut structure = Structure::new('A');
//! let mut residue = Residue::new(1, "ALA", ResidueType::Alanine);
//! residue.add_atom(Atom::new(1, "CA", Point3::new(0.0, 0.0, 0.0)));
//! structure.push_residue(residue)?;
//! ```

pub mod atom;
pub mod residue;
pub mod structure;
