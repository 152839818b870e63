//! Provides input/output functionality for structure files.
//!
//! Structures are read from and written to the fixed-column PDB format. The
//! [`traits::StructureFile`] trait gives a path-based API on top of the
//! reader/writer methods; [`pdb::PdbFile`] additionally exposes raw atom
//! records, which is how fragments are exchanged with external tools.

pub mod pdb;
pub mod traits;
