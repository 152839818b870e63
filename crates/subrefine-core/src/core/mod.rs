//! # Core Module
//!
//! Stateless building blocks for structure refinement: the data model of a
//! protein chain, PDB input/output, spatial queries, and geometric utilities.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atoms, residues, and the single-chain structure
//! - **File I/O** ([`io`]) - Fixed-column PDB reading and writing, whole structures and fragments
//! - **Spatial Queries** ([`spatial`]) - k-d tree neighbor search over atoms and residues
//! - **Geometry** ([`utils::geometry`]) - Centroids, RMSD, distance minima, and rigid superposition

pub mod io;
pub mod models;
pub mod spatial;
pub mod utils;
