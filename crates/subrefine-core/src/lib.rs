//! # subrefine Core Library
//!
//! Localized structural refinement of protein structures: every residue is
//! optimized inside a small substructure cut from its spatial neighborhood,
//! and the results are stitched back into the full structure.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Structure`, `Residue`, `Atom`),
//!   PDB I/O, the k-d tree spatial index and geometric utilities such as Kabsch superposition.
//!
//! - **[`engine`]: The Logic Core.** Neighborhood analysis and density scoring, round
//!   scheduling, substructure construction with boundary capping, the external protonation
//!   and optimization tools, and reconciliation of optimized fragments.
//!
//! - **[`workflows`]: The Public API.** The refinement workflow that ties `engine` and `core`
//!   together: setup checks, round-synchronous parallel execution and output writing.

pub mod core;
pub mod engine;
pub mod workflows;
