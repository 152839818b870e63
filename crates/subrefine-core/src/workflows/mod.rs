//! # Workflows Module
//!
//! End-to-end procedures built from the [`engine`](crate::engine) pieces.
//!
//! - **Refinement Workflow** ([`refine`]) - Loads a structure, schedules every residue into
//!   density-ordered rounds, refines each residue's neighborhood with the external tools in
//!   parallel, and writes the refined structure together with a per-residue report.

pub mod refine;
