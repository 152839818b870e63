//! # Engine Module
//!
//! The stateful layer that turns a loaded [`Structure`](crate::core::models::structure::Structure)
//! into a sequence of local refinement tasks and carries each task through the external tools.
//!
//! ## Architecture
//!
//! - **Context** ([`context`], [`density`]) - Neighbor sets and density scores, computed
//!   once from the input geometry and shared read-only by every round
//! - **Scheduling** ([`scheduler`]) - Partition of residues into rounds of independent targets
//! - **Substructures** ([`substructure`]) - Member selection, constrained/free partition,
//!   fragment extraction and boundary capping
//! - **External tools** ([`protonation`], [`optimizer`], [`tools`]) - Protonation repair and
//!   constrained optimization behind traits, with the `obabel` and `xtb` implementations
//! - **Reconciliation** ([`alignment`]) - Superposition of optimized fragments back onto the
//!   structure's frame
//! - **Task State** ([`state`]) - Per-substructure stage machine and the per-residue log entries
//! - **Configuration**, **Progress** and **Errors** ([`config`], [`progress`], [`error`])

pub mod alignment;
pub mod config;
pub mod context;
pub mod density;
pub mod error;
pub mod optimizer;
pub mod progress;
pub mod protonation;
pub mod scheduler;
pub mod state;
pub mod substructure;
pub mod tools;
