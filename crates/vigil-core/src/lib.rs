//! # vigil-core
//!
//! The evaluation core of the VIGIL event engine.
//!
//! This crate provides:
//! - `Graph`, the adjacency structure environments assemble assets into
//! - `Expression`, the compiled operator tree and its evaluator
//! - The collaborator traits (`Catalog`, `KvdbManager`, `KvdbStore`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vigil_core::{Expression, traits::{Catalog, KvdbManager}};
//! ```

pub mod expression;
pub mod graph;
pub mod traits;

pub use expression::{Expression, TermFn};
pub use graph::{DanglingEdge, Graph};
pub use traits::{Catalog, KvdbError, KvdbHandle, KvdbManager, KvdbStore};

// ── Tests ────────────────────────────────────────────────────────────────────
