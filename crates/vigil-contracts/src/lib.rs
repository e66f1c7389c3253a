//! # vigil-contracts
//!
//! Shared types, events, traces and errors for the VIGIL event engine.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, field addressing on events, and
//! error types.

pub mod asset;
pub mod error;
pub mod event;
pub mod parameter;
pub mod trace;

pub use asset::{AssetType, GraphKind};
pub use error::{VigilError, VigilResult};
pub use event::{Event, JsonType, MergeError};
pub use parameter::Parameter;
pub use trace::{Outcome, ProcessedEvent, Trace, TraceEntry};
