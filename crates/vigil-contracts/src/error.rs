//! Build-time error types for the VIGIL engine.
//!
//! Every fallible construction step (catalog fetch, asset build, graph
//! assembly, configuration load) returns `VigilResult<T>`. Evaluation of an
//! event never produces a `VigilError`: per-event failures are carried as
//! failure entries in the event's `Trace` instead.

use thiserror::Error;

/// The unified build-time error type for the VIGIL engine.
#[derive(Debug, Error)]
pub enum VigilError {
    /// The catalog could not produce the requested asset document.
    #[error("catalog error for {asset_type} '{name}': {reason}")]
    Catalog {
        asset_type: String,
        name: String,
        reason: String,
    },

    /// The environment document is not shaped as expected.
    #[error("malformed environment '{environment}': {reason}")]
    MalformedEnvironment { environment: String, reason: String },

    /// The environment document declares no decoder, rule or output graph.
    #[error("environment '{environment}' needs at least one graph")]
    MissingGraph { environment: String },

    /// An asset document failed schema validation or could not be compiled.
    #[error("invalid asset '{asset}': {reason}")]
    InvalidAsset { asset: String, reason: String },

    /// No builder is registered under the requested name.
    #[error("no builder registered under '{name}'")]
    UnknownBuilder { name: String },

    /// A builder was registered twice under the same name.
    #[error("builder '{name}' is already registered")]
    DuplicateBuilder { name: String },

    /// A helper definition has the wrong arity or parameter kinds.
    #[error("invalid helper '{helper}': {reason}")]
    InvalidHelper { helper: String, reason: String },

    /// A key-value database needed at build time is unavailable.
    #[error("kvdb error: {reason}")]
    Kvdb { reason: String },

    /// A graph edge references a node that does not exist.
    #[error("integrity error in [{graph}] graph: {reason}")]
    Integrity { graph: String, reason: String },

    /// A graph contains a cycle reachable from its input node.
    #[error("cycle detected in [{graph}] graph at node '{node}'")]
    Cycle { graph: String, node: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The runtime could not accept work (pool stopped, no environment).
    #[error("runtime error: {reason}")]
    Runtime { reason: String },
}

/// Convenience alias used throughout the VIGIL crates.
pub type VigilResult<T> = Result<T, VigilError>;
