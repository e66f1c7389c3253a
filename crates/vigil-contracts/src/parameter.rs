//! Helper parameters: literal values or references into the current event.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Leading marker that turns a raw helper argument into an event reference.
pub const REFERENCE_ANCHOR: char = '$';

/// A single helper argument, decoded once at build time.
///
/// `Reference` holds a dotted field path resolved against each event at
/// evaluation time; `Literal` is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Parameter {
    Literal(String),
    Reference(String),
}

impl Parameter {
    /// Decode a raw argument string.
    ///
    /// `"$source.ip"` becomes `Reference("source.ip")`; everything else is a
    /// `Literal`, including an empty string.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(REFERENCE_ANCHOR) {
            Some(path) => Parameter::Reference(path.to_string()),
            None => Parameter::Literal(raw.to_string()),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Parameter::Reference(_))
    }

    /// The literal text or the referenced path, without the anchor.
    pub fn value(&self) -> &str {
        match self {
            Parameter::Literal(value) | Parameter::Reference(value) => value,
        }
    }

    /// Resolve this parameter against `event` as a string.
    ///
    /// Returns `None` when a reference points to a missing field or to a
    /// field that is not a JSON string.
    pub fn resolve<'a>(&'a self, event: &'a Event) -> Option<&'a str> {
        match self {
            Parameter::Literal(value) => Some(value),
            Parameter::Reference(path) => event.get_str(path),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Literal(value) => f.write_str(value),
            Parameter::Reference(path) => write!(f, "{}{}", REFERENCE_ANCHOR, path),
        }
    }
}
