//! The event document flowing through compiled expressions.
//!
//! An `Event` wraps a JSON value and addresses its fields with dotted paths
//! (`"source.ip"`, `"process.args.0"`). Numeric segments index into arrays
//! when reading. Writes create missing intermediate objects.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The JSON type of a value, used for type-compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    /// Classify a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Bool,
            Value::Number(_) => JsonType::Number,
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }

    /// Only objects and arrays can be merged into an existing field.
    pub fn is_mergeable(self) -> bool {
        matches!(self, JsonType::Object | JsonType::Array)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonType::Null => "null",
            JsonType::Bool => "bool",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        };
        f.write_str(name)
    }
}

/// Why `Event::merge` refused to merge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("target field '{path}' not found")]
    MissingTarget { path: String },

    #[error("cannot merge {source_type} into {target_type}")]
    TypeMismatch {
        target_type: JsonType,
        source_type: JsonType,
    },
}

/// A single security event under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Value);

impl Event {
    /// An empty event (`{}`).
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Wrap an existing JSON value.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Parse an event from JSON text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Read the value at `path`. The empty path addresses the whole event.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.0);
        }
        let mut current = &self.0;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        if path.is_empty() {
            return Some(&mut self.0);
        }
        let mut current = &mut self.0;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Read the value at `path` if it is a JSON string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// The JSON type of the field at `path`, if present.
    pub fn type_of(&self, path: &str) -> Option<JsonType> {
        self.get(path).map(JsonType::of)
    }

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// A numeric segment addresses an element of an existing array; the
    /// array is padded with `null` when the index is past its end. Any
    /// other non-object node on the path is replaced by an object.
    pub fn set(&mut self, path: &str, value: Value) {
        if path.is_empty() {
            self.0 = value;
            return;
        }
        let mut current = &mut self.0;
        for segment in path.split('.') {
            let index = match &*current {
                Value::Array(_) => segment.parse::<usize>().ok(),
                _ => None,
            };
            if index.is_none() && !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = match (current, index) {
                (Value::Array(items), Some(index)) => {
                    if items.len() <= index {
                        items.resize(index + 1, Value::Null);
                    }
                    &mut items[index]
                }
                (Value::Object(map), _) => map.entry(segment.to_owned()).or_insert(Value::Null),
                (other, _) => other,
            };
        }
        *current = value;
    }

    pub fn set_bool(&mut self, path: &str, value: bool) {
        self.set(path, Value::Bool(value));
    }

    /// Remove the field at `path`, returning its previous value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let (parent, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (parent, leaf),
            None => ("", path),
        };
        match self.get_mut(parent)? {
            Value::Object(map) => map.remove(leaf),
            Value::Array(items) => {
                let index = leaf.parse::<usize>().ok().filter(|i| *i < items.len())?;
                Some(items.remove(index))
            }
            _ => None,
        }
    }

    /// Merge `source` into the field at `path`.
    ///
    /// Objects merge shallowly (source keys overwrite target keys); arrays
    /// append the source elements not already present. Any other pairing,
    /// or a missing target, leaves the event untouched and returns an error.
    pub fn merge(&mut self, path: &str, source: Value) -> Result<(), MergeError> {
        let target = self.get_mut(path).ok_or_else(|| MergeError::MissingTarget {
            path: path.to_string(),
        })?;

        match (target, source) {
            (Value::Object(dst), Value::Object(src)) => {
                for (key, value) in src {
                    dst.insert(key, value);
                }
                Ok(())
            }
            (Value::Array(dst), Value::Array(src)) => {
                for item in src {
                    if !dst.contains(&item) {
                        dst.push(item);
                    }
                }
                Ok(())
            }
            (target, source) => Err(MergeError::TypeMismatch {
                target_type: JsonType::of(target),
                source_type: JsonType::of(&source),
            }),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
