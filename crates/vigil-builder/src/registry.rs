//! The builder registry.
//!
//! A `Registry` maps operator names to builders. A builder turns one
//! declarative `Definition` into an `Expression`; collaborators it needs at
//! build or evaluation time (the KVDB manager, for instance) are captured
//! when the builder is registered, not passed per call.
//!
//! Builder names are namespaced by what they accept:
//!
//! - `stage.*`: a whole asset stage (`Definition::Stage`)
//! - `operation.*`: one `field: value` pair of a stage (`Definition::Operation`)
//! - `helper.*`: one parsed `+name/args` string (`Definition::Helper`)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use vigil_contracts::error::{VigilError, VigilResult};
use vigil_core::{traits::KvdbManager, Expression};

use crate::definition::HelperDefinition;

/// The declarative input of a builder.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// The JSON body of an asset stage.
    Stage(Value),
    /// One `field: value` pair inside a stage.
    Operation { field: String, value: Value },
    /// A parsed helper invocation.
    Helper(HelperDefinition),
}

impl Definition {
    /// Short tag used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Definition::Stage(_) => "stage",
            Definition::Operation { .. } => "operation",
            Definition::Helper(_) => "helper",
        }
    }
}

/// A registered builder.
///
/// Receives the registry so composite builders (stages, operations) can
/// delegate to the builders of their parts.
pub type Builder = Arc<dyn Fn(&Definition, &Registry) -> VigilResult<Expression> + Send + Sync>;

/// Name → builder map.
#[derive(Default, Clone)]
pub struct Registry {
    builders: HashMap<String, Builder>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in stage, operation and helper, with
    /// KVDB helpers bound to `kvdb`.
    pub fn builtin(kvdb: Arc<dyn KvdbManager>) -> VigilResult<Self> {
        let mut registry = Self::new();
        crate::stage::register(&mut registry)?;
        crate::operation::register(&mut registry)?;
        crate::helpers::kvdb::register(&mut registry, kvdb)?;
        debug!(builders = registry.builders.len(), "builtin registry ready");
        Ok(registry)
    }

    /// Register `builder` under `name`. Names are unique.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F) -> VigilResult<()>
    where
        F: Fn(&Definition, &Registry) -> VigilResult<Expression> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.builders.contains_key(&name) {
            return Err(VigilError::DuplicateBuilder { name });
        }
        self.builders.insert(name, Arc::new(builder));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn get(&self, name: &str) -> VigilResult<Builder> {
        self.builders
            .get(name)
            .cloned()
            .ok_or_else(|| VigilError::UnknownBuilder {
                name: name.to_string(),
            })
    }

    /// Look up `name` and run its builder over `definition`.
    pub fn build(&self, name: &str, definition: &Definition) -> VigilResult<Expression> {
        let builder = self.get(name)?;
        builder(definition, self)
    }

    /// Sorted list of registered names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("builders", &self.names()).finish()
    }
}

// ── Definition accessors for builders ────────────────────────────────────────

/// Unwrap a helper definition or report which builder got the wrong input.
pub fn expect_helper<'d>(builder: &str, definition: &'d Definition) -> VigilResult<&'d HelperDefinition> {
    match definition {
        Definition::Helper(helper) => Ok(helper),
        other => Err(wrong_definition(builder, "helper", other)),
    }
}

pub fn expect_stage<'d>(builder: &str, definition: &'d Definition) -> VigilResult<&'d Value> {
    match definition {
        Definition::Stage(value) => Ok(value),
        other => Err(wrong_definition(builder, "stage", other)),
    }
}

pub fn expect_operation<'d>(
    builder: &str,
    definition: &'d Definition,
) -> VigilResult<(&'d str, &'d Value)> {
    match definition {
        Definition::Operation { field, value } => Ok((field, value)),
        other => Err(wrong_definition(builder, "operation", other)),
    }
}

fn wrong_definition(builder: &str, expected: &str, got: &Definition) -> VigilError {
    VigilError::InvalidHelper {
        helper: builder.to_string(),
        reason: format!("expected a {} definition, got a {}", expected, got.kind()),
    }
}
