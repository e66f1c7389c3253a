//! Helper definitions: the `+name/arg/arg` strings embedded in asset
//! stages.
//!
//! A helper string is parsed once at build time into a `HelperDefinition`
//! holding the target field it was written under, the helper name, and its
//! arguments decoded into `Parameter`s. Builders then validate arity and
//! parameter kinds before producing an expression.

use vigil_contracts::{
    error::{VigilError, VigilResult},
    parameter::Parameter,
};

/// Leading marker of a helper string.
pub const HELPER_ANCHOR: char = '+';

/// Separator between the helper name and each argument.
pub const ARG_SEPARATOR: char = '/';

/// Escape character allowing a literal `/` inside an argument.
pub const ESCAPE: char = '\\';

/// One parsed helper invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperDefinition {
    /// The event field the helper was declared under.
    pub target_field: String,
    /// Helper name without the anchor, e.g. `kvdb_match`.
    pub name: String,
    pub parameters: Vec<Parameter>,
}

impl HelperDefinition {
    /// True if `raw` uses helper syntax.
    pub fn is_helper(raw: &str) -> bool {
        raw.starts_with(HELPER_ANCHOR)
    }

    /// Parse `raw` (`+name/arg/...`) declared under `target_field`.
    pub fn parse(target_field: &str, raw: &str) -> VigilResult<Self> {
        let body = raw.strip_prefix(HELPER_ANCHOR).ok_or_else(|| VigilError::InvalidHelper {
            helper: raw.to_string(),
            reason: format!("helper must start with '{}'", HELPER_ANCHOR),
        })?;

        let mut parts = split_escaped(body).into_iter();
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(VigilError::InvalidHelper {
                helper: raw.to_string(),
                reason: "missing helper name".to_string(),
            });
        }

        Ok(Self {
            target_field: target_field.to_string(),
            name,
            parameters: parts.map(|arg| Parameter::parse(&arg)).collect(),
        })
    }

    /// Registry key of the builder for this helper.
    pub fn builder_name(&self) -> String {
        format!("helper.{}", self.name)
    }

    /// Name used in every trace message the helper emits:
    /// `helper.<name>[<target>, <arg>, ...]`.
    pub fn formatted_name(&self) -> String {
        let mut name = format!("helper.{}[{}", self.name, self.target_field);
        for parameter in &self.parameters {
            name.push_str(", ");
            name.push_str(&parameter.to_string());
        }
        name.push(']');
        name
    }

    /// Fail unless exactly `expected` parameters were given.
    pub fn check_parameters_size(&self, expected: usize) -> VigilResult<()> {
        if self.parameters.len() != expected {
            return Err(VigilError::InvalidHelper {
                helper: self.formatted_name(),
                reason: format!(
                    "expected {} parameter(s) but got {}",
                    expected,
                    self.parameters.len()
                ),
            });
        }
        Ok(())
    }

    /// Fail if parameter `index` is a reference.
    pub fn check_literal(&self, index: usize) -> VigilResult<()> {
        match self.parameters.get(index) {
            Some(Parameter::Literal(_)) => Ok(()),
            Some(Parameter::Reference(path)) => Err(VigilError::InvalidHelper {
                helper: self.formatted_name(),
                reason: format!(
                    "parameter {} must be a literal value, got reference '{}'",
                    index + 1,
                    path
                ),
            }),
            None => Err(VigilError::InvalidHelper {
                helper: self.formatted_name(),
                reason: format!("parameter {} is missing", index + 1),
            }),
        }
    }
}

/// Split on unescaped `/`, dropping the escape character.
fn split_escaped(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(next) if next == ARG_SEPARATOR || next == ESCAPE => current.push(next),
                Some(next) => {
                    current.push(ESCAPE);
                    current.push(next);
                }
                None => current.push(ESCAPE),
            },
            ARG_SEPARATOR => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    parts
}
