//! Assets: one compiled decoder, rule, output or filter.
//!
//! An asset document looks like:
//!
//! ```json
//! {
//!   "name": "decoder/sshd/0",
//!   "parents": ["decoder/syslog/0"],
//!   "metadata": { "title": "OpenSSH" },
//!   "check": [ { "event.module": "sshd" } ],
//!   "normalize": [ { "map": { "event.kind": "authentication" } } ]
//! }
//! ```
//!
//! Filters declare the nodes they are spliced after with `after` instead of
//! `parents`, and may only carry a `check` stage.

use serde_json::Value;
use tracing::debug;

use vigil_contracts::{
    asset::AssetType,
    error::{VigilError, VigilResult},
};
use vigil_core::Expression;

use crate::registry::{Definition, Registry};
use crate::schema;
use crate::stage;

/// Index of an asset in its environment's arena.
pub type AssetId = usize;

/// A built, immutable asset.
#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub asset_type: AssetType,
    /// The document the asset was built from.
    pub definition: Value,
    /// Declared parents, in document order. For filters, the nodes the
    /// filter is injected after.
    pub parents: Vec<String>,
    pub expression: Expression,
}

impl Asset {
    /// Validate `document` and compile it as an asset of `asset_type`.
    pub fn from_json(document: &Value, asset_type: AssetType, registry: &Registry) -> VigilResult<Self> {
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| VigilError::InvalidAsset {
                asset: "<unnamed>".to_string(),
                reason: "missing string field 'name'".to_string(),
            })?
            .to_string();

        schema::validate_asset(&name, document)?;

        let invalid = |reason: &str| VigilError::InvalidAsset {
            asset: name.clone(),
            reason: reason.to_string(),
        };

        let is_filter = asset_type == AssetType::Filter;
        if is_filter && document.get("parents").is_some() {
            return Err(invalid("filters declare their targets with 'after', not 'parents'"));
        }
        if !is_filter && document.get("after").is_some() {
            return Err(invalid("only filters may declare 'after'"));
        }
        if is_filter && document.get("normalize").is_some() {
            return Err(invalid("filters may not declare 'normalize'"));
        }

        let parents_key = if is_filter { "after" } else { "parents" };
        let mut parents: Vec<String> = Vec::new();
        for parent in document
            .get(parents_key)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            if !parents.iter().any(|p| p == parent) {
                parents.push(parent.to_string());
            }
        }

        let check = match document.get("check") {
            Some(body) => registry.build(stage::CHECK, &Definition::Stage(body.clone())),
            None => Ok(Expression::noop(format!("{}.check", name))),
        }
        .map_err(|e| wrap(&name, e))?;

        let expression = if is_filter {
            Expression::and(name.clone(), vec![check])
        } else {
            let normalize = match document.get("normalize") {
                Some(body) => registry.build(stage::NORMALIZE, &Definition::Stage(body.clone())),
                None => Ok(Expression::noop(format!("{}.normalize", name))),
            }
            .map_err(|e| wrap(&name, e))?;
            Expression::implication(name.clone(), check, normalize)
        };

        debug!(asset = %name, kind = %asset_type, parents = parents.len(), terms = expression.term_count(), "asset built");

        Ok(Self {
            name,
            asset_type,
            definition: document.clone(),
            parents,
            expression,
        })
    }

    /// A synthetic graph root whose expression always succeeds.
    pub fn input(name: impl Into<String>, asset_type: AssetType) -> Self {
        let name = name.into();
        Self {
            expression: Expression::noop(name.clone()),
            name,
            asset_type,
            definition: Value::Null,
            parents: Vec::new(),
        }
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.definition.get("metadata")
    }
}

/// Attribute a stage or helper build error to the asset being built.
fn wrap(asset: &str, error: VigilError) -> VigilError {
    match error {
        VigilError::InvalidAsset { .. } => error,
        other => VigilError::InvalidAsset {
            asset: asset.to_string(),
            reason: other.to_string(),
        },
    }
}
