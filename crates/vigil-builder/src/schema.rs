//! Structural validation of asset documents.
//!
//! Every asset fetched from the catalog is checked against `ASSET_SCHEMA`
//! before any builder sees it. Violations are collected, not just the
//! first one, and reported in a single `VigilError::InvalidAsset`.

use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::{json, Value};
use tracing::warn;

use vigil_contracts::error::{VigilError, VigilResult};

/// JSON Schema of a decoder / rule / output / filter document.
pub fn asset_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["name"],
        "additionalProperties": false,
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "parents": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 }
            },
            "after": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 }
            },
            "metadata": { "type": "object" },
            "check": { "type": ["array", "object"] },
            "normalize": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["map"],
                    "properties": {
                        "check": { "type": ["array", "object"] },
                        "map": { "type": ["array", "object"] }
                    },
                    "additionalProperties": false
                }
            }
        }
    })
}

fn validator() -> &'static Result<Validator, String> {
    static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();
    VALIDATOR.get_or_init(|| jsonschema::validator_for(&asset_schema()).map_err(|e| e.to_string()))
}

/// Check `document` (the asset named `asset`) against the asset schema.
pub fn validate_asset(asset: &str, document: &Value) -> VigilResult<()> {
    let validator = validator().as_ref().map_err(|e| VigilError::InvalidAsset {
        asset: asset.to_string(),
        reason: format!("invalid asset schema: {}", e),
    })?;

    let violations: Vec<String> = validator
        .iter_errors(document)
        .map(|error| format!("at '{}': {}", error.instance_path, error))
        .collect();

    if violations.is_empty() {
        return Ok(());
    }

    warn!(asset = %asset, violations = violations.len(), "asset failed schema validation");
    Err(VigilError::InvalidAsset {
        asset: asset.to_string(),
        reason: violations.join("; "),
    })
}
