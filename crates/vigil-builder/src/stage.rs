//! Asset stage builders.
//!
//! `check` is a list of conditions that must all hold:
//!
//! ```json
//! "check": [ { "event.module": "sshd" }, { "user.name": "+kvdb_match/admins" } ]
//! ```
//!
//! An object with several keys is accepted as shorthand for the list form.
//!
//! `normalize` is a list of blocks, each with an optional `check` and a
//! `map`. A block's map runs only if its own check holds; blocks are
//! independent of each other:
//!
//! ```json
//! "normalize": [
//!   { "map": { "event.kind": "alert" } },
//!   { "check": { "user.name": "+kvdb_match/admins" },
//!     "map":   { "user.roles": "+kvdb_extract/roles/$user.name" } }
//! ]
//! ```

use serde_json::{Map, Value};

use vigil_contracts::error::{VigilError, VigilResult};
use vigil_core::Expression;

use crate::operation;
use crate::registry::{expect_stage, Definition, Registry};

pub const CHECK: &str = "stage.check";
pub const NORMALIZE: &str = "stage.normalize";
pub const MAP: &str = "stage.map";

pub(crate) fn register(registry: &mut Registry) -> VigilResult<()> {
    registry.register(CHECK, |definition, registry| {
        let body = expect_stage(CHECK, definition)?;
        build_pairs(CHECK, body, operation::CONDITION, registry).map(|ops| Expression::and(CHECK, ops))
    })?;
    registry.register(MAP, |definition, registry| {
        let body = expect_stage(MAP, definition)?;
        build_pairs(MAP, body, operation::MAP, registry).map(|ops| Expression::chain(MAP, ops))
    })?;
    registry.register(NORMALIZE, |definition, registry| {
        let body = expect_stage(NORMALIZE, definition)?;
        build_normalize(body, registry)
    })?;
    Ok(())
}

fn stage_error(stage: &str, reason: impl Into<String>) -> VigilError {
    VigilError::InvalidHelper {
        helper: stage.to_string(),
        reason: reason.into(),
    }
}

/// Flatten an object or a list of objects into ordered `field: value` pairs.
fn pairs<'v>(stage: &str, body: &'v Value) -> VigilResult<Vec<(&'v String, &'v Value)>> {
    match body {
        Value::Object(map) => Ok(map.iter().collect()),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                let map: &Map<String, Value> = item
                    .as_object()
                    .ok_or_else(|| stage_error(stage, "list entries must be objects"))?;
                out.extend(map.iter());
            }
            Ok(out)
        }
        _ => Err(stage_error(stage, "must be an object or a list of objects")),
    }
}

fn build_pairs(stage: &str, body: &Value, builder: &str, registry: &Registry) -> VigilResult<Vec<Expression>> {
    pairs(stage, body)?
        .into_iter()
        .map(|(field, value)| {
            registry.build(
                builder,
                &Definition::Operation {
                    field: field.clone(),
                    value: value.clone(),
                },
            )
        })
        .collect()
}

fn build_normalize(body: &Value, registry: &Registry) -> VigilResult<Expression> {
    let blocks = body
        .as_array()
        .ok_or_else(|| stage_error(NORMALIZE, "must be a list of blocks"))?;

    let mut operands = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        let block = block
            .as_object()
            .ok_or_else(|| stage_error(NORMALIZE, format!("block {} must be an object", index)))?;

        if let Some(key) = block.keys().find(|k| *k != "check" && *k != "map") {
            return Err(stage_error(
                NORMALIZE,
                format!("block {} has unknown key '{}'", index, key),
            ));
        }

        let map_body = block
            .get("map")
            .ok_or_else(|| stage_error(NORMALIZE, format!("block {} is missing 'map'", index)))?;
        let map = registry.build(MAP, &Definition::Stage(map_body.clone()))?;

        let name = format!("{}.block{}", NORMALIZE, index);
        let expression = match block.get("check") {
            Some(check_body) => {
                let check = registry.build(CHECK, &Definition::Stage(check_body.clone()))?;
                Expression::implication(name, check, map)
            }
            None => Expression::chain(name, vec![map]),
        };
        operands.push(expression);
    }

    Ok(Expression::chain(NORMALIZE, operands))
}
