//! Per-field operations: the `field: value` pairs inside `check` and `map`.
//!
//! Each pair is one of three things, decided by the value:
//!
//! - a helper string (`"+kvdb_match/users"`) → delegated to `helper.<name>`
//! - a reference (`"$source.ip"`) → compared with / copied from that field
//! - any other JSON value → compared with / assigned as a literal

use serde_json::Value;

use vigil_contracts::{
    error::VigilResult,
    parameter::{Parameter, REFERENCE_ANCHOR},
    Outcome,
};
use vigil_core::Expression;

use crate::definition::HelperDefinition;
use crate::registry::{expect_operation, Definition, Registry};

pub const CONDITION: &str = "operation.condition";
pub const MAP: &str = "operation.map";

pub(crate) fn register(registry: &mut Registry) -> VigilResult<()> {
    registry.register(CONDITION, |definition, registry| {
        let (field, value) = expect_operation(CONDITION, definition)?;
        build_condition(field, value, registry)
    })?;
    registry.register(MAP, |definition, registry| {
        let (field, value) = expect_operation(MAP, definition)?;
        build_map(field, value, registry)
    })?;
    Ok(())
}

/// Build the helper expression if `value` uses helper syntax.
fn helper_expression(field: &str, value: &Value, registry: &Registry) -> Option<VigilResult<Expression>> {
    let raw = value.as_str().filter(|s| HelperDefinition::is_helper(s))?;
    Some(HelperDefinition::parse(field, raw).and_then(|helper| {
        let builder = helper.builder_name();
        registry.build(&builder, &Definition::Helper(helper))
    }))
}

fn reference_of(value: &Value) -> Option<Parameter> {
    value
        .as_str()
        .filter(|s| s.starts_with(REFERENCE_ANCHOR))
        .map(Parameter::parse)
}

fn build_condition(field: &str, value: &Value, registry: &Registry) -> VigilResult<Expression> {
    if let Some(helper) = helper_expression(field, value, registry) {
        return helper;
    }

    let field = field.to_string();

    if let Some(reference) = reference_of(value) {
        let path = reference.value().to_string();
        let name = format!("condition.reference[{}=={}]", field, reference);
        let success_trace = format!("[{}] -> Success", name);
        let missing_trace = format!("[{}] -> Failure: reference '{}' not found", name, path);
        let mismatch_trace = format!("[{}] -> Failure: field '{}' does not match reference", name, field);

        return Ok(Expression::term(name, move |event| match event.get(&path) {
            None => Outcome::failure(missing_trace.clone()),
            Some(expected) if event.get(&field) == Some(expected) => {
                Outcome::success(success_trace.clone())
            }
            Some(_) => Outcome::failure(mismatch_trace.clone()),
        }));
    }

    let expected = value.clone();
    let name = format!("condition.value[{}=={}]", field, expected);
    let success_trace = format!("[{}] -> Success", name);
    let failure_trace = format!("[{}] -> Failure", name);

    Ok(Expression::term(name, move |event| {
        if event.get(&field) == Some(&expected) {
            Outcome::success(success_trace.clone())
        } else {
            Outcome::failure(failure_trace.clone())
        }
    }))
}

fn build_map(field: &str, value: &Value, registry: &Registry) -> VigilResult<Expression> {
    if let Some(helper) = helper_expression(field, value, registry) {
        return helper;
    }

    let field = field.to_string();

    if let Some(reference) = reference_of(value) {
        let path = reference.value().to_string();
        let name = format!("map.reference[{}={}]", field, reference);
        let success_trace = format!("[{}] -> Success", name);
        let missing_trace = format!("[{}] -> Failure: reference '{}' not found", name, path);

        return Ok(Expression::term(name, move |event| match event.get(&path).cloned() {
            Some(copied) => {
                event.set(&field, copied);
                Outcome::success(success_trace.clone())
            }
            None => Outcome::failure(missing_trace.clone()),
        }));
    }

    let assigned = value.clone();
    let name = format!("map.value[{}={}]", field, assigned);
    let success_trace = format!("[{}] -> Success", name);

    Ok(Expression::term(name, move |event| {
        event.set(&field, assigned.clone());
        Outcome::success(success_trace.clone())
    }))
}
