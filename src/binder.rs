//! Parameter binding.
//!
//! Turns a caller-supplied name/value map into the positional argument list
//! for one query definition. Only names on the definition's allow-list are
//! ever bound; everything else in the map is ignored. Values reach the
//! statement through bind slots, never through string interpolation.

use crate::catalog::QueryDefinition;
use crate::error::{DbExecError, Result};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Caller-supplied parameter values, keyed by name.
pub type ParameterMap = BTreeMap<String, String>;

/// Produces the arguments for `$1…$n` in `allowed_params` order.
pub fn bind_parameters(definition: &QueryDefinition, params: &ParameterMap) -> Result<Vec<String>> {
    definition
        .allowed_params
        .iter()
        .map(|name| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| DbExecError::MissingParameter {
                    query_id: definition.id.clone(),
                    name: name.clone(),
                })
        })
        .collect()
}

/// Parses a JSON object into a parameter map.
///
/// Strings are taken verbatim; numbers and booleans use their JSON text.
/// `null`, arrays and nested objects are rejected.
pub fn parse_params_json(input: &str) -> Result<ParameterMap> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(ParameterMap::new());
    }

    let value: JsonValue = serde_json::from_str(trimmed)
        .map_err(|e| DbExecError::config(format!("Failed to parse parameters: {e}")))?;

    let JsonValue::Object(object) = value else {
        return Err(DbExecError::config(
            "Failed to parse parameters: expected a JSON object",
        ));
    };

    object
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                JsonValue::String(s) => s,
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                other => {
                    return Err(DbExecError::config(format!(
                        "Parameter '{name}' must be a string, number or boolean, got {other}"
                    )))
                }
            };
            Ok((name, text))
        })
        .collect()
}

/// Parses a `name=value` pair. The value may itself contain `=`.
pub fn parse_param_pair(pair: &str) -> Result<(String, String)> {
    let (name, value) = pair
        .split_once('=')
        .ok_or_else(|| DbExecError::config(format!("Invalid parameter '{pair}': expected NAME=VALUE")))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(DbExecError::config(format!(
            "Invalid parameter '{pair}': empty name"
        )));
    }

    Ok((name.to_string(), value.to_string()))
}
