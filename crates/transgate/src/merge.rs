// Transgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Merging path and query parameters into the request JSON body

use crate::error::{BridgeError, BridgeResult};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Merge path and query parameters with an optional existing JSON body.
///
/// The body (when present and non-empty) is the merge base; path parameters
/// are inserted first, then query parameters, so a query parameter
/// overrides a path parameter of the same name. Parameter values are
/// inserted as strings; type coercion is the codec's job.
pub fn merge_parameters(
    path_params: &HashMap<String, String>,
    query_params: &HashMap<String, String>,
    body: Option<&[u8]>,
) -> BridgeResult<Value> {
    let mut object = decode_body_object(body)?;

    for (key, value) in path_params {
        insert_dotted(&mut object, key, value.clone())?;
    }
    for (key, value) in query_params {
        insert_dotted(&mut object, key, value.clone())?;
    }

    Ok(Value::Object(object))
}

/// Decode the existing body into the merge base object.
///
/// An absent or all-whitespace body yields an empty object. A body that is
/// not valid JSON, or valid JSON that is not an object, is a client error.
fn decode_body_object(body: Option<&[u8]>) -> BridgeResult<Map<String, Value>> {
    let Some(payload) = body else {
        return Ok(Map::new());
    };
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_slice(payload).map_err(|e| BridgeError::UnprocessableEntity {
        message: format!("request body is not valid JSON: {}", e),
    })?;

    match value {
        Value::Object(object) => Ok(object),
        other => Err(BridgeError::UnprocessableEntity {
            message: format!("request body must be a JSON object, got {}", json_type_name(&other)),
        }),
    }
}

/// Insert a value under a dotted key, creating nested objects as needed.
///
/// A prefix that already resolves to a non-object value is a merge
/// conflict between the body shape and the declared route parameters, and
/// is rejected as a client error.
fn insert_dotted(object: &mut Map<String, Value>, key: &str, value: String) -> BridgeResult<()> {
    let mut current = object;
    let mut segments = key.split('.').peekable();

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), Value::String(value));
            return Ok(());
        }

        let entry = current.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(nested) => nested,
            other => {
                return Err(BridgeError::UnprocessableEntity {
                    message: format!("parameter '{}' conflicts with existing {} value at '{}'", key, json_type_name(other), segment),
                });
            }
        };
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
