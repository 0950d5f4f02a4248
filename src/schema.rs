//! Validation of tool arguments against their JSON input schema.
//!
//! Only the subset of JSON Schema used by the tool catalog is understood:
//! `type`, `properties`, `required`, `enum`, `minimum`, `maximum`,
//! `minLength`, `maxLength` and `additionalProperties: false`.
//!
//! [`validate`] never stops at the first problem: it returns every violated
//! constraint so the caller can fix all of them in one round trip.

use serde_json::{Map, Value};

/// Check `obj` against `schema`, returning all violations (empty = valid).
pub fn validate(schema: &Value, obj: &Map<String, Value>) -> Vec<String> {
    let mut violations = Vec::new();

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if obj.get(key).map_or(true, Value::is_null) {
                violations.push(format!("{key}: is required"));
            }
        }
    }

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in obj {
        if value.is_null() {
            continue;
        }
        match properties.and_then(|p| p.get(key)) {
            Some(prop) => check_property(key, prop, value, &mut violations),
            None if closed => violations.push(format!("{key}: unknown parameter")),
            None => {}
        }
    }

    violations
}

fn check_property(key: &str, prop: &Value, value: &Value, violations: &mut Vec<String>) {
    if let Some(expected) = prop.get("type").and_then(Value::as_str) {
        if !matches_type(expected, value) {
            violations.push(format!(
                "{key}: expected {expected}, got {}",
                type_name(value)
            ));
            return;
        }
    }

    if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let choices: Vec<String> = allowed.iter().map(render).collect();
            violations.push(format!(
                "{key}: must be one of {}, got {}",
                choices.join(", "),
                render(value)
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = prop.get("minimum").and_then(Value::as_f64) {
            if n < min {
                violations.push(format!(
                    "{key}: must be at least {}, got {}",
                    render_num(min),
                    render(value)
                ));
            }
        }
        if let Some(max) = prop.get("maximum").and_then(Value::as_f64) {
            if n > max {
                violations.push(format!(
                    "{key}: must be at most {}, got {}",
                    render_num(max),
                    render(value)
                ));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count();
        if let Some(min) = prop.get("minLength").and_then(Value::as_u64) {
            if (len as u64) < min {
                violations.push(format!("{key}: must be at least {min} characters"));
            }
        }
        if let Some(max) = prop.get("maxLength").and_then(Value::as_u64) {
            if (len as u64) > max {
                violations.push(format!(
                    "{key}: must be at most {max} characters, got {len}"
                ));
            }
        }
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}

fn render_num(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Arguments as an object map; `null` counts as no arguments.
pub fn to_object(args: &Value) -> Result<Map<String, Value>, String> {
    match args {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(format!(
            "arguments must be an object, got {}",
            type_name(other)
        )),
    }
}
