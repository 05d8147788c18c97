//! Type coercion toward schema types. Each function is total: it either
//! produces a value of the target type or reports why it could not.

use crate::reorg::value::{Document, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot coerce {found} `{raw}` to {target}")]
pub struct CoercionError {
    pub target: &'static str,
    pub found: &'static str,
    pub raw: String,
}

fn fail(target: &'static str, value: &Value) -> CoercionError {
    CoercionError {
        target,
        found: value.type_name(),
        raw: crate::reorg::util::truncate_with_ellipsis(&value.key_string(), 40),
    }
}

/// Accepts floats, ints and numeric strings such as `"$1,299.00"`. Text that
/// parses to NaN or infinity is rejected.
pub fn to_float(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::Float(_) => Ok(value.clone()),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::String(s) => {
            let cleaned = s
                .trim()
                .trim_start_matches(['$', '€', '£'])
                .replace(',', "");
            cleaned
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| fail("float", value))
        }
        _ => Err(fail("float", value)),
    }
}

pub fn to_int(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::Int(_) => Ok(value.clone()),
        // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
        Value::Float(f)
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
        {
            Ok(Value::Int(*f as i64))
        }
        Value::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| fail("int", value)),
        _ => Err(fail("int", value)),
    }
}

pub fn to_bool(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" | "y" => Ok(Value::Bool(true)),
            "false" | "no" | "0" | "off" | "n" | "" => Ok(Value::Bool(false)),
            _ => Err(fail("bool", value)),
        },
        _ => Err(fail("bool", value)),
    }
}

/// Comma-separated strings split into trimmed, non-empty items.
pub fn to_list(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::List(_) => Ok(value.clone()),
        Value::String(s) => Ok(Value::List(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Value::from)
                .collect(),
        )),
        _ => Err(fail("list", value)),
    }
}

/// Coerce toward the first acceptable type that can take the value. A value
/// already matching one of `types` is returned untouched.
pub fn coerce_for(types: &[String], value: &Value) -> Result<Value, CoercionError> {
    if types.iter().any(|t| type_matches(t, value)) {
        return Ok(value.clone());
    }

    let mut last_err = None;
    for target in types {
        let attempt = match target.as_str() {
            "float" | "number" => to_float(value),
            "int" => to_int(value),
            "bool" => to_bool(value),
            "list" => to_list(value),
            _ => continue,
        };
        match attempt {
            Ok(v) => return Ok(v),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| fail("schema type", value)))
}

pub fn type_matches(type_name: &str, value: &Value) -> bool {
    match type_name {
        "any" => true,
        "number" => matches!(value, Value::Int(_) | Value::Float(_)),
        other => value.type_name() == other,
    }
}

/// `(target, source, factor)`: fill `target` from `source * factor` when the
/// target is missing.
pub const UNIT_SYNTHESIS: &[(&str, &str, f64)] = &[
    ("ram_gb", "ram_mb", 1.0 / 1024.0),
    ("storage_gb", "storage_mb", 1.0 / 1024.0),
    ("storage_gb", "storage_tb", 1024.0),
    ("bandwidth_gb", "bandwidth_tb", 1024.0),
    ("bandwidth_gb", "bandwidth_mb", 1.0 / 1024.0),
];

/// Synthesize missing numeric specs from alternate unit fields. Returns the
/// names of the fields that were filled.
pub fn synthesize_units(doc: &mut Document) -> Vec<String> {
    let mut filled = Vec::new();
    for (target, source, factor) in UNIT_SYNTHESIS {
        if doc.get(*target).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let Some(Value::Float(raw)) = doc.get(*source).and_then(|v| to_float(v).ok()) else {
            continue;
        };
        let scaled = (raw * factor * 100.0).round() / 100.0;
        doc.insert((*target).to_string(), Value::Float(scaled));
        filled.push((*target).to_string());
    }
    filled
}
