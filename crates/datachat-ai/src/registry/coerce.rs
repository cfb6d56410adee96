//! Argument coercion between the JSON the model produced and the kinds
//! a tool declared. Models frequently stringify numbers, booleans, and
//! whole arrays; handlers should not have to care.

use serde_json::Value;

use datachat_common::ToolError;

use crate::ParamKind;

pub(crate) fn coerce(name: &str, value: Value, kind: ParamKind) -> Result<Value, ToolError> {
    match kind {
        ParamKind::String => coerce_string(name, value),
        ParamKind::Integer => coerce_integer(name, value),
        ParamKind::Boolean => coerce_boolean(name, value),
        ParamKind::Array => coerce_array(name, value),
        ParamKind::Object => coerce_object(name, value),
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ToolError {
    ToolError::InvalidArgument {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn coerce_string(name: &str, value: Value) -> Result<Value, ToolError> {
    match value {
        Value::String(_) => Ok(value),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(invalid(name, format!("expected string, got {other}"))),
    }
}

fn coerce_integer(name: &str, value: Value) -> Result<Value, ToolError> {
    match value {
        Value::Number(ref n) => {
            if n.is_i64() || n.is_u64() {
                Ok(value)
            } else if let Some(f) = n.as_f64() {
                // Integral floats narrow to i64; anything fractional is an error.
                if f.fract() == 0.0 {
                    Ok(Value::from(f as i64))
                } else {
                    Err(invalid(name, format!("expected integer, got {f}")))
                }
            } else {
                Err(invalid(name, "expected integer"))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(name, format!("expected integer, got \"{s}\""))),
        other => Err(invalid(name, format!("expected integer, got {other}"))),
    }
}

fn coerce_boolean(name: &str, value: Value) -> Result<Value, ToolError> {
    match value {
        Value::Bool(_) => Ok(value),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if s.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Err(invalid(name, format!("expected boolean, got \"{s}\"")))
            }
        }
        other => Err(invalid(name, format!("expected boolean, got {other}"))),
    }
}

fn coerce_array(name: &str, value: Value) -> Result<Value, ToolError> {
    match value {
        Value::Array(_) => Ok(value),
        // A JSON-array-encoded string becomes the array it encodes.
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ Value::Array(_)) => Ok(parsed),
            _ => Err(invalid(name, format!("expected array, got \"{s}\""))),
        },
        other => Err(invalid(name, format!("expected array, got {other}"))),
    }
}

fn coerce_object(name: &str, value: Value) -> Result<Value, ToolError> {
    match value {
        Value::Object(_) => Ok(value),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            _ => Err(invalid(name, format!("expected object, got \"{s}\""))),
        },
        other => Err(invalid(name, format!("expected object, got {other}"))),
    }
}
