//! Settings access and schema validation.
//!
//! Plugin settings are dynamic JSON. Access goes through explicit typed
//! lookups with defaults instead of blind indexing, and every write is
//! checked against the plugin's declared schema first.

use serde_json::Value;

use crate::error::PluginError;

pub fn get_string<'a>(settings: &'a Value, key: &str) -> Option<&'a str> {
    settings.get(key).and_then(Value::as_str)
}

pub fn get_string_or<'a>(settings: &'a Value, key: &str, default: &'a str) -> &'a str {
    get_string(settings, key).unwrap_or(default)
}

pub fn get_int(settings: &Value, key: &str) -> Option<i64> {
    settings.get(key).and_then(Value::as_i64)
}

pub fn get_int_or(settings: &Value, key: &str, default: i64) -> i64 {
    get_int(settings, key).unwrap_or(default)
}

pub fn get_bool(settings: &Value, key: &str) -> Option<bool> {
    settings.get(key).and_then(Value::as_bool)
}

pub fn get_bool_or(settings: &Value, key: &str, default: bool) -> bool {
    get_bool(settings, key).unwrap_or(default)
}

/// Validate a settings object against a declared schema.
///
/// The schema format is a flat object: each key maps to
/// `{"type": "string"|"integer"|"boolean"|"object", "required": bool}`.
/// Unknown settings keys are allowed; wrong types and missing required
/// keys are not.
pub fn validate_settings(schema: &Value, settings: &Value) -> Result<(), PluginError> {
    let schema_obj = match schema.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };
    let settings_obj = settings
        .as_object()
        .ok_or_else(|| PluginError::Settings("settings must be a JSON object".into()))?;

    for (key, spec) in schema_obj {
        let required = spec.get("required").and_then(Value::as_bool).unwrap_or(false);
        let expected = spec.get("type").and_then(Value::as_str).unwrap_or("string");

        match settings_obj.get(key) {
            None | Some(Value::Null) => {
                if required {
                    return Err(PluginError::Settings(format!("missing field: {key}")));
                }
            }
            Some(value) => {
                let ok = match expected {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "boolean" => value.is_boolean(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !ok {
                    return Err(PluginError::Settings(format!(
                        "field {key} must be a {expected}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Per-plugin network timeout from settings, clamped to the allowed range.
pub fn fetch_timeout_secs(settings: &Value) -> u64 {
    get_int_or(settings, "timeout_seconds", 10).clamp(2, 15) as u64
}
