//! Conversion between field values and the text column they are stored in.
//!
//! Strings are stored verbatim. Arrays and objects are stored as JSON,
//! scalars as their textual form. Reading only decodes text that parses as
//! a JSON array or object; anything else comes back as a string, the same
//! way the CMS hands raw meta values back to callers.

use serde_json::Value;

use crate::error::StorageError;

/// Encode a value for a `meta_value` / `option_value` column.
pub fn encode(value: &Value) -> Result<String, StorageError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(if *b { "1".to_string() } else { String::new() }),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => Ok(serde_json::to_string(value)?),
    }
}

/// Decode a stored column value.
pub fn decode(raw: Option<String>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value @ (Value::Array(_) | Value::Object(_))) = serde_json::from_str(&raw) {
            return value;
        }
    }
    Value::String(raw)
}

/// Interpret a value as a number for transformations working on numeric text.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_stored_verbatim() {
        assert_eq!(encode(&json!("field_abc")).unwrap(), "field_abc");
        assert_eq!(decode(Some("field_abc".into())), json!("field_abc"));
    }

    #[test]
    fn structured_values_round_trip_as_json() {
        let value = json!({"street": "Main", "no": [1, 2]});
        let stored = encode(&value).unwrap();
        assert_eq!(decode(Some(stored)), value);
    }

    #[test]
    fn scalars_come_back_as_text() {
        assert_eq!(encode(&json!(42)).unwrap(), "42");
        assert_eq!(decode(Some("42".into())), json!("42"));
        assert_eq!(encode(&json!(true)).unwrap(), "1");
        assert_eq!(encode(&Value::Null).unwrap(), "");
    }

    #[test]
    fn broken_json_is_plain_text() {
        assert_eq!(decode(Some("[not json".into())), json!("[not json"));
        assert_eq!(decode(None), Value::Null);
    }

    #[test]
    fn numeric_text_is_numeric() {
        assert_eq!(as_f64(&json!("12.5")), Some(12.5));
        assert_eq!(as_f64(&json!(3)), Some(3.0));
        assert_eq!(as_f64(&json!("abc")), None);
    }
}
