use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::{CollectionResolver, FieldTypeResolver, ResolveContext};
use crate::error::ResolveError;
use crate::field::DEFAULT_FIELD_TYPE;

/// A field group: `{"key": "group_…", "title": …, "fields": [...]}`.
pub struct FieldGroupResolver;

impl CollectionResolver for FieldGroupResolver {
    fn supports(&self, input: &Value) -> bool {
        input.get("fields").is_some_and(Value::is_array)
    }

    fn resolve(&self, input: &Value) -> Result<Vec<Value>, ResolveError> {
        Ok(input
            .get("fields")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// A plain array of field definitions.
pub struct DefaultFieldCollectionResolver;

impl CollectionResolver for DefaultFieldCollectionResolver {
    fn supports(&self, input: &Value) -> bool {
        input.is_array()
    }

    fn resolve(&self, input: &Value) -> Result<Vec<Value>, ResolveError> {
        Ok(input.as_array().cloned().unwrap_or_default())
    }
}

/// An already canonical definition carrying `key` and `name`.
pub struct DefaultFieldResolver;

impl FieldTypeResolver for DefaultFieldResolver {
    fn supports(&self, input: &Value) -> bool {
        input.get("key").is_some_and(Value::is_string) && input.get("name").is_some_and(Value::is_string)
    }

    fn resolve(
        &self,
        input: &Value,
        _ctx: &mut ResolveContext,
    ) -> Result<Map<String, Value>, ResolveError> {
        let mut map = input.as_object().cloned().unwrap_or_default();
        ensure_type(&mut map);
        Ok(map)
    }
}

/// A builder-style definition without a key: `{"label": "Team Member", "type": "text"}`.
///
/// The name defaults to the snake-cased label; the key is derived from the
/// parent key and the name so the same structure always resolves to the
/// same keys.
pub struct BuilderFieldResolver;

impl FieldTypeResolver for BuilderFieldResolver {
    fn supports(&self, input: &Value) -> bool {
        input.is_object()
            && input.get("key").is_none()
            && (input.get("name").is_some_and(Value::is_string)
                || input.get("label").is_some_and(Value::is_string))
    }

    fn resolve(
        &self,
        input: &Value,
        ctx: &mut ResolveContext,
    ) -> Result<Map<String, Value>, ResolveError> {
        let mut map = input.as_object().cloned().unwrap_or_default();
        let name = match map.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => snake_case(map.get("label").and_then(Value::as_str).unwrap_or_default()),
        };
        if name.is_empty() {
            return Err(ResolveError::MissingIdentity("name"));
        }
        let key = derive_field_key(ctx.parent_key(), &name);
        map.insert("name".to_string(), Value::String(name));
        map.insert("key".to_string(), Value::String(key));
        ensure_type(&mut map);
        Ok(map)
    }
}

fn ensure_type(map: &mut Map<String, Value>) {
    if !map.get("type").is_some_and(Value::is_string) {
        map.insert("type".to_string(), Value::String(DEFAULT_FIELD_TYPE.to_string()));
    }
}

/// `"Team Member!"` → `"team_member"`.
pub fn snake_case(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Stable key for a field without one: `field_` + 13 hex digits of
/// SHA-256 over `{parent_key}_{name}`.
pub fn derive_field_key(parent_key: Option<&str>, name: &str) -> String {
    let seed = match parent_key {
        Some(parent) => format!("{parent}_{name}"),
        None => name.to_string(),
    };
    let digest = Sha256::digest(seed.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("field_{}", &hex[..13])
}
