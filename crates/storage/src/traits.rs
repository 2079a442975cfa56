use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde_json::Value;

use crate::database::StorageScope;
use crate::error::StorageError;
use crate::record::FoundField;

/// Prefix marking the key-reference record of a field (`_title` points at
/// the definition key of the value stored under `title`).
pub const KEY_REF_PREFIX: &str = "_";

/// How `update` should produce the value written under the new name.
#[derive(Clone, Copy)]
pub enum ValueUpdate<'a> {
    /// Rename only; every row keeps its own value.
    Keep,
    /// Replace every row's value.
    Set(&'a Value),
    /// Replace every row's value with the transformation of its current value.
    Transform(&'a dyn Fn(&Value) -> Value),
}

impl ValueUpdate<'_> {
    /// The value to write for a row currently holding `current`.
    pub fn apply(&self, current: &Value) -> Value {
        match self {
            ValueUpdate::Keep => current.clone(),
            ValueUpdate::Set(value) => (*value).clone(),
            ValueUpdate::Transform(f) => f(current),
        }
    }
}

impl fmt::Debug for ValueUpdate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueUpdate::Keep => f.write_str("Keep"),
            ValueUpdate::Set(value) => f.debug_tuple("Set").field(value).finish(),
            ValueUpdate::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Pattern matching the materialized rows of a repeating structure:
/// `{base}{sep}{index}` and `{base}{sep}{index}{sep}{rest}`.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    base: String,
    separator: String,
    regex: Regex,
}

impl FieldPattern {
    pub fn indexed(base: &str, separator: &str) -> Result<Self, StorageError> {
        let sep = regex::escape(separator);
        let regex = Regex::new(&format!(r"^{}{sep}\d+(?:{sep}.+)?$", regex::escape(base)))
            .map_err(|e| StorageError::Backend(format!("invalid field pattern: {e}")))?;
        Ok(FieldPattern {
            base: base.to_string(),
            separator: separator.to_string(),
            regex,
        })
    }

    /// Literal prefix every match starts with, used to prefilter in SQL.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.base, self.separator)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` clause.
pub fn like_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Where a field definition key moved to, for structural rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTarget {
    pub old_name: String,
    pub new_key: String,
    pub new_name: String,
}

/// Everything a structural (non key/value) backend needs to rewrite
/// embedded field data for one migration.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedRewrite {
    /// Old definition key → its new key and storage names.
    pub keys: BTreeMap<String, KeyTarget>,
    /// Repeating structures whose base name changed (old base, new base).
    pub prefix_renames: Vec<(String, String)>,
    pub separator: String,
}

impl EmbeddedRewrite {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefix_renames.is_empty()
    }
}

/// A backend persisting field values and key references.
///
/// Names passed in are logical field names; each backend applies its own
/// naming convention (namespace prefixes, key-reference marker). In
/// dry-run scopes `update` and `delete` must not write anything but still
/// return the number of rows a real call would have touched.
pub trait StorageLocation {
    /// Label used to aggregate results ("post_meta", "options", ...).
    fn storage_type(&self) -> &str;

    /// Read the first value stored under `name`, optionally requiring it to
    /// equal `match_value`.
    fn read(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
        match_value: Option<&Value>,
    ) -> Result<Option<Value>, StorageError>;

    /// Move every row stored under `old_name` to `new_name`, writing the
    /// value produced by `value`. Returns the number of affected rows.
    fn update(
        &self,
        scope: &StorageScope<'_>,
        old_name: &str,
        new_name: &str,
        value: ValueUpdate<'_>,
        is_key_ref: bool,
    ) -> Result<usize, StorageError>;

    /// Delete every row stored under `name`. Returns the number of affected rows.
    fn delete(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
    ) -> Result<usize, StorageError>;

    /// Find the distinct value records whose logical name matches `pattern`.
    fn find_fields(
        &self,
        scope: &StorageScope<'_>,
        pattern: &FieldPattern,
    ) -> Result<Vec<FoundField>, StorageError>;

    /// Bulk structural rewrite for backends that embed field data in
    /// larger documents. Returns the number of rewritten documents or
    /// blocks; key/value backends have nothing to do here.
    fn rewrite_embedded(
        &self,
        _scope: &StorageScope<'_>,
        _rewrite: &EmbeddedRewrite,
    ) -> Result<usize, StorageError> {
        Ok(0)
    }
}

/// Physical storage name: `[_][{prefix}_]{name}`.
pub(crate) fn storage_name(prefix: Option<&str>, name: &str, is_key_ref: bool) -> String {
    let marker = if is_key_ref { KEY_REF_PREFIX } else { "" };
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{marker}{prefix}_{name}"),
        _ => format!("{marker}{name}"),
    }
}

/// Strip the namespace prefix from a physical value-record name.
pub(crate) fn logical_name<'n>(prefix: Option<&str>, physical: &'n str) -> Option<&'n str> {
    match prefix {
        Some(prefix) if !prefix.is_empty() => physical
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_')),
        _ => Some(physical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indexed_pattern_matches_rows_and_leaves() {
        let pattern = FieldPattern::indexed("team", "_").unwrap();
        assert!(pattern.matches("team_0"));
        assert!(pattern.matches("team_12_member"));
        assert!(pattern.matches("team_1_skills_0_name"));
        assert!(!pattern.matches("team_other"));
        assert!(!pattern.matches("team"));
        assert!(!pattern.matches("teams_0"));
        assert!(!pattern.matches("_team_0_member"));
        assert_eq!(pattern.prefix(), "team_");
    }

    #[test]
    fn pattern_escapes_regex_metacharacters() {
        let pattern = FieldPattern::indexed("a.b", "_").unwrap();
        assert!(pattern.matches("a.b_0"));
        assert!(!pattern.matches("axb_0"));
    }

    #[test]
    fn like_escape_escapes_wildcards() {
        assert_eq!(like_escape("team_"), "team\\_");
        assert_eq!(like_escape("50%"), "50\\%");
    }

    #[test]
    fn storage_names_follow_convention() {
        assert_eq!(storage_name(None, "title", false), "title");
        assert_eq!(storage_name(None, "title", true), "_title");
        assert_eq!(storage_name(Some("options"), "title", true), "_options_title");
        assert_eq!(logical_name(Some("options"), "options_title"), Some("title"));
        assert_eq!(logical_name(Some("options"), "other_title"), None);
    }

    #[test]
    fn value_update_apply() {
        let doubled = |v: &Value| json!(v.as_i64().unwrap_or(0) * 2);
        assert_eq!(ValueUpdate::Keep.apply(&json!(2)), json!(2));
        assert_eq!(ValueUpdate::Set(&json!("k")).apply(&json!(2)), json!("k"));
        assert_eq!(ValueUpdate::Transform(&doubled).apply(&json!(2)), json!(4));
    }
}
