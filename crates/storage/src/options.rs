//! Site-wide settings stored in the `options` table, one row per name.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::database::{validate_identifier, StorageScope};
use crate::error::StorageError;
use crate::record::FoundField;
use crate::traits::{like_escape, logical_name, storage_name, FieldPattern, StorageLocation, ValueUpdate};
use crate::value;

/// Namespace used for option pages unless configured otherwise.
pub const DEFAULT_OPTIONS_PREFIX: &str = "options";

#[derive(Debug, Clone)]
pub struct OptionsStorage {
    prefix: Option<String>,
}

impl Default for OptionsStorage {
    fn default() -> Self {
        OptionsStorage {
            prefix: Some(DEFAULT_OPTIONS_PREFIX.to_string()),
        }
    }
}

impl OptionsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `prefix` as namespace; an empty prefix stores names unprefixed.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        OptionsStorage {
            prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Create or replace an option, like `update_option`.
    pub fn insert(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        value: &Value,
        is_key_ref: bool,
    ) -> Result<(), StorageError> {
        let table = table_name(scope)?;
        scope.conn().execute(
            &format!(
                "INSERT INTO {table} (option_name, option_value) VALUES (?1, ?2)
                 ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value"
            ),
            params![storage_name(self.prefix(), name, is_key_ref), value::encode(value)?],
        )?;
        Ok(())
    }

    fn raw(&self, scope: &StorageScope<'_>, option: &str) -> Result<Option<String>, StorageError> {
        let table = table_name(scope)?;
        Ok(scope
            .conn()
            .query_row(
                &format!("SELECT option_value FROM {table} WHERE option_name = ?1"),
                params![option],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn table_name(scope: &StorageScope<'_>) -> Result<String, StorageError> {
    let table = scope.site().table("options");
    validate_identifier(&table)?;
    Ok(table)
}

impl StorageLocation for OptionsStorage {
    fn storage_type(&self) -> &str {
        "options"
    }

    fn read(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
        match_value: Option<&Value>,
    ) -> Result<Option<Value>, StorageError> {
        let Some(raw) = self.raw(scope, &storage_name(self.prefix(), name, is_key_ref))? else {
            return Ok(None);
        };
        if let Some(expected) = match_value {
            if raw != value::encode(expected)? {
                return Ok(None);
            }
        }
        Ok(Some(value::decode(Some(raw))))
    }

    fn update(
        &self,
        scope: &StorageScope<'_>,
        old_name: &str,
        new_name: &str,
        update: ValueUpdate<'_>,
        is_key_ref: bool,
    ) -> Result<usize, StorageError> {
        let old_option = storage_name(self.prefix(), old_name, is_key_ref);
        let new_option = storage_name(self.prefix(), new_name, is_key_ref);
        let Some(current) = self.raw(scope, &old_option)? else {
            return Ok(0);
        };
        if scope.is_dry_run() {
            return Ok(1);
        }
        let stored = match update {
            ValueUpdate::Keep => current,
            other => value::encode(&other.apply(&value::decode(Some(current))))?,
        };
        let table = table_name(scope)?;
        let conn = scope.conn();
        if old_option != new_option {
            conn.execute(
                &format!("DELETE FROM {table} WHERE option_name = ?1"),
                params![new_option],
            )?;
        }
        Ok(conn.execute(
            &format!("UPDATE {table} SET option_name = ?1, option_value = ?2 WHERE option_name = ?3"),
            params![new_option, stored, old_option],
        )?)
    }

    fn delete(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
    ) -> Result<usize, StorageError> {
        let option = storage_name(self.prefix(), name, is_key_ref);
        if scope.is_dry_run() {
            return Ok(usize::from(self.raw(scope, &option)?.is_some()));
        }
        let table = table_name(scope)?;
        Ok(scope.conn().execute(
            &format!("DELETE FROM {table} WHERE option_name = ?1"),
            params![option],
        )?)
    }

    fn find_fields(
        &self,
        scope: &StorageScope<'_>,
        pattern: &FieldPattern,
    ) -> Result<Vec<FoundField>, StorageError> {
        let table = table_name(scope)?;
        let like = format!(
            "{}%",
            like_escape(&storage_name(self.prefix(), &pattern.prefix(), false))
        );
        let mut stmt = scope.conn().prepare(&format!(
            "SELECT option_name FROM {table} WHERE option_name LIKE ?1 ESCAPE '\\' ORDER BY option_id"
        ))?;
        let rows = stmt.query_map(params![like], |row| row.get::<_, String>(0))?;
        let mut found = Vec::new();
        for row in rows {
            let option = row?;
            if let Some(name) = logical_name(self.prefix(), &option) {
                if pattern.matches(name) {
                    found.push(FoundField {
                        name: name.to_string(),
                        rows: 1,
                    });
                }
            }
        }
        Ok(found)
    }
}
