//! Meta tables: one row per (object, key, value) triple.
//!
//! Posts, terms and users share the same shape and differ only in the table
//! they live in and the column naming the owning object.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::database::{validate_identifier, StorageScope};
use crate::error::StorageError;
use crate::record::FoundField;
use crate::traits::{like_escape, logical_name, storage_name, FieldPattern, StorageLocation, ValueUpdate};
use crate::value;

#[derive(Debug, Clone)]
pub struct MetaStorage {
    storage_type: &'static str,
    table: &'static str,
    id_column: &'static str,
    object_column: &'static str,
    /// Users are shared by every site of a network.
    network: bool,
    prefix: Option<String>,
}

impl MetaStorage {
    /// Values attached to posts (`postmeta`).
    pub fn posts() -> Self {
        MetaStorage {
            storage_type: "post_meta",
            table: "postmeta",
            id_column: "meta_id",
            object_column: "post_id",
            network: false,
            prefix: None,
        }
    }

    /// Values attached to taxonomy terms (`termmeta`).
    pub fn terms() -> Self {
        MetaStorage {
            storage_type: "term_meta",
            table: "termmeta",
            id_column: "meta_id",
            object_column: "term_id",
            network: false,
            prefix: None,
        }
    }

    /// Values attached to users (network-wide `usermeta`).
    pub fn users() -> Self {
        MetaStorage {
            storage_type: "user_meta",
            table: "usermeta",
            id_column: "umeta_id",
            object_column: "user_id",
            network: true,
            prefix: None,
        }
    }

    /// Namespace every field name with `{prefix}_`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Attach a value to an object, like `add_post_meta`. Returns the new row id.
    pub fn insert(
        &self,
        scope: &StorageScope<'_>,
        object_id: i64,
        name: &str,
        value: &Value,
        is_key_ref: bool,
    ) -> Result<i64, StorageError> {
        let table = self.table_name(scope)?;
        scope.conn().execute(
            &format!(
                "INSERT INTO {table} ({}, meta_key, meta_value) VALUES (?1, ?2, ?3)",
                self.object_column
            ),
            params![
                object_id,
                storage_name(self.prefix(), name, is_key_ref),
                value::encode(value)?
            ],
        )?;
        Ok(scope.conn().last_insert_rowid())
    }

    /// Every value stored under `name`, with the owning object id, in row order.
    pub fn values(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
    ) -> Result<Vec<(i64, Value)>, StorageError> {
        let table = self.table_name(scope)?;
        let mut stmt = scope.conn().prepare(&format!(
            "SELECT {}, meta_value FROM {table} WHERE meta_key = ?1 ORDER BY {}",
            self.object_column, self.id_column
        ))?;
        let rows = stmt.query_map(params![storage_name(self.prefix(), name, is_key_ref)], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (object_id, raw) = row?;
            out.push((object_id, value::decode(raw)));
        }
        Ok(out)
    }

    fn table_name(&self, scope: &StorageScope<'_>) -> Result<String, StorageError> {
        let site = scope.site();
        let table = if self.network {
            site.network_table(self.table)
        } else {
            site.table(self.table)
        };
        validate_identifier(&table)?;
        Ok(table)
    }

    fn count(&self, scope: &StorageScope<'_>, key: &str) -> Result<usize, StorageError> {
        let table = self.table_name(scope)?;
        let count: i64 = scope.conn().query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE meta_key = ?1"),
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl StorageLocation for MetaStorage {
    fn storage_type(&self) -> &str {
        self.storage_type
    }

    fn read(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
        match_value: Option<&Value>,
    ) -> Result<Option<Value>, StorageError> {
        let table = self.table_name(scope)?;
        let key = storage_name(self.prefix(), name, is_key_ref);
        let raw: Option<Option<String>> = match match_value {
            Some(expected) => scope
                .conn()
                .query_row(
                    &format!(
                        "SELECT meta_value FROM {table} WHERE meta_key = ?1 AND meta_value = ?2 ORDER BY {} LIMIT 1",
                        self.id_column
                    ),
                    params![key, value::encode(expected)?],
                    |row| row.get(0),
                )
                .optional()?,
            None => scope
                .conn()
                .query_row(
                    &format!(
                        "SELECT meta_value FROM {table} WHERE meta_key = ?1 ORDER BY {} LIMIT 1",
                        self.id_column
                    ),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(raw.map(value::decode))
    }

    fn update(
        &self,
        scope: &StorageScope<'_>,
        old_name: &str,
        new_name: &str,
        update: ValueUpdate<'_>,
        is_key_ref: bool,
    ) -> Result<usize, StorageError> {
        let old_key = storage_name(self.prefix(), old_name, is_key_ref);
        let new_key = storage_name(self.prefix(), new_name, is_key_ref);
        if scope.is_dry_run() {
            return self.count(scope, &old_key);
        }
        let table = self.table_name(scope)?;
        let conn = scope.conn();
        let affected = match update {
            ValueUpdate::Keep => conn.execute(
                &format!("UPDATE {table} SET meta_key = ?1 WHERE meta_key = ?2"),
                params![new_key, old_key],
            )?,
            ValueUpdate::Set(new_value) => conn.execute(
                &format!("UPDATE {table} SET meta_key = ?1, meta_value = ?2 WHERE meta_key = ?3"),
                params![new_key, value::encode(new_value)?, old_key],
            )?,
            ValueUpdate::Transform(_) => {
                let mut select = conn.prepare(&format!(
                    "SELECT {}, meta_value FROM {table} WHERE meta_key = ?1 ORDER BY {}",
                    self.id_column, self.id_column
                ))?;
                let rows = select
                    .query_map(params![old_key], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                let mut write = conn.prepare(&format!(
                    "UPDATE {table} SET meta_key = ?1, meta_value = ?2 WHERE {} = ?3",
                    self.id_column
                ))?;
                for (id, raw) in &rows {
                    let updated = update.apply(&value::decode(raw.clone()));
                    write.execute(params![new_key, value::encode(&updated)?, id])?;
                }
                rows.len()
            }
        };
        Ok(affected)
    }

    fn delete(
        &self,
        scope: &StorageScope<'_>,
        name: &str,
        is_key_ref: bool,
    ) -> Result<usize, StorageError> {
        let key = storage_name(self.prefix(), name, is_key_ref);
        if scope.is_dry_run() {
            return self.count(scope, &key);
        }
        let table = self.table_name(scope)?;
        Ok(scope.conn().execute(
            &format!("DELETE FROM {table} WHERE meta_key = ?1"),
            params![key],
        )?)
    }

    fn find_fields(
        &self,
        scope: &StorageScope<'_>,
        pattern: &FieldPattern,
    ) -> Result<Vec<FoundField>, StorageError> {
        let table = self.table_name(scope)?;
        let like = format!(
            "{}%",
            like_escape(&storage_name(self.prefix(), &pattern.prefix(), false))
        );
        let mut stmt = scope.conn().prepare(&format!(
            "SELECT meta_key, COUNT(*) FROM {table} WHERE meta_key LIKE ?1 ESCAPE '\\' \
             GROUP BY meta_key ORDER BY MIN({})",
            self.id_column
        ))?;
        let rows = stmt.query_map(params![like], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut found = Vec::new();
        for row in rows {
            let (key, count) = row?;
            if let Some(name) = logical_name(self.prefix(), &key) {
                if pattern.matches(name) {
                    found.push(FoundField {
                        name: name.to_string(),
                        rows: count as usize,
                    });
                }
            }
        }
        Ok(found)
    }
}
