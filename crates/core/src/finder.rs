//! Migration files on disk.
//!
//! A migrations directory holds `*.json` and `*.toml` files whose names
//! start with a sortable timestamp (`2024_05_01_120000_rename_title.json`),
//! so file-name order is chronological order. Each file holds one
//! migration or a list of them:
//!
//! ```toml
//! name = "rename_title"
//! description = "Rename title to headline"
//! before = [{ key = "field_title", name = "title" }]
//! after = [{ key = "field_title", name = "headline" }]
//!
//! [transforms.price]
//! multiply = 100
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fieldmig_storage::value::as_f64;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::StorageLocationConfig;
use crate::error::MigrationError;
use crate::migration::{Migration, ValueTransformer};

/// The migrations defined by one file.
#[derive(Debug, Clone)]
pub enum MigrationEntry {
    Single(Migration),
    /// A file defining several migrations, run in order.
    Batch(Vec<Migration>),
}

impl MigrationEntry {
    pub fn migrations(&self) -> &[Migration] {
        match self {
            MigrationEntry::Single(migration) => std::slice::from_ref(migration),
            MigrationEntry::Batch(migrations) => migrations,
        }
    }
}

/// Declarative value transformation of a migration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformSpec {
    /// Replace values found in the table; others pass through.
    Map(Map<String, Value>),
    /// Scale numeric values; non-numeric values pass through.
    Multiply(f64),
}

impl TransformSpec {
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            TransformSpec::Map(table) => {
                let lookup = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                table.get(&lookup).cloned().unwrap_or_else(|| value.clone())
            }
            TransformSpec::Multiply(factor) => match as_f64(value) {
                Some(n) => number(n * factor),
                None => value.clone(),
            },
        }
    }

    fn into_transformer(self) -> ValueTransformer {
        Arc::new(move |value: &Value| self.apply(value))
    }
}

/// Whole numbers come back as integers.
fn number(n: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < MAX_EXACT {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrationDefinition {
    name: String,
    #[serde(default)]
    description: String,
    before: Value,
    after: Value,
    #[serde(default)]
    name_changes: IndexMap<String, String>,
    #[serde(default)]
    storage: Vec<StorageLocationConfig>,
    #[serde(default)]
    transforms: IndexMap<String, TransformSpec>,
}

impl MigrationDefinition {
    fn into_migration(self) -> Migration {
        let mut migration = Migration::new(self.name)
            .with_description(self.description)
            .before(self.before)
            .after(self.after)
            .with_name_changes(self.name_changes)
            .storage_locations_from(self.storage.iter().map(StorageLocationConfig::build).collect());
        for (field, spec) in self.transforms {
            migration = migration.with_transformer(field, spec.into_transformer());
        }
        migration
    }
}

// ── Finder ───────────────────────────────────────────────────────────────────

pub struct MigrationFinder {
    dir: PathBuf,
}

impl MigrationFinder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MigrationFinder { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every migration file in file-name order. Single migrations are keyed
    /// by migration name, lists by file stem.
    pub fn find_migrations(&self) -> Result<IndexMap<String, MigrationEntry>, MigrationError> {
        let mut entries = IndexMap::new();
        let mut seen = std::collections::HashSet::new();
        for path in self.migration_files()? {
            let entry = load_file(&path)?;
            for migration in entry.migrations() {
                if !seen.insert(migration.name().to_string()) {
                    return Err(file_error(
                        &path,
                        format!("duplicate migration name '{}'", migration.name()),
                    ));
                }
            }
            let key = match &entry {
                MigrationEntry::Single(migration) => migration.name().to_string(),
                MigrationEntry::Batch(_) => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            entries.insert(key, entry);
        }
        debug!(dir = %self.dir.display(), files = entries.len(), "discovered migrations");
        Ok(entries)
    }

    /// Look a migration up by name, including inside multi-migration files.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Migration>, MigrationError> {
        Ok(self
            .find_migrations()?
            .values()
            .flat_map(|entry| entry.migrations().iter())
            .find(|migration| migration.name() == name)
            .cloned())
    }

    fn migration_files(&self) -> Result<Vec<PathBuf>, MigrationError> {
        let read = std::fs::read_dir(&self.dir)
            .map_err(|e| file_error(&self.dir, format!("could not read directory: {e}")))?;
        let mut files = Vec::new();
        for entry in read {
            let path = entry
                .map_err(|e| file_error(&self.dir, format!("could not read directory: {e}")))?
                .path();
            let supported = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json") | Some("toml")
            );
            if supported && path.is_file() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }
}

fn file_error(path: &Path, message: impl Into<String>) -> MigrationError {
    MigrationError::MigrationFile {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn load_file(path: &Path) -> Result<MigrationEntry, MigrationError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| file_error(path, format!("could not read: {e}")))?;
    let document: Value = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        let table: toml::Value = toml::from_str(&content).map_err(|e| file_error(path, e.to_string()))?;
        serde_json::to_value(table).map_err(|e| file_error(path, e.to_string()))?
    } else {
        serde_json::from_str(&content).map_err(|e| file_error(path, e.to_string()))?
    };

    let parse = |value: Value| -> Result<Migration, MigrationError> {
        serde_json::from_value::<MigrationDefinition>(value)
            .map(MigrationDefinition::into_migration)
            .map_err(|e| file_error(path, e.to_string()))
    };
    let list = match document {
        Value::Array(items) => items,
        Value::Object(mut map) if map.contains_key("migrations") => match map.remove("migrations") {
            Some(Value::Array(items)) => items,
            _ => return Err(file_error(path, "'migrations' must be a list")),
        },
        single => return Ok(MigrationEntry::Single(parse(single)?)),
    };
    if list.is_empty() {
        return Err(file_error(path, "file defines no migrations"));
    }
    let migrations = list.into_iter().map(parse).collect::<Result<Vec<_>, _>>()?;
    Ok(MigrationEntry::Batch(migrations))
}

/// Create `{timestamp}_{name}.json` in `dir` with an empty migration.
pub fn write_stub(dir: &Path, name: &str, description: &str) -> Result<PathBuf, MigrationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(file_error(
            dir,
            format!("invalid migration name '{name}': use letters, digits, '_' and '-'"),
        ));
    }
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!("[year]_[month]_[day]_[hour][minute][second]"))
        .map_err(|e| file_error(dir, format!("timestamp formatting failed: {e}")))?;
    std::fs::create_dir_all(dir).map_err(|e| file_error(dir, format!("could not create directory: {e}")))?;

    let path = dir.join(format!("{stamp}_{name}.json"));
    let stub = json!({
        "name": name,
        "description": description,
        "before": [],
        "after": [],
        "name_changes": {},
    });
    let body = serde_json::to_string_pretty(&stub).map_err(|e| file_error(&path, e.to_string()))?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| file_error(&path, format!("could not create: {e}")))?;
    writeln!(file, "{body}").map_err(|e| file_error(&path, format!("could not write: {e}")))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn files_are_read_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "2024_02_01_000000_second.json",
            r#"{"name": "second", "before": [{"key": "field_a", "name": "a"}], "after": [{"key": "field_a", "name": "b"}]}"#,
        );
        write(
            dir.path(),
            "2024_01_01_000000_first.toml",
            r#"
            name = "first"
            before = [{ key = "field_x", name = "x" }]
            after = [{ key = "field_x", name = "y" }]
            "#,
        );
        write(dir.path(), "README.md", "ignored");

        let found = MigrationFinder::new(dir.path()).find_migrations().unwrap();
        let names: Vec<&str> = found.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn toml_list_becomes_a_batch() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "2024_03_01_000000_pair.toml",
            r#"
            [[migrations]]
            name = "one"
            before = [{ key = "field_1", name = "a" }]
            after = [{ key = "field_1", name = "b" }]

            [[migrations]]
            name = "two"
            before = [{ key = "field_2", name = "c" }]
            after = [{ key = "field_2", name = "d" }]
            name_changes = { c = "d" }
            "#,
        );
        let finder = MigrationFinder::new(dir.path());
        let found = finder.find_migrations().unwrap();
        let entry = &found["2024_03_01_000000_pair"];
        assert!(matches!(entry, MigrationEntry::Batch(list) if list.len() == 2));

        let two = finder.find_by_name("two").unwrap().unwrap();
        assert_eq!(two.name_changes().get("c").map(String::as_str), Some("d"));
        assert!(finder.find_by_name("three").unwrap().is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"name": "dup", "before": [], "after": []}"#;
        write(dir.path(), "a.json", body);
        write(dir.path(), "b.json", body);
        let err = MigrationFinder::new(dir.path()).find_migrations().unwrap_err();
        assert!(err.to_string().contains("duplicate migration name 'dup'"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", r#"{"name": "x", "before": [], "after": [], "oops": 1}"#);
        let err = MigrationFinder::new(dir.path()).find_migrations().unwrap_err();
        assert!(matches!(err, MigrationError::MigrationFile { .. }));
    }

    #[test]
    fn transforms_and_storage_are_built() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.json",
            r#"{
                "name": "prices",
                "before": [{"key": "field_p", "name": "price"}],
                "after": [{"key": "field_p", "name": "price"}],
                "storage": [{"type": "options", "prefix": ""}],
                "transforms": {"price": {"multiply": 2}, "status": {"map": {"draft": "pending"}}}
            }"#,
        );
        let migration = MigrationFinder::new(dir.path()).find_by_name("prices").unwrap().unwrap();
        assert_eq!(migration.storage_locations()[0].storage_type(), "options");
        let double = &migration.transformers()["price"];
        assert_eq!(double(&json!("21")), json!(42));
        assert_eq!(double(&json!(1.25)), json!(2.5));
        assert_eq!(double(&json!("n/a")), json!("n/a"));
        let status = &migration.transformers()["status"];
        assert_eq!(status(&json!("draft")), json!("pending"));
        assert_eq!(status(&json!("publish")), json!("publish"));
    }

    #[test]
    fn stubs_are_timestamped_and_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stub(dir.path(), "rename_title", "Rename title").unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.ends_with("_rename_title.json"));
        assert_eq!(file_name.len(), "2024_01_01_000000_rename_title.json".len());

        let stub: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stub["name"], "rename_title");
        assert_eq!(stub["before"], json!([]));

        assert!(write_stub(dir.path(), "bad name", "").is_err());
    }
}
