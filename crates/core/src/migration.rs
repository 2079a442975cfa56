//! Migration definitions and rollback derivation.

use std::fmt;
use std::sync::Arc;

use fieldmig_storage::StorageLocation;
use indexmap::IndexMap;
use serde_json::Value;

/// Name prefix reserved for derived rollback migrations.
pub const ROLLBACK_PREFIX: &str = "rollback_";

/// Converts a stored value into its migrated form.
pub type ValueTransformer = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Value transformers keyed by field storage name.
pub type Transformers = IndexMap<String, ValueTransformer>;

/// A described change from one field structure to another.
///
/// Built with the fluent setters below and treated as read-only once handed
/// to the migrator.
#[derive(Clone)]
pub struct Migration {
    name: String,
    description: String,
    old_fields: Option<Value>,
    new_fields: Option<Value>,
    name_changes: IndexMap<String, String>,
    storage_locations: Vec<Arc<dyn StorageLocation>>,
    transformers: Transformers,
    rollback_of: Option<String>,
}

impl Migration {
    pub fn new(name: impl Into<String>) -> Self {
        Migration {
            name: name.into(),
            description: String::new(),
            old_fields: None,
            new_fields: None,
            name_changes: IndexMap::new(),
            storage_locations: Vec::new(),
            transformers: IndexMap::new(),
            rollback_of: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The field structure data is currently stored under.
    pub fn before(mut self, fields: Value) -> Self {
        self.old_fields = Some(fields);
        self
    }

    /// The field structure data should end up under.
    pub fn after(mut self, fields: Value) -> Self {
        self.new_fields = Some(fields);
        self
    }

    /// Declare that the field stored as `old` (full or bare name) is now `new`.
    pub fn rename(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.name_changes.insert(old.into(), new.into());
        self
    }

    pub fn with_name_changes<I, K, V>(mut self, changes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.name_changes
            .extend(changes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn for_storage_location(mut self, location: Arc<dyn StorageLocation>) -> Self {
        self.storage_locations.push(location);
        self
    }

    pub fn storage_locations_from(mut self, locations: Vec<Arc<dyn StorageLocation>>) -> Self {
        self.storage_locations.extend(locations);
        self
    }

    /// Transform values of the field stored as `name` while migrating.
    pub fn transform_field_value<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.transformers.insert(name.into(), Arc::new(transform));
        self
    }

    pub fn with_transformer(mut self, name: impl Into<String>, transform: ValueTransformer) -> Self {
        self.transformers.insert(name.into(), transform);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn old_fields(&self) -> Option<&Value> {
        self.old_fields.as_ref()
    }

    pub fn new_fields(&self) -> Option<&Value> {
        self.new_fields.as_ref()
    }

    pub fn name_changes(&self) -> &IndexMap<String, String> {
        &self.name_changes
    }

    pub fn storage_locations(&self) -> &[Arc<dyn StorageLocation>] {
        &self.storage_locations
    }

    pub fn transformers(&self) -> &Transformers {
        &self.transformers
    }

    /// Name of the migration this one rolls back, if it is a rollback.
    pub fn rollback_of(&self) -> Option<&str> {
        self.rollback_of.as_deref()
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }

    /// Whether both field structures are present and non-empty.
    pub fn has_field_structures(&self) -> bool {
        fn present(value: Option<&Value>) -> bool {
            match value {
                None | Some(Value::Null) => false,
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Object(map)) => !map.is_empty(),
                Some(_) => true,
            }
        }
        present(self.old_fields.as_ref()) && present(self.new_fields.as_ref())
    }

    /// History name of the rollback of `name`.
    pub fn rollback_name(name: &str) -> String {
        format!("{ROLLBACK_PREFIX}{name}")
    }

    /// Derive the inverse migration: structures swapped, renames flipped,
    /// same storage locations. Value transformers are not invertible and
    /// are dropped.
    pub fn generate_rollback(&self) -> Migration {
        Migration {
            name: Self::rollback_name(&self.name),
            description: format!("Rollback of: {}", self.description),
            old_fields: self.new_fields.clone(),
            new_fields: self.old_fields.clone(),
            name_changes: self
                .name_changes
                .iter()
                .map(|(old, new)| (new.clone(), old.clone()))
                .collect(),
            storage_locations: self.storage_locations.clone(),
            transformers: IndexMap::new(),
            rollback_of: Some(self.name.clone()),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("old_fields", &self.old_fields)
            .field("new_fields", &self.new_fields)
            .field("name_changes", &self.name_changes)
            .field(
                "storage_locations",
                &self
                    .storage_locations
                    .iter()
                    .map(|s| s.storage_type().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("transformers", &self.transformers.keys().collect::<Vec<_>>())
            .field("rollback_of", &self.rollback_of)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldmig_storage::{MetaStorage, OptionsStorage};
    use serde_json::json;

    fn sample() -> Migration {
        Migration::new("rename_title")
            .with_description("Rename title to headline")
            .before(json!([{"key": "field_1", "name": "title"}]))
            .after(json!([{"key": "field_1", "name": "headline"}]))
            .rename("title", "headline")
            .for_storage_location(Arc::new(MetaStorage::posts()))
            .for_storage_location(Arc::new(OptionsStorage::new()))
            .transform_field_value("title", |v| v.clone())
    }

    #[test]
    fn rollback_swaps_structures_and_renames() {
        let migration = sample();
        let rollback = migration.generate_rollback();

        assert_eq!(rollback.name(), "rollback_rename_title");
        assert_eq!(rollback.description(), "Rollback of: Rename title to headline");
        assert_eq!(rollback.old_fields(), migration.new_fields());
        assert_eq!(rollback.new_fields(), migration.old_fields());
        assert_eq!(rollback.name_changes().get("headline").map(String::as_str), Some("title"));
        assert_eq!(rollback.storage_locations().len(), 2);
        assert!(rollback.transformers().is_empty());
        assert_eq!(rollback.rollback_of(), Some("rename_title"));
        assert!(!migration.is_rollback());
    }

    #[test]
    fn empty_structures_are_reported() {
        assert!(sample().has_field_structures());
        assert!(!Migration::new("x").has_field_structures());
        assert!(!Migration::new("x").before(json!([])).after(json!([{"key": "a", "name": "a"}])).has_field_structures());
    }

    #[test]
    fn debug_hides_closures() {
        let text = format!("{:?}", sample());
        assert!(text.contains("post_meta"));
        assert!(text.contains("\"title\""));
    }
}
