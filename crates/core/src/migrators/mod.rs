//! Per-field-type strategies applying a mapping to one storage location.

mod default;
mod repeater;

use std::collections::{BTreeMap, HashMap};

use fieldmig_storage::{StorageLocation, StorageScope};

use crate::error::MigrationError;
use crate::events::EventDispatcher;
use crate::field::FieldMapping;
use crate::mappings::FieldMap;
use crate::migration::Transformers;

pub use default::{DefaultFieldMigrator, SubFieldRename};
pub use repeater::RepeaterFieldMigrator;

/// Everything a migrator needs besides the mapping itself.
pub struct FieldContext<'a> {
    pub storage: &'a dyn StorageLocation,
    pub scope: &'a StorageScope<'a>,
    pub separator: &'a str,
    pub transformers: &'a Transformers,
    /// Old definition key → new definition key for the whole migration.
    pub key_map: &'a BTreeMap<String, String>,
    pub old_fields: &'a FieldMap,
    pub new_fields: &'a FieldMap,
}

pub trait FieldMigrator {
    /// Move the stored data of `mapping` within `ctx.storage`, reporting
    /// every change through `events`.
    fn migrate_field(
        &self,
        mapping: &FieldMapping,
        ctx: &FieldContext<'_>,
        events: &mut EventDispatcher<'_>,
    ) -> Result<(), MigrationError>;
}

/// Migrators by field type, with the default strategy as fallback.
pub struct FieldMigrators {
    by_type: HashMap<String, Box<dyn FieldMigrator>>,
    fallback: Box<dyn FieldMigrator>,
}

impl Default for FieldMigrators {
    fn default() -> Self {
        let mut migrators = FieldMigrators {
            by_type: HashMap::new(),
            fallback: Box::new(DefaultFieldMigrator),
        };
        migrators.register("repeater", RepeaterFieldMigrator::new());
        migrators.register("flexible_content", RepeaterFieldMigrator::new());
        migrators
    }
}

impl FieldMigrators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field_type: impl Into<String>, migrator: impl FieldMigrator + 'static) {
        self.by_type.insert(field_type.into(), Box::new(migrator));
    }

    pub fn get(&self, field_type: &str) -> &dyn FieldMigrator {
        self.by_type
            .get(field_type)
            .map(Box::as_ref)
            .unwrap_or(self.fallback.as_ref())
    }

    pub fn has(&self, field_type: &str) -> bool {
        self.by_type.contains_key(field_type)
    }
}
