#![allow(clippy::result_large_err)]
//! fieldmig-core: migration engine for structured custom-field data.
//!
//! A [`Migration`] describes an old and a new field structure. The
//! [`MappingsResolver`] flattens both trees and pairs old fields with new
//! ones; the [`Migrator`] then moves the stored values and key references
//! of every pair across the configured storage locations, inside one
//! transaction per site, and reports what changed as a [`MigrationResult`].
//!
//! # Public API
//!
//! - [`Migrator`] -- validate, resolve and execute; rollback; dry-run
//! - [`Migration`] -- fluent migration definition and rollback derivation
//! - [`MappingsResolver`] -- flattening and three-pass field matching
//! - [`FieldResolvers`] -- ordered resolver registries for raw definitions
//! - [`FieldMigrators`] -- per-field-type migration strategies
//! - [`MigrationFinder`] / [`write_stub`] -- migration files on disk
//! - [`MigrationConfig`] -- engine configuration

pub mod config;
pub mod error;
pub mod events;
pub mod field;
pub mod finder;
pub mod mappings;
pub mod migration;
pub mod migrator;
pub mod migrators;
pub mod resolver;
pub mod result;

// ── Convenience re-exports ───────────────────────────────────────────

pub use config::{HistoryBackend, HistoryConfig, MigrationConfig, StorageLocationConfig};
pub use error::{ErrorKind, MigrationError, ResolveError, ResolveStage};
pub use events::{
    ChangeProperty, EventDispatcher, EventObserver, FieldChangeEvent, FieldRef, MigrationEvent,
    TracingObserver,
};
pub use field::{Field, FieldMapping, Layout};
pub use finder::{write_stub, MigrationEntry, MigrationFinder, TransformSpec};
pub use mappings::{FieldMap, MappingsResolver, ResolvedMigration};
pub use migration::{Migration, Transformers, ValueTransformer, ROLLBACK_PREFIX};
pub use migrator::{MigrationState, Migrator, RollbackSelection};
pub use migrators::{
    DefaultFieldMigrator, FieldContext, FieldMigrator, FieldMigrators, RepeaterFieldMigrator,
};
pub use resolver::{CollectionResolver, FieldResolvers, FieldTypeResolver, ResolveContext};
pub use result::{FieldChangeSummary, MigrationResult, PropertyChange};
