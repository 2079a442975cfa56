//! Storage side of field migrations: where field values and key references
//! live, how tenants are addressed, and where migration history is kept.

mod blocks;
pub mod conformance;
mod database;
mod error;
mod history;
mod meta;
mod options;
mod record;
mod traits;
pub mod value;

pub use blocks::{BlocksStorage, DEFAULT_MAX_DEPTH};
pub use database::{validate_identifier, Database, StorageScope, DEFAULT_TABLE_PREFIX};
pub use error::StorageError;
pub use history::{
    DatabaseMigrationHistory, MigrationHistory, NullMigrationHistory, OptionsMigrationHistory,
    DEFAULT_HISTORY_OPTION, DEFAULT_HISTORY_TABLE,
};
pub use meta::MetaStorage;
pub use options::{OptionsStorage, DEFAULT_OPTIONS_PREFIX};
pub use record::{FoundField, HistoryRecord, Site};
pub use traits::{
    like_escape, EmbeddedRewrite, FieldPattern, KeyTarget, StorageLocation, ValueUpdate,
    KEY_REF_PREFIX,
};
