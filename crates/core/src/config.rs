//! Engine configuration.
//!
//! Built once by the caller and passed by reference to the migrator and the
//! migration finder. Every setting has a default, so an empty file is valid.
//!
//! # Example
//!
//! ```toml
//! separator = "_"
//! table_prefix = "wp_"
//! migrations_path = "migrations"
//!
//! [history]
//! backend = "database"
//! table = "acf_migrations"
//!
//! [[storage]]
//! type = "post_meta"
//!
//! [[storage]]
//! type = "options"
//! prefix = "options"
//!
//! [[storage]]
//! type = "blocks"
//! max_depth = 10
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fieldmig_storage::{
    BlocksStorage, DatabaseMigrationHistory, MetaStorage, MigrationHistory, NullMigrationHistory,
    OptionsMigrationHistory, OptionsStorage, StorageLocation, DEFAULT_HISTORY_OPTION,
    DEFAULT_HISTORY_TABLE, DEFAULT_MAX_DEPTH, DEFAULT_OPTIONS_PREFIX, DEFAULT_TABLE_PREFIX,
};
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

pub const DEFAULT_SEPARATOR: &str = "_";
pub const DEFAULT_MIGRATIONS_PATH: &str = "migrations";
pub const DEFAULT_BACKUP_PATH: &str = "backups";

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Joins ancestor names into storage names and splits them for matching.
    pub separator: String,
    /// Network table prefix of the installation.
    pub table_prefix: String,
    pub migrations_path: PathBuf,
    pub backup_path: PathBuf,
    pub history: HistoryConfig,
    /// Storage locations used by migrations that do not name their own.
    pub storage: Vec<StorageLocationConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    Database,
    Options,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    pub table: String,
    pub option_name: String,
}

/// One storage location, tagged by its storage type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageLocationConfig {
    PostMeta {
        #[serde(default)]
        prefix: Option<String>,
    },
    TermMeta {
        #[serde(default)]
        prefix: Option<String>,
    },
    UserMeta {
        #[serde(default)]
        prefix: Option<String>,
    },
    Options {
        #[serde(default = "default_options_prefix")]
        prefix: String,
    },
    Blocks {
        #[serde(default = "default_max_depth")]
        max_depth: usize,
    },
}

fn default_options_prefix() -> String {
    DEFAULT_OPTIONS_PREFIX.to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            separator: DEFAULT_SEPARATOR.to_string(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            migrations_path: PathBuf::from(DEFAULT_MIGRATIONS_PATH),
            backup_path: PathBuf::from(DEFAULT_BACKUP_PATH),
            history: HistoryConfig::default(),
            storage: vec![
                StorageLocationConfig::PostMeta { prefix: None },
                StorageLocationConfig::Options {
                    prefix: default_options_prefix(),
                },
                StorageLocationConfig::Blocks {
                    max_depth: DEFAULT_MAX_DEPTH,
                },
            ],
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            backend: HistoryBackend::Database,
            table: DEFAULT_HISTORY_TABLE.to_string(),
            option_name: DEFAULT_HISTORY_OPTION.to_string(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MigrationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, MigrationError> {
        let config: MigrationConfig =
            toml::from_str(content).map_err(|e| MigrationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("could not read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            MigrationError::Config(message) => {
                MigrationError::Config(format!("could not parse '{}': {}", path.display(), message))
            }
            other => other,
        })
    }

    fn validate(&self) -> Result<(), MigrationError> {
        if self.separator.is_empty() {
            return Err(MigrationError::Config("separator must not be empty".into()));
        }
        Ok(())
    }

    /// Instantiate the configured default storage locations, in order.
    pub fn default_storage_locations(&self) -> Vec<Arc<dyn StorageLocation>> {
        self.storage.iter().map(StorageLocationConfig::build).collect()
    }

    /// Instantiate the configured history tracker.
    pub fn history(&self) -> Result<Box<dyn MigrationHistory>, MigrationError> {
        let history: Box<dyn MigrationHistory> = match self.history.backend {
            HistoryBackend::Database => Box::new(DatabaseMigrationHistory::new(
                &self.table_prefix,
                &self.history.table,
            )?),
            HistoryBackend::Options => Box::new(OptionsMigrationHistory::new(
                &self.table_prefix,
                &self.history.option_name,
            )?),
            HistoryBackend::None => Box::new(NullMigrationHistory::new()),
        };
        Ok(history)
    }
}

impl StorageLocationConfig {
    pub fn build(&self) -> Arc<dyn StorageLocation> {
        match self {
            StorageLocationConfig::PostMeta { prefix } => Arc::new(meta_with(MetaStorage::posts(), prefix)),
            StorageLocationConfig::TermMeta { prefix } => Arc::new(meta_with(MetaStorage::terms(), prefix)),
            StorageLocationConfig::UserMeta { prefix } => Arc::new(meta_with(MetaStorage::users(), prefix)),
            StorageLocationConfig::Options { prefix } => Arc::new(OptionsStorage::with_prefix(prefix.clone())),
            StorageLocationConfig::Blocks { max_depth } => Arc::new(BlocksStorage::with_max_depth(*max_depth)),
        }
    }
}

fn meta_with(storage: MetaStorage, prefix: &Option<String>) -> MetaStorage {
    match prefix {
        Some(prefix) => storage.with_prefix(prefix.clone()),
        None => storage,
    }
}
