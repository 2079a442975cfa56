use std::path::PathBuf;

use fieldmig_storage::StorageError;

/// Which stage of field resolution rejected an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Collection,
    Field,
}

impl std::fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveStage::Collection => write!(f, "field collection"),
            ResolveStage::Field => write!(f, "field"),
        }
    }
}

/// Errors raised while normalizing raw field definitions.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No registered resolver supports the input.
    #[error("unresolvable {stage} representation: {input_type}")]
    Unresolvable {
        stage: ResolveStage,
        input_type: &'static str,
    },

    /// A resolver produced a field without a usable key or name.
    #[error("field definition is missing a non-empty '{0}'")]
    MissingIdentity(&'static str),

    /// Two fields of one tree share a definition key.
    #[error("duplicate field key '{0}'")]
    DuplicateKey(String),

    /// A flexible-content layout without a name.
    #[error("invalid layout in field '{field}': {reason}")]
    InvalidLayout { field: String, reason: String },
}

/// Coarse classification of migration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal before any storage mutation: bad input, nothing to run.
    Configuration,
    /// The history ledger forbids this run.
    History,
    /// A backend failed; the tenant's transaction was rolled back.
    Storage,
}

/// Errors raised by the migration engine.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("both before and after field structures must be provided")]
    MissingFields,

    #[error("no storage locations registered for this migration")]
    NoStorageLocations,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("migration '{0}' has already been run")]
    AlreadyRun(String),

    #[error("cannot roll back '{0}': it has not been run (or was already rolled back)")]
    NotRun(String),

    #[error("rollback '{0}' has already been run")]
    RollbackAlreadyRun(String),

    #[error("this is not a multisite installation")]
    NotMultisite,

    #[error("failed on {} site(s): {}", .0.len(), .0.join("; "))]
    SitesFailed(Vec<String>),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid migration file {}: {message}", path.display())]
    MigrationFile { path: PathBuf, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for MigrationError {
    fn from(e: rusqlite::Error) -> Self {
        MigrationError::Storage(StorageError::Database(e))
    }
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::MissingFields
            | MigrationError::NoStorageLocations
            | MigrationError::Resolve(_)
            | MigrationError::NotMultisite
            | MigrationError::MigrationFile { .. }
            | MigrationError::Config(_) => ErrorKind::Configuration,
            MigrationError::AlreadyRun(_)
            | MigrationError::NotRun(_)
            | MigrationError::RollbackAlreadyRun(_) => ErrorKind::History,
            MigrationError::SitesFailed(_) | MigrationError::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(MigrationError::MissingFields.kind(), ErrorKind::Configuration);
        assert_eq!(MigrationError::AlreadyRun("a".into()).kind(), ErrorKind::History);
        assert_eq!(
            MigrationError::Storage(StorageError::Backend("boom".into())).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn messages() {
        let err = MigrationError::from(ResolveError::Unresolvable {
            stage: ResolveStage::Field,
            input_type: "string",
        });
        assert_eq!(err.to_string(), "unresolvable field representation: string");
        let err = MigrationError::SitesFailed(vec!["2 (boom)".into(), "4 (bang)".into()]);
        assert_eq!(err.to_string(), "failed on 2 site(s): 2 (boom); 4 (bang)");
    }
}
