/// All errors that can be returned by a storage location or history tracker.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying SQLite connection rejected a statement.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value or history document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A table prefix or table name contains characters that are not
    /// safe to interpolate into SQL identifiers.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A backend-specific storage error (custom backends, injected failures, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
