use thiserror::Error;

/// Errors that can occur when talking to a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be mapped back into the domain model.
    #[error("Corrupt {entity} record: {reason}")]
    Corrupt {
        entity: &'static str,
        reason: String,
    },

    /// A record with the same unique key already exists.
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
