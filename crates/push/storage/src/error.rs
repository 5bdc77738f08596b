//! Storage errors.

/// Failure talking to the registration store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No connection could be obtained within the pool timeout.
    #[error("failed to get database connection: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    /// Publish options could not be serialized for storage.
    #[error("failed to encode publish options: {0}")]
    Encode(#[from] plist::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}
