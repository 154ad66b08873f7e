//! Unified error taxonomy for the sync engine.

/// Error type covering every failure mode of the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Connection error ({backend}): {message}")]
    Connection { backend: String, message: String },

    #[error("Schema error ({backend}): {message}")]
    Schema { backend: String, message: String },

    #[error("Transport fetch error ({method}): {message}")]
    TransportFetch { method: String, message: String },

    #[error("Batch write error at batch {batch}: {message}")]
    BatchWrite { batch: usize, message: String },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt cache entry: {0}")]
    CacheCorrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mirror database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SyncError {
    pub fn connection(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Connection {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    pub fn schema(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Schema {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    /// Check if this error represents a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Short machine-readable code for run-log messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedBackend(_) => "UNSUPPORTED_BACKEND",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Schema { .. } => "SCHEMA_ERROR",
            Self::TransportFetch { .. } => "TRANSPORT_FETCH_ERROR",
            Self::BatchWrite { .. } => "BATCH_WRITE_ERROR",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CacheCorrupt(_) => "CACHE_CORRUPT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Classify an sqlx error from a source backend as schema vs connection.
///
/// Driver messages are the only signal available: a missing mapped table or
/// column shows up as a database-level error string, anything else (socket,
/// TLS, auth, timeout) is a connection problem.
pub fn classify_source_error(backend: &str, err: sqlx::Error) -> SyncError {
    match &err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_lowercase();
            if msg.contains("no such table")
                || msg.contains("no such column")
                || msg.contains("doesn't exist")
                || msg.contains("does not exist")
                || msg.contains("unknown column")
                || msg.contains("unknown table")
            {
                SyncError::schema(backend, db.message())
            } else {
                SyncError::connection(backend, db.message())
            }
        }
        _ => SyncError::connection(backend, err),
    }
}
