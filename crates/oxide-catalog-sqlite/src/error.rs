//! Error types for the SQLite transport.

use oxide_catalog_core::error::CatalogError;
use oxide_catalog_core::provider::ExecutionError;

/// Errors raised while connecting to or querying SQLite.
#[derive(Debug, thiserror::Error)]
pub enum SqliteCatalogError {
    /// Database error reported by the driver.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (starting the runtime, reading files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A request names a type the enumerator does not know.
    #[error("Unknown type '{type_name}' in '{urn}'")]
    UnknownType {
        /// Offending segment type.
        type_name: String,
        /// Full request path.
        urn: String,
    },

    /// A type appears below a parent it cannot belong to.
    #[error("'{type_name}' cannot be a child of '{parent}'")]
    InvalidNesting {
        /// Child segment type.
        type_name: String,
        /// Parent segment type.
        parent: String,
    },

    /// A request asks for a field the enumerator cannot produce.
    #[error("Unknown field '{field}' for type '{type_name}'")]
    UnknownField {
        /// Segment type.
        type_name: String,
        /// Requested field.
        field: String,
    },

    /// Error raised by the object model.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl SqliteCatalogError {
    /// SQLite result code of the underlying failure, 0 when not a database
    /// error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse().ok())
                .unwrap_or(1),
            Self::Database(_) | Self::Io(_) => 1,
            _ => 0,
        }
    }

    /// Returns true if the connection itself is unusable.
    #[must_use]
    pub const fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Database(
                    sqlx::Error::Io(_)
                        | sqlx::Error::PoolClosed
                        | sqlx::Error::PoolTimedOut
                        | sqlx::Error::WorkerCrashed
                )
        )
    }
}

impl From<SqliteCatalogError> for ExecutionError {
    fn from(error: SqliteCatalogError) -> Self {
        let severity = if error.is_transport_failure() { 20 } else { 16 };
        Self::new(error.to_string(), error.code()).with_severity(severity)
    }
}

/// Result type for SQLite transport operations.
pub type Result<T> = std::result::Result<T, SqliteCatalogError>;
