//! Error types for the schema core.

use thiserror::Error;

/// Schema operation result type.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema errors.
///
/// A row that simply does not exist is never an error: reads return an empty
/// [`Record`](crate::Record) or an empty list and callers check emptiness.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Malformed schema definition. Raised at registry build time so a
    /// partially built structure never escapes.
    #[error("Definition error: {0}")]
    Definition(String),

    /// Lookup of a schema key the registry does not hold.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// A column name no field, join or count owns.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// An id-shortcut operation on a structure without a single id column.
    #[error("Schema '{0}' has no single id column")]
    MissingId(String),

    /// Database error.
    #[error(transparent)]
    Db(#[from] atrium_db::DbError),

    /// JSON error (definition files, JSON field values).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// Create a definition error.
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }
}
