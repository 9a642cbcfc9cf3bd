//! Error taxonomy for the persistence engine.
//!
//! Every public operation returns [`DbError`]. Nothing is recovered locally:
//! the only tolerated non-error is an UPDATE with no pending changes, which
//! is logged and reported as zero affected rows.

use thiserror::Error;

/// Errors returned by every engine operation.
#[derive(Debug, Error)]
pub enum DbError {
    /// The backend could not be reached or the handle is unusable.
    #[error("database connection error: {0}")]
    Connection(#[source] rusqlite::Error),

    /// Deriving the column set, checking for, or creating a table failed.
    #[error("schema initialization failed for table '{table}': {reason}")]
    SchemaInit {
        /// Physical table name.
        table: String,
        /// What went wrong.
        reason: String,
        /// The backend error, if the failure came from SQLite.
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// A value or an entity did not satisfy its declared contract.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A column codec could not translate a value.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The backend rejected or failed to execute a statement.
    ///
    /// Carries the statement text only; bound parameters are never included.
    #[error("query failed: {source} (statement: {statement})")]
    Query {
        /// The SQL text that was being executed.
        statement: String,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A fetched row does not satisfy the entity's declared columns.
    #[error("row from '{table}' cannot be mapped: {reason}")]
    Mapping {
        /// Physical table name.
        table: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// The caller used the API in a way that cannot succeed.
    #[error("logic error: {0}")]
    Logic(String),
}

impl DbError {
    pub(crate) fn query(statement: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Query {
            statement: statement.into(),
            source,
        }
    }

    pub(crate) fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaInit {
            table: table.into(),
            reason: reason.into(),
            source: None,
        }
    }
}

/// A value or entity rejected before reaching the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A null was assigned to a column declared `NOT NULL`.
    #[error("column '{column}' is not nullable (expected {expected}, got null)")]
    NullNotAllowed {
        /// Column name.
        column: String,
        /// The column's SQL declaration.
        expected: String,
    },

    /// The column type refused the value (e.g. text longer than `VARCHAR(n)`).
    #[error("column '{column}' rejected a value of type {actual} (expected {expected})")]
    Rejected {
        /// Column name.
        column: String,
        /// The column's SQL declaration.
        expected: String,
        /// Rust type of the offered value.
        actual: &'static str,
    },

    /// An entity was saved while some declared columns had no valid value.
    #[error("entity for table '{table}' is incomplete, missing: {}", missing.join(", "))]
    Incomplete {
        /// Logical table name.
        table: String,
        /// Columns that are unassigned, or null while declared `NOT NULL`.
        missing: Vec<String>,
    },
}

/// A custom codec failed to translate between wire and memory values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert column '{column}' from {from} to {to}: {reason}")]
pub struct ConversionError {
    /// Column name.
    pub column: String,
    /// Source type name.
    pub from: &'static str,
    /// Destination type name.
    pub to: &'static str,
    /// Message produced by the codec.
    pub reason: String,
}
