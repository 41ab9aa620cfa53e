//! Unified error type for relmap.
//!
//! Every layer (schema registry, persistence, loader, query façade) funnels
//! its failures into [`Error`]. Nothing is retried internally; errors surface
//! synchronously to the caller of the operation that triggered them.

use std::fmt;

/// Unified error type covering all failure modes in relmap.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A relationship, field or column references something undeclared.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A write broke a declared constraint (required, unique, check).
    #[error("Constraint violation on {entity}: {message}")]
    ConstraintViolation {
        /// The entity type being written.
        entity: String,
        /// Which constraint failed and why.
        message: String,
    },

    /// A lookup matched no row.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity type that was looked up.
        entity: String,
        /// The identifier or query criteria that was looked up.
        id: String,
    },

    /// A single-row lookup matched more than one row.
    #[error("Multiple {entity} rows found where one was expected ({count} matched)")]
    MultipleResults {
        /// The entity type that was looked up.
        entity: String,
        /// How many distinct rows matched.
        count: usize,
    },

    /// The storage engine or connection pool failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying storage error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::Schema`].
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    /// Convenience constructor for [`Error::ConstraintViolation`].
    pub fn constraint(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConstraintViolation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::MultipleResults`].
    pub fn multiple_results(entity: impl Into<String>, count: usize) -> Self {
        Error::MultipleResults {
            entity: entity.into(),
            count,
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Whether this error is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation { .. })
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
