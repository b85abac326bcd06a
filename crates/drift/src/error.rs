//! Error types for the migration engine
//!
//! `DriftError` is what callers see. `StoreError` is produced by storage
//! adapters, which classify driver-specific failures before they reach the
//! engine.

use std::io;
use std::num::ParseIntError;
use std::path::Path;

use thiserror::Error;

use crate::migrations::MigrationId;

/// Result type alias for engine operations
pub type DriftResult<T> = Result<T, DriftError>;

/// Errors raised while scanning, authoring or applying migrations
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("migration ID must not be negative: {0}")]
    NegativeId(i64),

    #[error("not a valid integer: {input:?}")]
    NotAnInteger {
        input: String,
        #[source]
        source: ParseIntError,
    },

    #[error("filename does not fit migration pattern: {name}")]
    InvalidFilename { name: String },

    #[error("duplicate migration ID {id}: {first}, {second}")]
    DuplicateId {
        id: MigrationId,
        first: String,
        second: String,
    },

    #[error("could not get applied migrations: {0}")]
    LedgerUnavailable(#[source] StoreError),

    #[error("migration {id} ({name}) was already claimed: {source}")]
    ClaimConflict {
        id: MigrationId,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("could not apply migration {name}: {source}")]
    ApplyFailure {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl DriftError {
    /// Wrap an I/O error with a short description of what was being done
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O error that happened while touching `path`
    pub(crate) fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::io(format!("{} {}", action, path.display()), source)
    }

    /// Whether this error means another run already claimed the migration
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, DriftError::ClaimConflict { .. })
    }
}

/// Portable classification of storage failures
///
/// Adapters translate their driver's error codes into these variants so the
/// ledger reader and apply protocol never look at vendor codes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The ledger table does not exist yet
    #[error("ledger table does not exist")]
    TableMissing,

    /// A uniqueness constraint rejected a write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Failure reported by a non-sqlx backend
    #[error("storage backend error: {0}")]
    Backend(String),
}

// SQLSTATE codes from the PostgreSQL error code appendix.
const UNDEFINED_TABLE: &str = "42P01";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let classified = err.as_database_error().and_then(|db_err| {
            match db_err.code().as_deref() {
                Some(UNDEFINED_TABLE) => Some(StoreError::TableMissing),
                Some(UNIQUE_VIOLATION) => {
                    Some(StoreError::UniqueViolation(db_err.message().to_string()))
                }
                _ => None,
            }
        });
        classified.unwrap_or(StoreError::Database(err))
    }
}
