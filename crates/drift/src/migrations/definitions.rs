//! Migration Definitions - Core types shared by the scanner, ledger and runner

use chrono::NaiveDateTime;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{DriftError, DriftResult};

/// Name of the ledger table. Existing deployments depend on it.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// A nonnegative integer used to order migrations
///
/// Generated IDs are Unix timestamps in seconds, but any nonnegative value is
/// accepted when given explicitly (the bootstrap migration uses `0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MigrationId(i64);

impl MigrationId {
    /// The ID reserved for the bootstrap migration
    pub const INIT: MigrationId = MigrationId(0);

    pub fn new(value: i64) -> DriftResult<Self> {
        if value < 0 {
            return Err(DriftError::NegativeId(value));
        }
        Ok(Self(value))
    }

    /// Current Unix time in seconds
    pub fn now() -> DriftResult<Self> {
        Self::new(chrono::Utc::now().timestamp())
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Number of decimal digits in the unpadded ID
    pub fn width(self) -> usize {
        let mut n = self.0;
        let mut digits = 1;
        while n >= 10 {
            n /= 10;
            digits += 1;
        }
        digits
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MigrationId {
    type Err = DriftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.parse::<i64>().map_err(|source| DriftError::NotAnInteger {
            input: s.to_string(),
            source,
        })?;
        Self::new(value)
    }
}

/// A migration file found on disk
///
/// Rebuilt from scratch on every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub path: PathBuf,
    /// File name without the directory
    pub name: String,
    /// Raw SQL text, never parsed
    pub content: String,
    pub id: MigrationId,
    pub slug: String,
    /// The ID digits exactly as written in the file name, zero padding included
    pub raw_id: String,
}

/// A row of the ledger table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: MigrationId,
    pub slug: String,
    /// Assigned by the database when the migration was claimed
    pub run_at: NaiveDateTime,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
}

impl MigrationConfig {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new("migrations")
    }
}

/// Result of running migrations
#[derive(Debug, Default)]
pub struct MigrationRunResult {
    /// IDs of migrations applied by this run, in order
    pub applied_migrations: Vec<MigrationId>,
    /// Number of migrations that were already recorded in the ledger
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied_migrations.len()
    }
}

/// A file rename proposed by the renumbering pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl fmt::Display for Rename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from.display(), self.to.display())
    }
}
