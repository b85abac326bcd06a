//! # drift: SQL migrations for PostgreSQL
//!
//! Applies the `<id>-<slug>.sql` files of a migrations directory to a
//! database in ID order, recording each one in the `schema_migrations`
//! ledger so it is never applied twice.
//!
//! The functions at the crate root are the entry points used by the `drift`
//! command line tool. [`MigrationRunner`] and [`MigrationManager`] expose the
//! same operations with more control, and [`MigrationStore`] lets the runner
//! work against storage other than [`PgStore`].

pub mod database;
pub mod error;
pub mod migrations;

use std::path::{Path, PathBuf};

pub use database::*;
pub use error::*;
pub use migrations::*;

/// Apply every pending migration in `migrations_dir` to the database
///
/// Migrations with an ID greater than `until` are left pending.
pub async fn migrate(
    store: &PgStore,
    migrations_dir: impl AsRef<Path>,
    until: Option<MigrationId>,
) -> DriftResult<MigrationRunResult> {
    let manager = MigrationManager::for_dir(migrations_dir.as_ref())?;
    MigrationRunner::new(manager, store.clone())
        .run_migrations(until)
        .await
}

/// Write the bootstrap migration that creates the ledger
pub fn setup(migrations_dir: impl AsRef<Path>) -> DriftResult<PathBuf> {
    MigrationManager::for_dir(migrations_dir.as_ref())?.setup()
}

/// Create a new migration file from `template` (or a placeholder comment)
pub fn new_file(
    migrations_dir: impl AsRef<Path>,
    id: Option<MigrationId>,
    slug: &str,
    template: Option<&str>,
) -> DriftResult<PathBuf> {
    MigrationManager::for_dir(migrations_dir.as_ref())?.new_file(id, slug, template)
}

/// Report, and with `write` perform, the renames that zero-pad migration IDs
pub fn renumber(migrations_dir: impl AsRef<Path>, write: bool) -> DriftResult<Vec<Rename>> {
    MigrationManager::for_dir(migrations_dir.as_ref())?.renumber(write)
}
