//! Database Integration - storage adapters for the migration ledger
//!
//! The runner talks to the database only through [`MigrationStore`] and
//! [`StoreTransaction`]. [`PgStore`] implements them for PostgreSQL on top of
//! a sqlx connection pool.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::migrations::{MigrationId, MigrationRecord, LEDGER_TABLE};

/// Storage backend holding the migration ledger
#[async_trait]
pub trait MigrationStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Read every ledger row ordered by ID
    ///
    /// Must return [`StoreError::TableMissing`] when the ledger table has not
    /// been created yet.
    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Run a batch of SQL statements outside of any transaction
    async fn execute(&self, sql: &str) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// An open transaction on a [`MigrationStore`]
///
/// Dropping a transaction without committing it rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Record `id` in the ledger
    ///
    /// Must fail with [`StoreError::UniqueViolation`] when the ID is already
    /// recorded, including by a concurrent transaction that commits first.
    async fn claim(&mut self, id: MigrationId, slug: &str) -> Result<(), StoreError>;

    /// Run a batch of SQL statements inside the transaction
    async fn execute(&mut self, sql: &str) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// PostgreSQL ledger store backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`
    ///
    /// Migrations run one at a time, so a single connection is enough.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn applied_sql() -> String {
        // The column is `integer` in the bootstrap migration; widen it so the
        // row decodes into an i64 whatever the deployed column type is.
        format!(
            "SELECT id::bigint AS id, slug, run_at FROM {} ORDER BY id ASC",
            LEDGER_TABLE
        )
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    type Transaction = PgTransaction;

    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        let rows = sqlx::query(&Self::applied_sql())
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let slug: String = row.try_get("slug")?;
            let run_at: NaiveDateTime = row.try_get("run_at")?;
            let id = MigrationId::new(id)
                .map_err(|e| StoreError::Backend(format!("malformed ledger row: {}", e)))?;
            records.push(MigrationRecord { id, slug, run_at });
        }
        Ok(records)
    }

    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        // A plain &str goes through the simple query protocol, which accepts
        // several statements in one string.
        (&self.pool).execute(sql).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        let inner = self.pool.begin().await?;
        debug!("transaction started");
        Ok(PgTransaction { inner })
    }
}

/// Transaction handle returned by [`PgStore::begin`]
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn claim(&mut self, id: MigrationId, slug: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT _drift_claim_migration($1::integer, $2)")
            .bind(id.get())
            .bind(slug)
            .execute(&mut *self.inner)
            .await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        (&mut *self.inner).execute(sql).await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.inner.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await?;
        Ok(())
    }
}
