//! Migration Runner - Executes migrations against the database
//!
//! Reads the ledger, diffs it against the files on disk and applies whatever
//! is missing, one migration at a time in ID order.
//!
//! Each migration runs inside its own transaction that first claims the
//! migration's ID in the ledger. The ledger's primary key makes the claim
//! fail if another run already recorded that ID, which aborts the whole
//! transaction, so a migration is applied at most once even when two
//! processes migrate the same database concurrently.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::definitions::{MigrationFile, MigrationId, MigrationRecord, MigrationRunResult};
use super::manager::MigrationManager;
use crate::database::{MigrationStore, StoreTransaction};
use crate::error::{DriftError, DriftResult, StoreError};

/// Line prefix that opts a migration out of the transaction and claim
pub const NO_TRANSACTION_DIRECTIVE: &str = "--drift:no-transaction";

/// Whether the content carries the no-transaction directive at the start of
/// any line
pub fn skips_transaction(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.starts_with(NO_TRANSACTION_DIRECTIVE))
}

/// Files whose IDs are not in the ledger, in ascending ID order
pub fn pending(applied: &[MigrationRecord], available: Vec<MigrationFile>) -> Vec<MigrationFile> {
    let skip: HashSet<MigrationId> = applied.iter().map(|r| r.id).collect();
    let mut needed: Vec<MigrationFile> = available
        .into_iter()
        .filter(|f| !skip.contains(&f.id))
        .collect();
    needed.sort_by_key(|f| f.id);
    needed
}

/// Migration runner that executes migrations against a store
pub struct MigrationRunner<S> {
    manager: MigrationManager,
    store: S,
}

impl<S: MigrationStore> MigrationRunner<S> {
    pub fn new(manager: MigrationManager, store: S) -> Self {
        Self { manager, store }
    }

    /// Ledger rows, or nothing if the ledger table does not exist yet
    pub async fn applied(&self) -> DriftResult<Vec<MigrationRecord>> {
        match self.store.applied().await {
            Ok(records) => Ok(records),
            Err(StoreError::TableMissing) => {
                debug!("ledger table not found, treating every migration as pending");
                Ok(Vec::new())
            }
            Err(e) => Err(DriftError::LedgerUnavailable(e)),
        }
    }

    /// Migrations that a run would apply, in order
    pub async fn pending(&self, until: Option<MigrationId>) -> DriftResult<Vec<MigrationFile>> {
        let (_, needed) = self.plan(until).await?;
        Ok(needed)
    }

    async fn plan(
        &self,
        until: Option<MigrationId>,
    ) -> DriftResult<(Vec<MigrationRecord>, Vec<MigrationFile>)> {
        let applied = self.applied().await?;
        let available = self.manager.scan()?;
        let mut needed = pending(&applied, available);
        if let Some(until) = until {
            needed.retain(|f| f.id <= until);
        }
        Ok((applied, needed))
    }

    /// Apply every pending migration, stopping at the first failure
    ///
    /// With `until` set, migrations with a greater ID are left pending.
    pub async fn run_migrations(
        &self,
        until: Option<MigrationId>,
    ) -> DriftResult<MigrationRunResult> {
        let start_time = Instant::now();

        let (applied, needed) = self.plan(until).await?;

        let mut applied_migrations = Vec::with_capacity(needed.len());
        for migration in &needed {
            info!("Applying {}", migration.name);
            self.apply(migration).await?;
            info!(id = %migration.id, "Applied {}", migration.name);
            applied_migrations.push(migration.id);
        }

        Ok(MigrationRunResult {
            applied_migrations,
            skipped_count: applied.len(),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Apply a single migration
    pub async fn apply(&self, migration: &MigrationFile) -> DriftResult<()> {
        if skips_transaction(&migration.content) {
            debug!(file = %migration.name, "running without a transaction");
            return self
                .store
                .execute(&migration.content)
                .await
                .map_err(|source| apply_failure(migration, source));
        }

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|source| apply_failure(migration, source))?;

        let claimed = tx.claim(migration.id, &migration.slug).await;
        if let Err(source) = claimed {
            let err = match source {
                StoreError::UniqueViolation(_) => DriftError::ClaimConflict {
                    id: migration.id,
                    name: migration.name.clone(),
                    source,
                },
                source => apply_failure(migration, source),
            };
            return Err(abort(tx, migration, err).await);
        }

        let executed = tx.execute(&migration.content).await;
        if let Err(source) = executed {
            return Err(abort(tx, migration, apply_failure(migration, source)).await);
        }

        tx.commit()
            .await
            .map_err(|source| apply_failure(migration, source))
    }
}

fn apply_failure(migration: &MigrationFile, source: StoreError) -> DriftError {
    DriftError::ApplyFailure {
        name: migration.name.clone(),
        source,
    }
}

async fn abort<T: StoreTransaction>(
    tx: T,
    migration: &MigrationFile,
    err: DriftError,
) -> DriftError {
    // A failed rollback is only logged: the server discards the transaction
    // once the connection closes, and `err` is the failure to report.
    if let Err(e) = tx.rollback().await {
        warn!(file = %migration.name, error = %e, "rollback failed");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::INIT_SQL;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Statement that makes the in-memory store fail
    const FAIL: &str = "select fail();";

    #[derive(Default)]
    struct MemoryState {
        ledger: Option<Vec<(MigrationId, String)>>,
        /// IDs claimed by transactions that have not finished yet
        in_flight: HashSet<MigrationId>,
        executed: Vec<String>,
        broken: bool,
        rollbacks: usize,
    }

    #[derive(Clone, Default)]
    struct MemoryStore {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemoryStore {
        fn ledger_ids(&self) -> Vec<i64> {
            let state = self.state.lock().unwrap();
            state
                .ledger
                .iter()
                .flatten()
                .map(|(id, _)| id.get())
                .collect()
        }

        fn executed(&self) -> Vec<String> {
            self.state.lock().unwrap().executed.clone()
        }

        fn rollbacks(&self) -> usize {
            self.state.lock().unwrap().rollbacks
        }
    }

    fn run_sql(state: &mut MemoryState, sql: &str) -> Result<(), StoreError> {
        if sql.contains(FAIL) {
            return Err(StoreError::Backend("function fail() does not exist".to_string()));
        }
        if sql == INIT_SQL {
            if state.ledger.is_some() {
                return Err(StoreError::Backend("relation already exists".to_string()));
            }
            state.ledger = Some(vec![(MigrationId::INIT, "init".to_string())]);
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    #[async_trait]
    impl MigrationStore for MemoryStore {
        type Transaction = MemoryTransaction;

        async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError> {
            let state = self.state.lock().unwrap();
            if state.broken {
                return Err(StoreError::Backend("connection refused".to_string()));
            }
            let ledger = state.ledger.as_ref().ok_or(StoreError::TableMissing)?;
            let mut records: Vec<MigrationRecord> = ledger
                .iter()
                .map(|(id, slug)| MigrationRecord {
                    id: *id,
                    slug: slug.clone(),
                    run_at: NaiveDateTime::default(),
                })
                .collect();
            records.sort_by_key(|r| r.id);
            Ok(records)
        }

        async fn execute(&self, sql: &str) -> Result<(), StoreError> {
            run_sql(&mut self.state.lock().unwrap(), sql)
        }

        async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
            Ok(MemoryTransaction {
                state: self.state.clone(),
                claims: Vec::new(),
                statements: Vec::new(),
            })
        }
    }

    struct MemoryTransaction {
        state: Arc<Mutex<MemoryState>>,
        claims: Vec<(MigrationId, String)>,
        statements: Vec<String>,
    }

    impl MemoryTransaction {
        fn release(&mut self) {
            let mut state = self.state.lock().unwrap();
            for (id, _) in self.claims.drain(..) {
                state.in_flight.remove(&id);
            }
        }
    }

    #[async_trait]
    impl StoreTransaction for MemoryTransaction {
        async fn claim(&mut self, id: MigrationId, slug: &str) -> Result<(), StoreError> {
            let mut state = self.state.lock().unwrap();
            let ledger = state.ledger.as_ref().ok_or(StoreError::TableMissing)?;
            if ledger.iter().any(|(existing, _)| *existing == id) || state.in_flight.contains(&id)
            {
                return Err(StoreError::UniqueViolation(format!(
                    "Key (id)=({}) already exists.",
                    id
                )));
            }
            state.in_flight.insert(id);
            self.claims.push((id, slug.to_string()));
            Ok(())
        }

        async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
            if sql.contains(FAIL) {
                return Err(StoreError::Backend("function fail() does not exist".to_string()));
            }
            self.statements.push(sql.to_string());
            Ok(())
        }

        async fn commit(mut self) -> Result<(), StoreError> {
            {
                let mut state = self.state.lock().unwrap();
                for (id, slug) in &self.claims {
                    state.in_flight.remove(id);
                    if let Some(ledger) = state.ledger.as_mut() {
                        ledger.push((*id, slug.clone()));
                    }
                }
                let statements = std::mem::take(&mut self.statements);
                state.executed.extend(statements);
            }
            self.claims.clear();
            Ok(())
        }

        async fn rollback(mut self) -> Result<(), StoreError> {
            self.release();
            self.state.lock().unwrap().rollbacks += 1;
            Ok(())
        }
    }

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn runner(dir: &Path, store: &MemoryStore) -> MigrationRunner<MemoryStore> {
        MigrationRunner::new(MigrationManager::for_dir(dir).unwrap(), store.clone())
    }

    fn ids(result: &MigrationRunResult) -> Vec<i64> {
        result.applied_migrations.iter().map(|id| id.get()).collect()
    }

    fn bootstrapped() -> (TempDir, MemoryStore) {
        let tmp = TempDir::new().unwrap();
        MigrationManager::for_dir(tmp.path()).unwrap().setup().unwrap();
        (tmp, MemoryStore::default())
    }

    #[test]
    fn test_directive_detection() {
        assert!(skips_transaction("--drift:no-transaction\nselect 1;"));
        assert!(skips_transaction("/* header */\n--drift:no-transaction\n"));
        assert!(skips_transaction(INIT_SQL));
        assert!(!skips_transaction("select 1;"));
        assert!(!skips_transaction("  --drift:no-transaction"));
        assert!(!skips_transaction("select 1; --drift:no-transaction"));
    }

    #[test]
    fn test_pending_filters_and_sorts_numerically() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "100-c.sql", "");
        write(tmp.path(), "5-a.sql", "");
        write(tmp.path(), "20-b.sql", "");
        write(tmp.path(), "1-applied.sql", "");
        let available = MigrationManager::for_dir(tmp.path()).unwrap().scan().unwrap();

        let applied = vec![MigrationRecord {
            id: MigrationId::new(1).unwrap(),
            slug: "applied".to_string(),
            run_at: NaiveDateTime::default(),
        }];
        let needed: Vec<i64> = pending(&applied, available)
            .iter()
            .map(|f| f.id.get())
            .collect();
        assert_eq!(needed, vec![5, 20, 100]);
    }

    #[tokio::test]
    async fn test_missing_ledger_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::default();
        assert!(runner(tmp.path(), &store).applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_ledger_failures_are_fatal() {
        let (tmp, store) = bootstrapped();
        store.state.lock().unwrap().broken = true;

        let result = runner(tmp.path(), &store).run_migrations(None).await;
        assert!(matches!(result, Err(DriftError::LedgerUnavailable(_))));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_registers_itself() {
        let (tmp, store) = bootstrapped();

        let result = runner(tmp.path(), &store).run_migrations(None).await.unwrap();
        assert_eq!(ids(&result), vec![0]);
        assert_eq!(store.ledger_ids(), vec![0]);
        assert_eq!(store.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_applies_in_numeric_order() {
        let (tmp, store) = bootstrapped();
        write(tmp.path(), "100-c.sql", "create table c ();");
        write(tmp.path(), "5-a.sql", "create table a ();");
        write(tmp.path(), "20-b.sql", "create table b ();");

        let result = runner(tmp.path(), &store).run_migrations(None).await.unwrap();
        assert_eq!(ids(&result), vec![0, 5, 20, 100]);
        assert_eq!(store.ledger_ids(), vec![0, 5, 20, 100]);
        assert_eq!(
            store.executed()[1..].to_vec(),
            vec![
                "create table a ();".to_string(),
                "create table b ();".to_string(),
                "create table c ();".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let (tmp, store) = bootstrapped();
        write(tmp.path(), "1-a.sql", "create table a ();");
        let runner = runner(tmp.path(), &store);

        let first = runner.run_migrations(None).await.unwrap();
        assert_eq!(first.applied_count(), 2);

        let second = runner.run_migrations(None).await.unwrap();
        assert_eq!(second.applied_count(), 0);
        assert_eq!(second.skipped_count, 2);
        assert_eq!(store.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_until_stops_at_the_given_id() {
        let (tmp, store) = bootstrapped();
        write(tmp.path(), "5-a.sql", "create table a ();");
        write(tmp.path(), "20-b.sql", "create table b ();");
        write(tmp.path(), "100-c.sql", "create table c ();");
        let runner = runner(tmp.path(), &store);

        let until = Some(MigrationId::new(20).unwrap());
        let pending: Vec<i64> = runner
            .pending(until)
            .await
            .unwrap()
            .iter()
            .map(|f| f.id.get())
            .collect();
        assert_eq!(pending, vec![0, 5, 20]);

        let result = runner.run_migrations(until).await.unwrap();
        assert_eq!(ids(&result), vec![0, 5, 20]);

        let result = runner.run_migrations(None).await.unwrap();
        assert_eq!(ids(&result), vec![100]);
    }

    #[tokio::test]
    async fn test_failure_halts_and_rolls_back() {
        let (tmp, store) = bootstrapped();
        write(tmp.path(), "1-a.sql", "create table a ();");
        write(tmp.path(), "2-broken.sql", "create table b ();\nselect fail();");
        write(tmp.path(), "3-c.sql", "create table c ();");

        let result = runner(tmp.path(), &store).run_migrations(None).await;
        match result {
            Err(DriftError::ApplyFailure { name, .. }) => assert_eq!(name, "2-broken.sql"),
            other => panic!("expected apply failure, got {:?}", other),
        }
        assert_eq!(store.ledger_ids(), vec![0, 1]);
        assert_eq!(store.rollbacks(), 1);
        assert!(store.state.lock().unwrap().in_flight.is_empty());
        assert!(!store.executed().iter().any(|sql| sql.contains("table c")));

        // Fixing the file and rerunning picks up where the last run stopped.
        write(tmp.path(), "2-broken.sql", "create table b ();");
        let result = runner(tmp.path(), &store).run_migrations(None).await.unwrap();
        assert_eq!(ids(&result), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_stale_run_gets_claim_conflict() {
        let (tmp, store) = bootstrapped();
        write(tmp.path(), "7-race.sql", "create table race ();");
        let first = runner(tmp.path(), &store);
        let second = runner(tmp.path(), &store);

        first.run_migrations(Some(MigrationId::INIT)).await.unwrap();

        // Both runs see migration 7 as pending before either applies it.
        let seen_by_first = first.pending(None).await.unwrap();
        let seen_by_second = second.pending(None).await.unwrap();
        assert_eq!(seen_by_first, seen_by_second);
        let migration = &seen_by_first[0];

        first.apply(migration).await.unwrap();
        let err = second.apply(migration).await.unwrap_err();
        assert!(err.is_claim_conflict());

        assert_eq!(store.ledger_ids(), vec![0, 7]);
        let bodies = store
            .executed()
            .iter()
            .filter(|sql| sql.contains("table race"))
            .count();
        assert_eq!(bodies, 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_on_open_transactions() {
        let (tmp, store) = bootstrapped();
        runner(tmp.path(), &store).run_migrations(None).await.unwrap();
        let id = MigrationId::new(7).unwrap();

        let mut winner = store.begin().await.unwrap();
        let mut loser = store.begin().await.unwrap();
        winner.claim(id, "race").await.unwrap();
        assert!(matches!(
            loser.claim(id, "race").await,
            Err(StoreError::UniqueViolation(_))
        ));
        loser.rollback().await.unwrap();
        winner.commit().await.unwrap();

        assert_eq!(store.ledger_ids(), vec![0, 7]);
    }

    #[tokio::test]
    async fn test_scan_errors_prevent_any_migration() {
        let (tmp, store) = bootstrapped();
        write(tmp.path(), "7-a.sql", "create table a ();");
        write(tmp.path(), "7-b.sql", "create table b ();");

        let result = runner(tmp.path(), &store).run_migrations(None).await;
        assert!(matches!(result, Err(DriftError::DuplicateId { .. })));
        assert!(store.executed().is_empty());
        assert!(store.ledger_ids().is_empty());
    }
}
