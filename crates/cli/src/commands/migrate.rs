use anyhow::{anyhow, Context};
use drift::{MigrationId, PgStore};
use tracing::{info, warn};

use crate::config::DriftConfig;

/// Apply pending migrations, rolling back the one in progress on Ctrl-C
pub async fn run(config: &DriftConfig, until: Option<MigrationId>) -> anyhow::Result<()> {
    let store = PgStore::connect(config.database_url()?)
        .await
        .context("could not open database connection")?;

    let outcome = tokio::select! {
        result = drift::migrate(&store, &config.migrations_dir, until) => {
            result.map_err(anyhow::Error::from)
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, rolling back the migration in progress");
            Err(anyhow!("interrupted before all migrations were applied"))
        }
    };
    // Closing the pool ends the session, so the server discards a
    // transaction abandoned by the interrupt.
    store.pool().close().await;

    let result = outcome?;
    info!(
        applied = result.applied_count(),
        already_applied = result.skipped_count,
        elapsed_ms = result.execution_time_ms as u64,
        "All migrations applied"
    );
    Ok(())
}
