use tracing::info;

use crate::config::DriftConfig;

/// Print the renames needed to zero-pad migration IDs, applying them when
/// `write` is set
pub fn run(config: &DriftConfig, write: bool) -> anyhow::Result<()> {
    let renames = drift::renumber(&config.migrations_dir, write)?;
    if renames.is_empty() {
        info!("Migration files already sort in ID order");
        return Ok(());
    }

    for rename in &renames {
        println!("{}", rename);
    }
    if !write {
        info!("Dry run, {} file(s) left unchanged; pass --write to rename them", renames.len());
    }
    Ok(())
}
