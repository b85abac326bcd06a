use anyhow::Context;
use drift::MigrationId;
use std::fs;
use std::path::Path;

use crate::config::DriftConfig;

/// Create a migration file and print its path
pub fn run(
    config: &DriftConfig,
    id: Option<MigrationId>,
    slug: &str,
    template: Option<&Path>,
) -> anyhow::Result<()> {
    let template = template
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("could not read template {}", path.display()))
        })
        .transpose()?;

    let path = drift::new_file(&config.migrations_dir, id, slug, template.as_deref())?;
    println!("{}", path.display());
    Ok(())
}
