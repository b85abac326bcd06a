use crate::config::DriftConfig;

pub fn run(config: &DriftConfig) -> anyhow::Result<()> {
    let path = drift::setup(&config.migrations_dir)?;
    println!("Wrote {}", path.display());
    Ok(())
}
