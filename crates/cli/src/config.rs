//! Configuration for the drift command line tool
//!
//! Values are resolved in this order, first match wins:
//! command-line flags, `DRIFT_*` environment variables, the config file
//! (`drift.toml` by default), built-in defaults.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Config file read from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "drift.toml";

pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

pub const ENV_MIGRATIONS_DIR: &str = "DRIFT_MIGRATIONS_DIR";
pub const ENV_DATABASE_URL: &str = "DRIFT_DATABASE_URL";
/// Fallback for the database URL, as used by most Postgres tooling
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";

/// Contents of a `drift.toml` file
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub migrations_dir: Option<PathBuf>,
    pub database_url: Option<String>,
}

impl FileConfig {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Like [`FileConfig::read`], but a missing file is not an error
    pub fn read_optional(path: &Path) -> anyhow::Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map(Some)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("could not read config file {}", path.display())),
        }
    }

    fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub migrations_dir: Option<PathBuf>,
    pub database_url: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftConfig {
    pub migrations_dir: PathBuf,
    pub database_url: Option<String>,
}

impl DriftConfig {
    /// Resolve the configuration from flags, the process environment and the
    /// config file
    pub fn load(overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let file = match &overrides.config_path {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::read_optional(Path::new(DEFAULT_CONFIG_FILE))?.unwrap_or_default(),
        };
        Ok(Self::resolve(overrides, |key| std::env::var(key).ok(), file))
    }

    fn resolve(
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
        file: FileConfig,
    ) -> Self {
        let env = |key: &str| env(key).filter(|value| !value.is_empty());

        let migrations_dir = overrides
            .migrations_dir
            .clone()
            .or_else(|| env(ENV_MIGRATIONS_DIR).map(PathBuf::from))
            .or(file.migrations_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR));

        let database_url = overrides
            .database_url
            .clone()
            .or_else(|| env(ENV_DATABASE_URL))
            .or_else(|| env(ENV_DATABASE_URL_FALLBACK))
            .or(file.database_url);

        Self {
            migrations_dir,
            database_url,
        }
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "no database URL configured; pass --database-url, set {} or add database-url to {}",
                ENV_DATABASE_URL,
                DEFAULT_CONFIG_FILE
            ),
        }
    }
}
