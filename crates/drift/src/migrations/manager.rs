//! Migration Manager - File system operations for migrations
//!
//! Scans the migrations directory and implements the authoring commands
//! (`setup`, `new_file`, `renumber`). Nothing here touches the database.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::definitions::{MigrationConfig, MigrationFile, MigrationId, Rename};
use super::filename::FilenameCodec;
use crate::error::{DriftError, DriftResult};

/// Content of the bootstrap migration written by [`MigrationManager::setup`]
pub const INIT_SQL: &str = include_str!("init.sql");

/// Placeholder content for new migration files
pub const DEFAULT_TEMPLATE: &str = "-- Write your migration here.\n";

/// Migration manager for scanning and authoring migration files
#[derive(Debug, Clone)]
pub struct MigrationManager {
    config: MigrationConfig,
    codec: FilenameCodec,
}

impl MigrationManager {
    /// Create a manager for the given configuration
    pub fn with_config(config: MigrationConfig) -> DriftResult<Self> {
        Ok(Self {
            config,
            codec: FilenameCodec::new()?,
        })
    }

    /// Create a manager for a migrations directory
    pub fn for_dir(migrations_dir: impl Into<PathBuf>) -> DriftResult<Self> {
        Self::with_config(MigrationConfig::new(migrations_dir))
    }

    fn dir(&self) -> &Path {
        &self.config.migrations_dir
    }

    /// List and read every migration file in the directory
    ///
    /// Any entry that does not fit the naming convention fails the whole scan,
    /// as does an ID shared by two files. The result is in directory listing
    /// order.
    pub fn scan(&self) -> DriftResult<Vec<MigrationFile>> {
        let dir = self.dir();
        let entries = fs::read_dir(dir)
            .map_err(|e| DriftError::io_at("could not list migration files in", dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| DriftError::io_at("could not list migration files in", dir, e))?;
            let name = entry.file_name().into_string().map_err(|name| {
                DriftError::InvalidFilename {
                    name: name.to_string_lossy().into_owned(),
                }
            })?;

            let decoded = self
                .codec
                .decode(&name)
                .ok_or_else(|| DriftError::InvalidFilename { name: name.clone() })?;
            let id: MigrationId = decoded.raw_id.parse()?;
            let raw_id = decoded.raw_id.to_string();
            let slug = decoded.slug.to_string();

            let path = entry.path();
            let content = fs::read_to_string(&path)
                .map_err(|e| DriftError::io_at("could not read migration file", &path, e))?;

            debug!(id = %id, file = %name, "found migration file");
            files.push(MigrationFile {
                path,
                name,
                content,
                id,
                slug,
                raw_id,
            });
        }

        check_duplicates(&files)?;
        Ok(files)
    }

    /// Write the bootstrap migration `0-init.sql`
    ///
    /// Creates the directory if needed and refuses to run when a file with
    /// ID 0 already exists, whatever its padding or slug.
    pub fn setup(&self) -> DriftResult<PathBuf> {
        let dir = self.dir();
        fs::create_dir_all(dir)
            .map_err(|e| DriftError::io_at("could not create migrations directory", dir, e))?;

        let name = self.codec.encode(0, MigrationId::INIT, "init");
        if let Some(existing) = self.scan()?.into_iter().find(|f| f.id == MigrationId::INIT) {
            return Err(DriftError::DuplicateId {
                id: MigrationId::INIT,
                first: existing.name,
                second: name,
            });
        }

        // create_new still guards against a concurrent setup
        let path = dir.join(name);
        write_new_file(&path, INIT_SQL)?;
        info!(path = %path.display(), "wrote bootstrap migration");
        Ok(path)
    }

    /// Create a new migration file and return its path
    ///
    /// Without an explicit `id` the current Unix timestamp is used. The ID is
    /// zero-padded to the digit width of the largest ID already in the
    /// directory.
    pub fn new_file(
        &self,
        id: Option<MigrationId>,
        slug: &str,
        template: Option<&str>,
    ) -> DriftResult<PathBuf> {
        let id = match id {
            Some(id) => id,
            None => MigrationId::now()?,
        };

        let files = self.scan()?;
        let width = files.iter().map(|f| f.id.width()).max().unwrap_or(0);
        let name = self.codec.encode(width, id, &self.codec.slugify(slug));

        if let Some(existing) = files.iter().find(|f| f.id == id) {
            return Err(DriftError::DuplicateId {
                id,
                first: existing.name.clone(),
                second: name,
            });
        }

        let path = self.dir().join(&name);
        write_new_file(&path, template.unwrap_or(DEFAULT_TEMPLATE))?;
        info!(path = %path.display(), "created migration file");
        Ok(path)
    }

    /// Zero-pad file names so that alphabetical and numeric order agree
    ///
    /// Every proposed rename is returned, ordered by ID. Files are only
    /// renamed on disk when `write` is true.
    pub fn renumber(&self, write: bool) -> DriftResult<Vec<Rename>> {
        let mut files = self.scan()?;
        let Some(max_width) = files.iter().map(|f| f.id.width()).max() else {
            return Ok(Vec::new());
        };

        files.sort_by_key(|f| f.id);
        let renames: Vec<Rename> = files
            .iter()
            .filter(|f| f.raw_id.len() < max_width)
            .map(|f| Rename {
                from: f.path.clone(),
                to: f.path.with_file_name(self.codec.encode(max_width, f.id, &f.slug)),
            })
            .collect();

        if write {
            for rename in &renames {
                fs::rename(&rename.from, &rename.to).map_err(|e| {
                    DriftError::io(format!("could not rename {}", rename), e)
                })?;
                info!("renamed {}", rename);
            }
        } else {
            debug!(count = renames.len(), "dry run, no files renamed");
        }

        Ok(renames)
    }
}

fn check_duplicates(files: &[MigrationFile]) -> DriftResult<()> {
    let mut seen: HashMap<MigrationId, &MigrationFile> = HashMap::new();
    for file in files {
        if let Some(other) = seen.insert(file.id, file) {
            return Err(DriftError::DuplicateId {
                id: file.id,
                first: other.name.clone(),
                second: file.name.clone(),
            });
        }
    }
    Ok(())
}

/// Like `fs::write`, but fails if the file already exists
fn write_new_file(path: &Path, content: &str) -> DriftResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| DriftError::io_at("could not create migration file", path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| DriftError::io_at("could not write migration file", path, e))
}
