//! Filename Codec - the `<id>-<slug>.sql` naming convention
//!
//! Some examples of names:
//!
//! - `0-init.sql`
//! - `1650000000-create_users.sql`
//! - `0005-add_index.sql`

use regex::Regex;

use super::definitions::MigrationId;
use crate::error::DriftResult;

/// Parsed pieces of a migration file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedName<'a> {
    /// ID digits as written, zero padding included
    pub raw_id: &'a str,
    pub slug: &'a str,
}

/// Encodes and decodes migration file names
#[derive(Debug, Clone)]
pub struct FilenameCodec {
    filename_regex: Regex,
    separator_regex: Regex,
}

impl FilenameCodec {
    pub fn new() -> DriftResult<Self> {
        Ok(Self {
            // ASCII digits only; `\d` would also accept other Unicode digits.
            filename_regex: Regex::new(r"^(?P<id>[0-9]+)-(?P<slug>.*)\.sql$")?,
            separator_regex: Regex::new(r"[\-\s._/]+")?,
        })
    }

    /// Build a file name, left-padding the ID with zeros to `width` digits
    pub fn encode(&self, width: usize, id: MigrationId, slug: &str) -> String {
        format!("{:0width$}-{}.sql", id.get(), slug, width = width)
    }

    /// Split a file name into its ID digits and slug, if it fits the pattern
    pub fn decode<'a>(&self, filename: &'a str) -> Option<DecodedName<'a>> {
        let captures = self.filename_regex.captures(filename)?;
        Some(DecodedName {
            raw_id: captures.name("id")?.as_str(),
            slug: captures.name("slug")?.as_str(),
        })
    }

    /// Collapse runs of separator characters into a single underscore
    pub fn slugify(&self, raw: &str) -> String {
        self.separator_regex.replace_all(raw, "_").into_owned()
    }
}
