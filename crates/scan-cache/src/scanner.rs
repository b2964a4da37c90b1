//! Fast directory listing and sorting

use crate::ScanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Extensions (lowercase, without dot) the browser can display
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heif", "heic", "hif"];

const HEIF_EXTENSIONS: &[&str] = &["heif", "heic", "hif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "dir")]
    Container,
    #[serde(rename = "image")]
    Image,
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Mod-time until the capture-date overlay supersedes it
    pub date: DateTime<Utc>,
    /// Byte size, always 0 for containers
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Entry {
    pub fn is_image(&self) -> bool {
        self.kind == EntryKind::Image
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Name,
    Date,
    Size,
}

impl SortField {
    /// Parse a query value; anything unrecognised sorts by name
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "date" => Self::Date,
            "size" => Self::Size,
            _ => Self::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Parse a query value; anything unrecognised is ascending
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether `name` has an extension the browser can show
pub fn is_supported_image(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether `name` is a HEIF-family file
pub fn is_heif(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| HEIF_EXTENSIONS.contains(&ext.as_str()))
}

/// List the immediate children of `dir` that are directories or supported
/// images. Hidden names and entries whose metadata cannot be read are skipped.
/// Dates are mod-times; capture dates are resolved later in the background.
pub fn scan_directory(dir: &Path) -> Result<Vec<Entry>, ScanError> {
    let read_dir = fs::read_dir(dir).map_err(|source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let Ok(dir_entry) = dir_entry else {
            continue;
        };
        let Ok(name) = dir_entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let metadata = match dir_entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(name = %name, error = %err, "skipping entry with unreadable metadata");
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let date = DateTime::<Utc>::from(modified);

        if metadata.is_dir() {
            entries.push(Entry {
                name,
                kind: EntryKind::Container,
                date,
                size: 0,
            });
        } else if is_supported_image(&name) {
            entries.push(Entry {
                name,
                kind: EntryKind::Image,
                date,
                size: metadata.len(),
            });
        }
    }

    info!(dir = %dir.display(), count = entries.len(), "scanned directory");
    Ok(entries)
}

/// Stable sort with containers always ahead of images. The field and order
/// only apply within each partition.
pub fn sort_entries(entries: &mut [Entry], field: SortField, order: SortOrder) {
    entries.sort_by(|a, b| {
        match (a.kind, b.kind) {
            (EntryKind::Container, EntryKind::Image) => return Ordering::Less,
            (EntryKind::Image, EntryKind::Container) => return Ordering::Greater,
            _ => {}
        }

        let ordering = match field {
            SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortField::Date => a.date.cmp(&b.date),
            SortField::Size => a.size.cmp(&b.size),
        };

        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}
