//! Local directory listings used for diffing against remote state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::is_preview_name;
use crate::ignore::is_ignored_segment;
use crate::io::is_temp_name;
use crate::{Error, NormalizedPath, Result};

/// One row of a local directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntryDescriptor {
    pub name: String,
    pub is_directory: bool,
    /// Size in bytes; `None` for directories
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// A descriptor together with its blog-relative path, as produced by
/// [`list_recursive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTreeEntry {
    pub path: NormalizedPath,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// List one directory of the blog folder.
///
/// Ignored system files and atomic-write temp files are filtered out.
/// Entries are sorted by name.
pub async fn read_dir(root: &Path, relative: &NormalizedPath) -> Result<Vec<LocalEntryDescriptor>> {
    let dir = relative.to_native(root);
    let mut reader = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| Error::io(&dir, e))?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await.map_err(|e| Error::io(&dir, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored_segment(&name) || is_temp_name(&name) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                // Vanished between listing and stat
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let is_directory = metadata.is_dir();
        entries.push(LocalEntryDescriptor {
            name,
            is_directory,
            size: if is_directory { None } else { Some(metadata.len()) },
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Recursively list everything below `relative` (exclusive).
///
/// Returns an empty listing when the start directory does not exist.
/// Draft preview placeholders are generated locally and left out.
/// Output is sorted by path so parents precede their children.
pub async fn list_recursive(root: &Path, relative: &NormalizedPath) -> Result<Vec<LocalTreeEntry>> {
    let start = relative.to_native(root);
    if tokio::fs::metadata(&start).await.is_err() {
        return Ok(Vec::new());
    }

    let mut pending = vec![relative.clone()];
    let mut listing = Vec::new();

    while let Some(dir) = pending.pop() {
        for entry in read_dir(root, &dir).await? {
            if !entry.is_directory && is_preview_name(&entry.name) {
                continue;
            }
            let path = dir.join(&entry.name);
            if entry.is_directory {
                pending.push(path.clone());
            }
            listing.push(LocalTreeEntry {
                path,
                is_directory: entry.is_directory,
                size: entry.size,
                modified: entry.modified,
            });
        }
    }

    listing.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(listing)
}
