//! Change records and cursors

use blogsync_fs::NormalizedPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    File,
    Folder,
    Deleted,
}

/// A provider-declared content hash.
///
/// The variant says which algorithm produced the value so the reconciler
/// can compute the matching hash of the local file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ContentHash {
    /// Dropbox block hash (SHA-256 of the per-4MiB-block SHA-256 digests)
    Dropbox(String),
    /// Canonical `sha256:<hex>`
    Sha256(String),
    /// Google Drive `md5Checksum`
    Md5(String),
}

impl ContentHash {
    pub fn value(&self) -> &str {
        match self {
            ContentHash::Dropbox(v) | ContentHash::Sha256(v) | ContentHash::Md5(v) => v,
        }
    }
}

/// One remote-side mutation, relative to the blog folder root.
///
/// `path` keeps the provider's display casing. Use
/// [`ChangeRecord::lookup_key`] when comparing against other paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: NormalizedPath,
    pub kind: ChangeKind,
    pub size: Option<u64>,
    pub content_hash: Option<ContentHash>,
    pub modified: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    pub fn file(path: impl Into<NormalizedPath>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::File,
            size: Some(size),
            content_hash: None,
            modified: None,
        }
    }

    pub fn folder(path: impl Into<NormalizedPath>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Folder,
            size: None,
            content_hash: None,
            modified: None,
        }
    }

    pub fn deleted(path: impl Into<NormalizedPath>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Deleted,
            size: None,
            content_hash: None,
            modified: None,
        }
    }

    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Lowercased path used for case-insensitive matching.
    pub fn lookup_key(&self) -> String {
        self.path.lookup_key()
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}

/// Opaque resume token. Only ever compared and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Cursors can be long; logs only need enough to tell them apart
        let shown: String = self.0.chars().take(16).collect();
        if shown.len() < self.0.len() {
            write!(f, "{shown}...")
        } else {
            f.write_str(&shown)
        }
    }
}

/// One page of changes returned by a [`crate::DeltaSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPage {
    pub entries: Vec<ChangeRecord>,
    /// Cursor to persist once `entries` are applied
    pub cursor: SyncCursor,
    pub has_more: bool,
    /// The provider invalidated the previous cursor and this page starts a
    /// full listing. Callers must tolerate re-applying everything.
    pub reset: bool,
}

/// One row of a full recursive remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: NormalizedPath,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub content_hash: Option<ContentHash>,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// The change record that would create this entry locally.
    pub fn to_change(&self) -> ChangeRecord {
        ChangeRecord {
            path: self.path.clone(),
            kind: if self.is_directory {
                ChangeKind::Folder
            } else {
                ChangeKind::File
            },
            size: self.size,
            content_hash: self.content_hash.clone(),
            modified: self.modified,
        }
    }
}
