//! Full resynchronisation between a blog folder and its remote
//!
//! Unlike the change feed, a resync compares complete listings. Pulling
//! makes the local folder match the remote; pushing makes the remote
//! match the local folder.

use blogsync_delta::snapshot::diff_listing;
use blogsync_delta::{ChangeKind, RemoteEntry, RemoteProvider, RemoteTree, RemoteWriter};
use blogsync_fs::tree::{LocalTreeEntry, list_recursive};
use blogsync_fs::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::lock::FolderHandle;
use crate::reconcile::{ApplyFailure, ApplyOperation, ApplyReport, ReconcileOptions, Reconciler};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Remote to local
    #[default]
    Pull,
    /// Local to remote
    Push,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pull" => Ok(Direction::Pull),
            "push" => Ok(Direction::Push),
            other => Err(format!("unknown direction: {other} (expected pull or push)")),
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub deleted: Vec<NormalizedPath>,
    pub created_dirs: Vec<NormalizedPath>,
    pub uploaded: Vec<NormalizedPath>,
    /// Local placeholders left out so the remote originals survive
    pub skipped_placeholders: Vec<NormalizedPath>,
    pub failures: Vec<ApplyFailure>,
}

fn unsupported(provider: &dyn RemoteProvider, operation: &str) -> Error {
    Error::UnsupportedOperation {
        provider: provider.provider(),
        operation: operation.to_string(),
    }
}

fn tree_of<'a>(provider: &'a dyn RemoteProvider, operation: &str) -> Result<&'a dyn RemoteTree> {
    provider.tree().ok_or_else(|| unsupported(provider, operation))
}

/// Make `root` match the remote listing.
pub async fn pull(
    provider: &dyn RemoteProvider,
    root: &Path,
    options: &ReconcileOptions,
    guard: &FolderHandle,
) -> Result<ApplyReport> {
    let remote = tree_of(provider, "pull resync")?.list_recursive().await?;
    let local = list_recursive(root, &NormalizedPath::root()).await?;
    let changes = diff_listing(&remote, &local);
    tracing::info!(blog_id = %guard.blog_id(), changes = changes.len(), "Pull resync");

    Reconciler::new(root, provider, options)
        .with_guard(guard)
        .apply(changes)
        .await
}

/// Make the remote match `root`.
///
/// Runs deletions, then folder creations, then uploads. Uploads carry the
/// local mtime so the next comparison sees the files as unchanged.
///
/// `placeholders` holds the lookup keys of empty stand-ins written in
/// place of skipped remote files. They are never uploaded, and the remote
/// file they stand for is never deleted.
pub async fn push(
    provider: &dyn RemoteProvider,
    root: &Path,
    guard: &FolderHandle,
    placeholders: &BTreeSet<String>,
) -> Result<PushReport> {
    let writer = provider
        .writer()
        .ok_or_else(|| unsupported(provider, "push resync"))?;
    let remote = tree_of(provider, "push resync")?.list_recursive().await?;
    let local = list_recursive(root, &NormalizedPath::root()).await?;

    // Same diff with the roles swapped: local is the source of truth
    let local_as_source: Vec<RemoteEntry> = local
        .iter()
        .map(|e| RemoteEntry {
            path: e.path.clone(),
            is_directory: e.is_directory,
            size: e.size,
            content_hash: None,
            modified: e.modified,
        })
        .collect();
    let remote_as_mirror: Vec<LocalTreeEntry> = remote
        .iter()
        .map(|e| LocalTreeEntry {
            path: e.path.clone(),
            is_directory: e.is_directory,
            size: e.size,
            modified: e.modified,
        })
        .collect();

    // Placeholders still sitting in the folder, by lookup key
    let stand_ins: BTreeSet<String> = local
        .iter()
        .filter(|e| !e.is_directory && e.size == Some(0))
        .map(|e| e.path.lookup_key())
        .filter(|key| placeholders.contains(key))
        .collect();

    let mut report = PushReport::default();
    let changes: Vec<_> = diff_listing(&local_as_source, &remote_as_mirror)
        .into_iter()
        .filter(|change| {
            let key = change.path.lookup_key();
            if !stand_ins.contains(&key) {
                return true;
            }
            if change.kind == ChangeKind::File {
                tracing::debug!(path = %change.path, "Not pushing placeholder");
                report.skipped_placeholders.push(change.path.clone());
            }
            // A delete of the same key only differs from the placeholder by case
            false
        })
        .collect();
    tracing::info!(blog_id = %guard.blog_id(), changes = changes.len(), "Push resync");

    let phases = [ChangeKind::Deleted, ChangeKind::Folder, ChangeKind::File];

    for phase in phases {
        for change in changes.iter().filter(|c| c.kind == phase) {
            guard.ensure_held().await?;
            let path = &change.path;
            let (operation, result) = match phase {
                ChangeKind::Deleted => (ApplyOperation::Delete, writer.delete(path).await),
                ChangeKind::Folder => (ApplyOperation::Mkdir, writer.mkdir(path).await),
                ChangeKind::File => (ApplyOperation::Download, upload(writer, root, path, change.modified).await),
            };

            match result {
                Ok(()) => match phase {
                    ChangeKind::Deleted => report.deleted.push(path.clone()),
                    ChangeKind::Folder => report.created_dirs.push(path.clone()),
                    ChangeKind::File => report.uploaded.push(path.clone()),
                },
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to push change");
                    report.failures.push(ApplyFailure {
                        path: path.clone(),
                        operation,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(report)
}

async fn upload(
    writer: &dyn RemoteWriter,
    root: &Path,
    path: &NormalizedPath,
    modified: Option<chrono::DateTime<chrono::Utc>>,
) -> blogsync_delta::DeltaResult<()> {
    let native = path.to_native(root);
    let content = tokio::fs::read(&native)
        .await
        .map_err(|e| blogsync_fs::Error::io(&native, e))?;
    writer.upload(path, content, modified).await
}
