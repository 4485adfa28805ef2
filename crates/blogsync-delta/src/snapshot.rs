//! Listing-diff deltas
//!
//! Providers without a change feed (a local directory, the Mac agent) are
//! synchronized by listing the remote tree, diffing it against the local
//! mirror and emitting the records that would make the mirror match. The
//! cursor is a digest of the remote listing, so an unchanged remote yields
//! an empty page without touching the mirror.

use blogsync_fs::checksum::compute_bytes_checksum;
use blogsync_fs::{LocalTreeEntry, NormalizedPath, should_ignore};
use std::collections::HashMap;
use std::path::Path;

use crate::{ChangeRecord, DeltaPage, DeltaResult, RemoteEntry, RemoteTree, SyncCursor};

/// Digest of a listing, stable under reordering.
pub fn listing_digest(entries: &[RemoteEntry]) -> SyncCursor {
    let mut lines: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "{}\t{}\t{}\t{}\t{}\n",
                e.path,
                e.is_directory,
                e.size.map(|s| s.to_string()).unwrap_or_default(),
                e.content_hash.as_ref().map(|h| h.value()).unwrap_or_default(),
                e.modified.map(|m| m.timestamp().to_string()).unwrap_or_default(),
            )
        })
        .collect();
    lines.sort();
    SyncCursor::new(compute_bytes_checksum(lines.concat().as_bytes()))
}

/// Records that turn the `local` tree into the `remote` tree.
///
/// Deletions come first (only the topmost removed path of a subtree),
/// followed by creations and updates in path order. A local entry whose
/// casing or type differs from the remote is deleted and re-created.
/// Files are considered changed when size or whole-second mtime differ.
pub fn diff_listing(remote: &[RemoteEntry], local: &[LocalTreeEntry]) -> Vec<ChangeRecord> {
    let remote_by_key: HashMap<String, &RemoteEntry> =
        remote.iter().map(|e| (e.path.lookup_key(), e)).collect();

    let mut local_sorted: Vec<&LocalTreeEntry> = local.iter().collect();
    local_sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut removed: Vec<NormalizedPath> = Vec::new();
    let mut records = Vec::new();

    for entry in &local_sorted {
        if removed.iter().any(|r| entry.path.starts_with_ignore_case(r)) {
            continue;
        }
        let keep = match remote_by_key.get(&entry.path.lookup_key()) {
            Some(remote) => remote.is_directory == entry.is_directory && remote.path == entry.path,
            None => false,
        };
        if !keep {
            records.push(ChangeRecord::deleted(entry.path.clone()));
            removed.push(entry.path.clone());
        }
    }

    let local_by_key: HashMap<String, &LocalTreeEntry> = local_sorted
        .iter()
        .filter(|e| !removed.iter().any(|r| e.path.starts_with_ignore_case(r)))
        .map(|e| (e.path.lookup_key(), *e))
        .collect();

    let mut remote_sorted: Vec<&RemoteEntry> = remote.iter().collect();
    remote_sorted.sort_by(|a, b| a.path.cmp(&b.path));

    for entry in remote_sorted {
        let changed = match local_by_key.get(&entry.path.lookup_key()) {
            None => true,
            Some(_) if entry.is_directory => false,
            Some(existing) => file_differs(entry, existing),
        };
        if changed {
            records.push(entry.to_change());
        }
    }

    records
}

fn file_differs(remote: &RemoteEntry, local: &LocalTreeEntry) -> bool {
    if remote.size != local.size {
        return true;
    }
    match (remote.modified, local.modified) {
        (Some(r), Some(l)) => r.timestamp() != l.timestamp(),
        _ => false,
    }
}

/// Build a delta page by diffing a remote listing against the mirror.
pub async fn snapshot_changes(
    tree: &dyn RemoteTree,
    mirror_root: &Path,
    cursor: Option<&SyncCursor>,
) -> DeltaResult<DeltaPage> {
    let remote: Vec<RemoteEntry> = tree
        .list_recursive()
        .await?
        .into_iter()
        .filter(|e| !should_ignore(e.path.as_str()))
        .collect();
    let digest = listing_digest(&remote);

    if cursor == Some(&digest) {
        tracing::debug!(cursor = %digest, "Remote listing unchanged");
        return Ok(DeltaPage {
            entries: Vec::new(),
            cursor: digest,
            has_more: false,
            reset: false,
        });
    }

    let local = blogsync_fs::tree::list_recursive(mirror_root, &NormalizedPath::root()).await?;
    let entries = diff_listing(&remote, &local);
    tracing::debug!(changes = entries.len(), cursor = %digest, "Computed snapshot delta");

    Ok(DeltaPage {
        entries,
        cursor: digest,
        has_more: false,
        reset: false,
    })
}
