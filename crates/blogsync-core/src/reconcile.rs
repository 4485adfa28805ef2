//! Applying remote changes to the local blog folder
//!
//! A batch runs in three phases: deletions, then folder creations, then
//! file downloads. Deleting first frees names a later folder needs;
//! creating folders first gives downloads their parents. Failures of single
//! items are recorded and the batch carries on. The only error that stops
//! a batch is losing the folder lock.

use blogsync_delta::{ChangeKind, ChangeRecord, ContentHash, RemoteReader};
use blogsync_fs::case::{resolve_case_sensitive_path, resolve_target_path};
use blogsync_fs::checksum::{compute_file_checksum, dropbox_file_hash};
use blogsync_fs::io::{RobustnessConfig, set_modified, write_atomic_async, write_placeholder};
use blogsync_fs::{NormalizedPath, should_ignore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

use crate::Result;
use crate::lock::FolderHandle;

#[cfg(target_os = "linux")]
const ENAMETOOLONG: i32 = 36;
#[cfg(not(target_os = "linux"))]
const ENAMETOOLONG: i32 = 63;

/// Default limit above which files are replaced by placeholders.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 30 * 1024 * 1024;

/// What to do when the remote wants a folder where a local file sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MkdirConflictPolicy {
    /// Leave the file alone and create the folder beside it where the
    /// filesystem allows; otherwise record a failure
    #[default]
    Preserve,
    /// Remove the file and create the folder in its place
    ReplaceFile,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub max_file_size: u64,
    /// Lower-case extensions written as placeholders instead of downloaded
    pub unsupported_extensions: Vec<String>,
    pub mkdir_conflict: MkdirConflictPolicy,
    pub robustness: RobustnessConfig,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            unsupported_extensions: Vec::new(),
            mkdir_conflict: MkdirConflictPolicy::default(),
            robustness: RobustnessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOperation {
    Delete,
    Mkdir,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyFailure {
    pub path: NormalizedPath,
    pub operation: ApplyOperation,
    pub message: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub deleted: Vec<NormalizedPath>,
    pub created_dirs: Vec<NormalizedPath>,
    pub downloaded: Vec<NormalizedPath>,
    pub skipped_unchanged: Vec<NormalizedPath>,
    pub placeholders: Vec<NormalizedPath>,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyReport {
    /// Paths whose local state changed, deletions first.
    pub fn touched(&self) -> Vec<NormalizedPath> {
        self.deleted
            .iter()
            .chain(&self.created_dirs)
            .chain(&self.downloaded)
            .chain(&self.placeholders)
            .cloned()
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &NormalizedPath, operation: ApplyOperation, message: impl ToString) {
        let message = message.to_string();
        tracing::warn!(path = %path, ?operation, error = %message, "Failed to apply change");
        self.failures.push(ApplyFailure {
            path: path.clone(),
            operation,
            message,
        });
    }
}

/// Changes grouped into the three phases.
#[derive(Debug, Default)]
struct Plan {
    deletes: Vec<NormalizedPath>,
    mkdirs: Vec<NormalizedPath>,
    downloads: Vec<ChangeRecord>,
}

impl Plan {
    /// Group a batch, preserving what it means when replayed in order.
    ///
    /// A deletion cancels earlier creations at or below its path, since
    /// deletions run first. A later record for a path replaces an earlier
    /// creation of the same path.
    fn from_changes(changes: Vec<ChangeRecord>) -> Self {
        let mut kept: Vec<Option<ChangeRecord>> = Vec::with_capacity(changes.len());
        // Live creations by lookup key
        let mut creations: HashMap<String, usize> = HashMap::new();

        for change in changes {
            if should_ignore(change.path.as_str()) || change.path.is_root() {
                continue;
            }
            let key = change.path.lookup_key();
            if change.is_deleted() {
                let below = format!("{key}/");
                creations.retain(|created, &mut index| {
                    let cancelled = *created == key || created.starts_with(&below);
                    if cancelled {
                        kept[index] = None;
                    }
                    !cancelled
                });
            } else if let Some(index) = creations.insert(key, kept.len()) {
                kept[index] = None;
            }
            kept.push(Some(change));
        }

        let mut plan = Plan::default();
        for change in kept.into_iter().flatten() {
            match change.kind {
                ChangeKind::Deleted => plan.deletes.push(change.path),
                ChangeKind::Folder => plan.mkdirs.push(change.path),
                ChangeKind::File => plan.downloads.push(change),
            }
        }
        plan.mkdirs.sort_by_key(|p| p.depth());
        plan
    }
}

/// Applies change batches to one blog folder.
pub struct Reconciler<'a> {
    root: &'a Path,
    reader: &'a dyn RemoteReader,
    options: &'a ReconcileOptions,
    guard: Option<&'a FolderHandle>,
}

impl<'a> Reconciler<'a> {
    pub fn new(root: &'a Path, reader: &'a dyn RemoteReader, options: &'a ReconcileOptions) -> Self {
        Self {
            root,
            reader,
            options,
            guard: None,
        }
    }

    /// Check the lock before every item.
    pub fn with_guard(mut self, guard: &'a FolderHandle) -> Self {
        self.guard = Some(guard);
        self
    }

    async fn ensure_held(&self) -> Result<()> {
        match self.guard {
            Some(guard) => guard.ensure_held().await,
            None => Ok(()),
        }
    }

    /// Apply a batch of changes.
    ///
    /// # Errors
    ///
    /// Only [`crate::Error::LockCompromised`]; every other failure lands in
    /// [`ApplyReport::failures`].
    pub async fn apply(&self, changes: Vec<ChangeRecord>) -> Result<ApplyReport> {
        let plan = Plan::from_changes(changes);
        let mut report = ApplyReport::default();

        for path in &plan.deletes {
            self.ensure_held().await?;
            match self.delete(path).await {
                Ok(true) => report.deleted.push(path.clone()),
                Ok(false) => {}
                Err(e) => report.fail(path, ApplyOperation::Delete, e),
            }
        }

        for path in &plan.mkdirs {
            self.ensure_held().await?;
            match self.mkdir(path).await {
                Ok(true) => report.created_dirs.push(path.clone()),
                Ok(false) => {}
                Err(e) => report.fail(path, ApplyOperation::Mkdir, e),
            }
        }

        for change in &plan.downloads {
            self.ensure_held().await?;
            match self.download(change).await {
                Ok(Downloaded::Written) => report.downloaded.push(change.path.clone()),
                Ok(Downloaded::Unchanged) => report.skipped_unchanged.push(change.path.clone()),
                Ok(Downloaded::Placeholder) => report.placeholders.push(change.path.clone()),
                Err(e) => report.fail(&change.path, ApplyOperation::Download, e),
            }
        }

        tracing::debug!(
            deleted = report.deleted.len(),
            created_dirs = report.created_dirs.len(),
            downloaded = report.downloaded.len(),
            unchanged = report.skipped_unchanged.len(),
            failures = report.failures.len(),
            "Applied batch"
        );
        Ok(report)
    }

    /// Remove a path recursively. `Ok(false)` when there was nothing to do.
    async fn delete(&self, path: &NormalizedPath) -> std::io::Result<bool> {
        let target = resolve_case_sensitive_path(self.root, path).await;

        let removed = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };

        match removed {
            Ok(()) => Ok(true),
            Err(e) if is_benign_delete_error(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Ensure a folder exists. `Ok(false)` when it already did.
    async fn mkdir(&self, path: &NormalizedPath) -> std::io::Result<bool> {
        let existing = resolve_case_sensitive_path(self.root, path).await;

        match tokio::fs::symlink_metadata(&existing).await {
            Ok(metadata) if metadata.is_dir() => Ok(false),
            Ok(_) => {
                tracing::warn!(
                    path = %path,
                    policy = ?self.options.mkdir_conflict,
                    "A file occupies the path of a remote folder"
                );
                match self.options.mkdir_conflict {
                    MkdirConflictPolicy::Preserve => {
                        let verbatim = resolve_target_path(self.root, path).await;
                        tokio::fs::create_dir(&verbatim).await?;
                    }
                    MkdirConflictPolicy::ReplaceFile => {
                        tokio::fs::remove_file(&existing).await?;
                        tokio::fs::create_dir_all(&existing).await?;
                    }
                }
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&existing).await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn download(&self, change: &ChangeRecord) -> std::result::Result<Downloaded, String> {
        let target = resolve_target_path(self.root, &change.path).await;

        if self.is_unsupported(&change.path) || change.size.is_some_and(|s| s > self.options.max_file_size) {
            return self.placeholder(&change.path, &target).await;
        }

        if local_matches(&target, change).await {
            return Ok(Downloaded::Unchanged);
        }

        let content = self.reader.download(&change.path).await.map_err(|e| e.to_string())?;
        if content.len() as u64 > self.options.max_file_size {
            return self.placeholder(&change.path, &target).await;
        }

        write_atomic_async(&target, content, self.options.robustness)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(modified) = change.modified {
            set_modified(&target, modified.into()).await.map_err(|e| e.to_string())?;
        }
        Ok(Downloaded::Written)
    }

    async fn placeholder(&self, path: &NormalizedPath, target: &Path) -> std::result::Result<Downloaded, String> {
        tracing::debug!(path = %path, "Writing placeholder for skipped file");
        write_placeholder(target).await.map_err(|e| e.to_string())?;
        Ok(Downloaded::Placeholder)
    }

    fn is_unsupported(&self, path: &NormalizedPath) -> bool {
        path.extension().is_some_and(|ext| {
            let ext = ext.to_lowercase();
            self.options
                .unsupported_extensions
                .iter()
                .any(|u| u.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        })
    }
}

enum Downloaded {
    Written,
    Unchanged,
    Placeholder,
}

fn is_benign_delete_error(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) || e.raw_os_error() == Some(ENAMETOOLONG)
}

/// Whether the local file already holds the remote content.
///
/// Uses the remote's content hash when we can compute the same kind
/// locally, and size plus whole-second mtime otherwise.
async fn local_matches(target: &Path, change: &ChangeRecord) -> bool {
    let Ok(metadata) = tokio::fs::metadata(target).await else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    if change.size.is_some_and(|size| size != metadata.len()) {
        return false;
    }

    match &change.content_hash {
        Some(ContentHash::Dropbox(expected)) => {
            let expected = expected.to_lowercase();
            hash_file(target, dropbox_file_hash).await.is_some_and(|h| h == expected)
        }
        Some(ContentHash::Sha256(expected)) => {
            let expected = expected.trim_start_matches("sha256:").to_lowercase();
            hash_file(target, compute_file_checksum)
                .await
                .is_some_and(|h| h.trim_start_matches("sha256:") == expected)
        }
        Some(ContentHash::Md5(_)) | None => match (change.modified, metadata.modified()) {
            (Some(remote), Ok(local)) => {
                let local = chrono::DateTime::<chrono::Utc>::from(local);
                change.size.is_some() && local.timestamp() == remote.timestamp()
            }
            _ => false,
        },
    }
}

async fn hash_file(path: &Path, hasher: fn(&Path) -> std::io::Result<String>) -> Option<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hasher(&path).ok())
        .await
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blogsync_delta::{DeltaError, DeltaResult};
    use blogsync_fs::checksum::dropbox_content_hash;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Files {
        content: HashMap<String, Vec<u8>>,
        downloads: Mutex<Vec<String>>,
    }

    impl Files {
        fn with(mut self, path: &str, content: &str) -> Self {
            self.content.insert(path.to_string(), content.as_bytes().to_vec());
            self
        }

        fn download_count(&self) -> usize {
            self.downloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteReader for Files {
        async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
            self.downloads.lock().unwrap().push(path.to_string());
            self.content
                .get(path.as_str())
                .cloned()
                .ok_or_else(|| DeltaError::NotFound { path: path.to_string() })
        }
    }

    fn file(path: &str, content: &str) -> ChangeRecord {
        ChangeRecord::file(path, content.len() as u64)
            .with_hash(ContentHash::Dropbox(dropbox_content_hash(content.as_bytes())))
            .with_modified(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn applying_twice_downloads_once() {
        let dir = tempdir().unwrap();
        let files = Files::default().with("posts/a.txt", "hello");
        let options = ReconcileOptions::default();
        let reconciler = Reconciler::new(dir.path(), &files, &options);
        let batch = vec![ChangeRecord::folder("posts"), file("posts/a.txt", "hello")];

        let first = reconciler.apply(batch.clone()).await.unwrap();
        assert_eq!(first.downloaded, vec![NormalizedPath::new("posts/a.txt")]);
        let second = reconciler.apply(batch).await.unwrap();
        assert!(second.downloaded.is_empty());
        assert_eq!(second.skipped_unchanged, vec![NormalizedPath::new("posts/a.txt")]);
        assert_eq!(files.download_count(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("posts/a.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn downloaded_files_take_the_remote_mtime() {
        let dir = tempdir().unwrap();
        let files = Files::default().with("a.txt", "x");
        let options = ReconcileOptions::default();
        Reconciler::new(dir.path(), &files, &options)
            .apply(vec![file("a.txt", "x")])
            .await
            .unwrap();

        let modified = fs::metadata(dir.path().join("a.txt")).unwrap().modified().unwrap();
        assert_eq!(
            chrono::DateTime::<Utc>::from(modified),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn file_replaced_by_folder_in_one_batch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("photos"), "was a file").unwrap();
        let files = Files::default().with("photos/1.txt", "one");
        let options = ReconcileOptions::default();

        let report = Reconciler::new(dir.path(), &files, &options)
            .apply(vec![
                file("photos/1.txt", "one"),
                ChangeRecord::folder("photos"),
                ChangeRecord::deleted("photos"),
                ChangeRecord::folder("photos"),
                file("photos/1.txt", "one"),
            ])
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(dir.path().join("photos").is_dir());
        assert_eq!(fs::read_to_string(dir.path().join("photos/1.txt")).unwrap(), "one");
    }

    #[tokio::test]
    async fn deleting_missing_or_impossible_paths_is_a_no_op() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file.txt"), "x").unwrap();
        let files = Files::default();
        let options = ReconcileOptions::default();

        let report = Reconciler::new(dir.path(), &files, &options)
            .apply(vec![
                ChangeRecord::deleted("never-existed.txt"),
                ChangeRecord::deleted("file.txt/under-a-file"),
                ChangeRecord::deleted(format!("{}.txt", "n".repeat(300))),
            ])
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(report.deleted.is_empty());
        assert!(dir.path().join("file.txt").exists());
    }

    #[tokio::test]
    async fn deletes_resolve_local_casing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Drafts")).unwrap();
        fs::write(dir.path().join("Drafts/Post.txt"), "x").unwrap();
        let options = ReconcileOptions::default();

        let report = Reconciler::new(dir.path(), &Files::default(), &options)
            .apply(vec![ChangeRecord::deleted("drafts/post.txt")])
            .await
            .unwrap();

        assert_eq!(report.deleted.len(), 1);
        assert!(!dir.path().join("Drafts/Post.txt").exists());
    }

    #[tokio::test]
    async fn oversized_and_unsupported_files_become_placeholders() {
        let dir = tempdir().unwrap();
        let files = Files::default();
        let options = ReconcileOptions {
            max_file_size: 10,
            unsupported_extensions: vec!["mov".into()],
            ..Default::default()
        };

        let report = Reconciler::new(dir.path(), &files, &options)
            .apply(vec![
                ChangeRecord::file("big.txt", 11),
                ChangeRecord::file("clip.MOV", 1),
            ])
            .await
            .unwrap();

        assert_eq!(report.placeholders.len(), 2);
        assert_eq!(files.download_count(), 0);
        assert_eq!(fs::metadata(dir.path().join("big.txt")).unwrap().len(), 0);
        assert!(dir.path().join("clip.MOV").exists());
    }

    #[tokio::test]
    async fn one_failed_download_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let files = Files::default().with("ok.txt", "fine");
        let options = ReconcileOptions::default();

        let report = Reconciler::new(dir.path(), &files, &options)
            .apply(vec![file("missing.txt", "gone"), file("ok.txt", "fine")])
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, ApplyOperation::Download);
        assert_eq!(report.downloaded, vec![NormalizedPath::new("ok.txt")]);
    }

    #[tokio::test]
    async fn mkdir_conflict_policies() {
        let dir = tempdir().unwrap();
        let options = ReconcileOptions::default();

        fs::write(dir.path().join("notes"), "file").unwrap();
        let report = Reconciler::new(dir.path(), &Files::default(), &options)
            .apply(vec![ChangeRecord::folder("notes")])
            .await
            .unwrap();
        // Same name cannot hold both; the file is kept and the failure recorded
        assert_eq!(report.failures.len(), 1);
        assert!(dir.path().join("notes").is_file());

        let replace = ReconcileOptions {
            mkdir_conflict: MkdirConflictPolicy::ReplaceFile,
            ..Default::default()
        };
        let report = Reconciler::new(dir.path(), &Files::default(), &replace)
            .apply(vec![ChangeRecord::folder("notes")])
            .await
            .unwrap();
        assert!(report.is_clean());
        assert!(dir.path().join("notes").is_dir());
    }

    #[test]
    fn later_delete_cancels_earlier_creates_below_it() {
        let plan = Plan::from_changes(vec![
            ChangeRecord::folder("a"),
            ChangeRecord::file("a/b.txt", 1),
            ChangeRecord::file("keep.txt", 1),
            ChangeRecord::deleted("A"),
            ChangeRecord::file(".DS_Store", 1),
        ]);
        assert_eq!(plan.deletes, vec![NormalizedPath::new("A")]);
        assert!(plan.mkdirs.is_empty());
        assert_eq!(plan.downloads.len(), 1);
        assert_eq!(plan.downloads[0].path, NormalizedPath::new("keep.txt"));
    }

    #[test]
    fn later_record_replaces_earlier_creation_of_the_same_path() {
        let plan = Plan::from_changes(vec![
            ChangeRecord::file("Notes", 3),
            ChangeRecord::file("abc.txt", 1),
            ChangeRecord::folder("notes"),
            ChangeRecord::deleted("ab"),
            ChangeRecord::file("notes/x.txt", 1),
        ]);
        assert_eq!(plan.mkdirs, vec![NormalizedPath::new("notes")]);
        let downloads: Vec<_> = plan.downloads.iter().map(|c| c.path.to_string()).collect();
        assert_eq!(downloads, vec!["/abc.txt", "/notes/x.txt"]);
        assert_eq!(plan.deletes, vec![NormalizedPath::new("ab")]);
    }

    #[test]
    fn large_snapshot_batch_keeps_every_file() {
        let changes: Vec<_> = (0..20_000)
            .map(|i| ChangeRecord::file(format!("posts/{i}.txt"), 1))
            .collect();
        let plan = Plan::from_changes(changes);
        assert_eq!(plan.downloads.len(), 20_000);
        assert_eq!(plan.downloads[19_999].path, NormalizedPath::new("posts/19999.txt"));
    }

    #[test]
    fn mkdirs_run_parents_first() {
        let plan = Plan::from_changes(vec![
            ChangeRecord::folder("a/b/c"),
            ChangeRecord::folder("a"),
            ChangeRecord::folder("a/b"),
        ]);
        let depths: Vec<_> = plan.mkdirs.iter().map(|p| p.depth()).collect();
        assert_eq!(depths, vec![1, 2, 3]);
    }
}
