//! Google Drive delta source
//!
//! Drive addresses everything by file id and its change feed knows nothing
//! about paths. Paths are recovered by walking parent ids up to the blog
//! folder, and an id to path index is kept (optionally on disk) so that a
//! removal, which only carries the id, can be turned into a path.

pub mod api;

pub use api::{Change, ChangeList, DriveApi, DriveFile, FileList, HttpDriveApi};

use async_trait::async_trait;
use blogsync_fs::{ConfigStore, NormalizedPath, should_ignore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    ChangeKind, ChangeRecord, ContentHash, DeltaError, DeltaPage, DeltaResult, DeltaSource, Provider,
    RemoteEntry, RemoteProvider, RemoteReader, RemoteTree, RetryPolicy, SyncCursor, with_retry,
};

/// Parent chains deeper than this are treated as outside the blog folder.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexedPath {
    path: NormalizedPath,
    is_directory: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PathIndex {
    entries: HashMap<String, IndexedPath>,
}

impl PathIndex {
    fn path_of(&self, id: &str) -> Option<&NormalizedPath> {
        self.entries.get(id).map(|e| &e.path)
    }

    fn id_for(&self, path: &NormalizedPath) -> Option<&str> {
        let key = path.lookup_key();
        self.entries
            .iter()
            .find(|(_, e)| e.path.lookup_key() == key)
            .map(|(id, _)| id.as_str())
    }

    fn insert(&mut self, id: &str, path: NormalizedPath, is_directory: bool) {
        self.entries
            .insert(id.to_string(), IndexedPath { path, is_directory });
    }

    fn remove_subtree(&mut self, path: &NormalizedPath) {
        self.entries.retain(|_, e| !e.path.starts_with(path));
    }
}

pub struct DriveSource {
    api: Arc<dyn DriveApi>,
    folder_id: String,
    retry: RetryPolicy,
    index: Mutex<PathIndex>,
    state_file: Option<PathBuf>,
    store: ConfigStore,
}

impl DriveSource {
    pub fn new(api: Arc<dyn DriveApi>, folder_id: impl Into<String>) -> Self {
        Self {
            api,
            folder_id: folder_id.into(),
            retry: RetryPolicy::default(),
            index: Mutex::new(PathIndex::default()),
            state_file: None,
            store: ConfigStore::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Persist the id index in `path` (JSON) and load any saved copy.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> DeltaResult<Self> {
        let path = path.into();
        if let Some(saved) = self.store.load_optional::<PathIndex>(&path)? {
            *self.index.get_mut() = saved;
        }
        self.state_file = Some(path);
        Ok(self)
    }

    fn save_index(&self, index: &PathIndex) -> DeltaResult<()> {
        if let Some(path) = &self.state_file {
            self.store.save(path, index)?;
        }
        Ok(())
    }

    async fn get_file(&self, id: &str) -> DeltaResult<Option<DriveFile>> {
        let api = self.api.as_ref();
        match with_retry(&self.retry, "files.get", move || api.get_file(id)).await {
            Ok(file) => Ok(Some(file)),
            Err(DeltaError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn record_for(file: &DriveFile, path: NormalizedPath) -> ChangeRecord {
        if file.is_folder() {
            return ChangeRecord::folder(path);
        }
        let mut record = ChangeRecord::file(path, file.size_bytes());
        record.content_hash = file.md5_checksum.clone().map(ContentHash::Md5);
        record.modified = file.modified_time;
        record
    }

    /// Walk a folder breadth-first, recording and indexing every live child.
    async fn walk(
        &self,
        folder_id: &str,
        folder_path: &NormalizedPath,
        index: &mut PathIndex,
        records: &mut Vec<ChangeRecord>,
    ) -> DeltaResult<()> {
        let api = self.api.as_ref();
        let mut pending = vec![(folder_id.to_string(), folder_path.clone())];

        while let Some((id, path)) = pending.pop() {
            let mut page_token: Option<String> = None;
            loop {
                let id_ref = id.as_str();
                let token_ref = page_token.as_deref();
                let page = with_retry(&self.retry, "files.list", move || api.list_children(id_ref, token_ref))
                    .await?;

                for child in page.files {
                    if child.trashed || child.is_native_document() {
                        continue;
                    }
                    let child_path = path.join(&child.name);
                    if should_ignore(child_path.as_str()) {
                        continue;
                    }
                    index.insert(&child.id, child_path.clone(), child.is_folder());
                    records.push(Self::record_for(&child, child_path.clone()));
                    if child.is_folder() {
                        pending.push((child.id.clone(), child_path));
                    }
                }

                match page.next_page_token {
                    Some(next) => page_token = Some(next),
                    None => break,
                }
            }
        }

        Ok(())
    }

    async fn full_listing(&self, reset: bool) -> DeltaResult<DeltaPage> {
        let api = self.api.as_ref();
        // Taken before listing so nothing that changes mid-listing is missed
        let token = with_retry(&self.retry, "changes.getStartPageToken", move || api.start_page_token()).await?;

        match self.get_file(&self.folder_id).await? {
            Some(root) if !root.trashed => {}
            _ => {
                return Err(DeltaError::FolderMissing {
                    path: self.folder_id.clone(),
                });
            }
        }

        let mut index = PathIndex::default();
        let mut records = Vec::new();
        self.walk(&self.folder_id, &NormalizedPath::root(), &mut index, &mut records)
            .await?;
        records.sort_by(|a, b| a.path.cmp(&b.path));

        self.save_index(&index)?;
        *self.index.lock().await = index;

        Ok(DeltaPage {
            entries: records,
            cursor: SyncCursor::new(token),
            has_more: false,
            reset,
        })
    }

    /// Blog-relative path of `file`, or `None` if it is not under the blog folder.
    async fn resolve_path(&self, file: &DriveFile, index: &PathIndex) -> DeltaResult<Option<NormalizedPath>> {
        let mut segments = vec![file.name.clone()];
        let mut parent = file.parents.first().cloned();

        for _ in 0..MAX_DEPTH {
            let Some(id) = parent else {
                return Ok(None);
            };
            if id == self.folder_id {
                segments.reverse();
                return Ok(Some(NormalizedPath::new(segments.join("/"))));
            }
            if let Some(known) = index.path_of(&id) {
                segments.reverse();
                return Ok(Some(known.join(&segments.join("/"))));
            }
            match self.get_file(&id).await? {
                Some(folder) if !folder.trashed => {
                    segments.push(folder.name.clone());
                    parent = folder.parents.first().cloned();
                }
                _ => return Ok(None),
            }
        }

        Ok(None)
    }

    async fn apply_change(
        &self,
        change: Change,
        index: &mut PathIndex,
        records: &mut Vec<ChangeRecord>,
    ) -> DeltaResult<()> {
        let live = match change.file {
            Some(file) if !change.removed && !file.trashed => file,
            _ => {
                if let Some(old) = index.path_of(&change.file_id).cloned() {
                    index.remove_subtree(&old);
                    records.push(ChangeRecord::deleted(old));
                }
                return Ok(());
            }
        };
        if live.is_native_document() {
            return Ok(());
        }

        let previous = index.path_of(&live.id).cloned();
        let current = self.resolve_path(&live, index).await?;

        match (previous, current) {
            (Some(old), None) => {
                // Moved out of the blog folder
                index.remove_subtree(&old);
                records.push(ChangeRecord::deleted(old));
            }
            (_, Some(path)) if should_ignore(path.as_str()) => {}
            (previous, Some(path)) => {
                let moved = match previous {
                    Some(old) if old != path => {
                        index.remove_subtree(&old);
                        records.push(ChangeRecord::deleted(old));
                        true
                    }
                    _ => false,
                };
                index.insert(&live.id, path.clone(), live.is_folder());
                records.push(Self::record_for(&live, path.clone()));
                // The feed reports a moved folder but not its unchanged children
                if moved && live.is_folder() {
                    self.walk(&live.id, &path, index, records).await?;
                }
            }
            (None, None) => {}
        }

        Ok(())
    }
}

#[async_trait]
impl DeltaSource for DriveSource {
    async fn changes(&self, cursor: Option<&SyncCursor>) -> DeltaResult<DeltaPage> {
        let Some(cursor) = cursor else {
            return self.full_listing(false).await;
        };

        let api = self.api.as_ref();
        let token = cursor.as_str();
        let list = match with_retry(&self.retry, "changes.list", move || api.list_changes(token)).await {
            Ok(list) => list,
            Err(DeltaError::Reset) => {
                tracing::warn!(cursor = %cursor, "Drive page token expired, relisting from scratch");
                return self.full_listing(true).await;
            }
            Err(e) => return Err(e),
        };

        let mut index = self.index.lock().await;
        let mut records = Vec::new();
        for change in list.changes {
            self.apply_change(change, &mut index, &mut records).await?;
        }

        let (next, has_more) = match (list.next_page_token, list.new_start_page_token) {
            (Some(next), _) => (next, true),
            (None, Some(start)) => (start, false),
            (None, None) => return Err(DeltaError::protocol("Drive change page carried no token")),
        };

        self.save_index(&index)?;

        Ok(DeltaPage {
            entries: records,
            cursor: SyncCursor::new(next),
            has_more,
            reset: false,
        })
    }
}

#[async_trait]
impl RemoteReader for DriveSource {
    async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
        let id = self
            .index
            .lock()
            .await
            .id_for(path)
            .map(str::to_string)
            .ok_or_else(|| DeltaError::NotFound {
                path: path.to_string(),
            })?;
        let api = self.api.as_ref();
        let id_ref = id.as_str();
        with_retry(&self.retry, "files.download", move || api.download(id_ref)).await
    }
}

#[async_trait]
impl RemoteTree for DriveSource {
    async fn list_recursive(&self) -> DeltaResult<Vec<RemoteEntry>> {
        let page = self.full_listing(false).await?;
        Ok(page
            .entries
            .into_iter()
            .map(|r| RemoteEntry {
                is_directory: r.kind == ChangeKind::Folder,
                path: r.path,
                size: r.size,
                content_hash: r.content_hash,
                modified: r.modified,
            })
            .collect())
    }
}

impl RemoteProvider for DriveSource {
    fn provider(&self) -> Provider {
        Provider::GoogleDrive
    }

    fn tree(&self) -> Option<&dyn RemoteTree> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    const BLOG: &str = "blog-folder";

    #[derive(Default)]
    struct FakeDrive {
        files: StdMutex<HashMap<String, DriveFile>>,
        feed: StdMutex<Option<DeltaResult<ChangeList>>>,
    }

    impl FakeDrive {
        fn add(&self, file: DriveFile) {
            self.files.lock().unwrap().insert(file.id.clone(), file);
        }
    }

    fn folder(id: &str, name: &str, parent: &str) -> DriveFile {
        DriveFile {
            id: id.into(),
            name: name.into(),
            mime_type: api::FOLDER_MIME.into(),
            parents: vec![parent.into()],
            size: None,
            md5_checksum: None,
            modified_time: None,
            trashed: false,
        }
    }

    fn doc(id: &str, name: &str, parent: &str) -> DriveFile {
        DriveFile {
            id: id.into(),
            name: name.into(),
            mime_type: "text/plain".into(),
            parents: vec![parent.into()],
            size: Some("4".into()),
            md5_checksum: Some(format!("md5-{id}")),
            modified_time: None,
            trashed: false,
        }
    }

    #[async_trait]
    impl DriveApi for FakeDrive {
        async fn start_page_token(&self) -> DeltaResult<String> {
            Ok("t1".into())
        }

        async fn list_changes(&self, _page_token: &str) -> DeltaResult<ChangeList> {
            self.feed
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(DeltaError::protocol("no feed scripted")))
        }

        async fn get_file(&self, id: &str) -> DeltaResult<DriveFile> {
            self.files
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(DeltaError::NotFound { path: id.into() })
        }

        async fn list_children(&self, folder_id: &str, _page_token: Option<&str>) -> DeltaResult<FileList> {
            let files = self
                .files
                .lock()
                .unwrap()
                .values()
                .filter(|f| f.parents.iter().any(|p| p == folder_id))
                .cloned()
                .collect();
            Ok(FileList {
                files,
                next_page_token: None,
            })
        }

        async fn download(&self, id: &str) -> DeltaResult<Vec<u8>> {
            Ok(id.as_bytes().to_vec())
        }
    }

    fn seeded() -> Arc<FakeDrive> {
        let drive = FakeDrive::default();
        drive.add(folder(BLOG, "Blog", "root"));
        drive.add(folder("posts", "Posts", BLOG));
        drive.add(doc("hello", "hello.txt", "posts"));
        drive.add(doc("outside", "other.txt", "root"));
        Arc::new(drive)
    }

    fn summary(page: &DeltaPage) -> Vec<(ChangeKind, String)> {
        page.entries.iter().map(|r| (r.kind, r.path.to_string())).collect()
    }

    #[tokio::test]
    async fn full_listing_resolves_paths_under_the_blog_folder() {
        let source = DriveSource::new(seeded(), BLOG).with_retry_policy(RetryPolicy::none());
        let page = source.changes(None).await.unwrap();

        assert_eq!(
            summary(&page),
            vec![
                (ChangeKind::Folder, "/Posts".to_string()),
                (ChangeKind::File, "/Posts/hello.txt".to_string()),
            ]
        );
        assert_eq!(page.cursor.as_str(), "t1");
        assert_eq!(page.entries[1].content_hash, Some(ContentHash::Md5("md5-hello".into())));
        assert_eq!(
            source.download(&NormalizedPath::new("posts/HELLO.txt")).await.unwrap(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn renames_and_removals_become_deletes() {
        let drive = seeded();
        let source = DriveSource::new(drive.clone(), BLOG).with_retry_policy(RetryPolicy::none());
        source.changes(None).await.unwrap();

        *drive.feed.lock().unwrap() = Some(Ok(ChangeList {
            changes: vec![
                Change {
                    file_id: "hello".into(),
                    removed: false,
                    file: Some(doc("hello", "Hello World.txt", "posts")),
                },
                Change {
                    file_id: "outside".into(),
                    removed: false,
                    file: Some(doc("outside", "other.txt", "root")),
                },
                Change {
                    file_id: "posts".into(),
                    removed: true,
                    file: None,
                },
            ],
            next_page_token: None,
            new_start_page_token: Some("t2".into()),
        }));

        let page = source.changes(Some(&SyncCursor::new("t1"))).await.unwrap();
        assert_eq!(
            summary(&page),
            vec![
                (ChangeKind::Deleted, "/Posts/hello.txt".to_string()),
                (ChangeKind::File, "/Posts/Hello World.txt".to_string()),
                (ChangeKind::Deleted, "/Posts".to_string()),
            ]
        );
        assert_eq!(page.cursor.as_str(), "t2");
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn expired_token_relists_with_reset_flag() {
        let drive = seeded();
        *drive.feed.lock().unwrap() = Some(Err(DeltaError::Reset));
        let source = DriveSource::new(drive, BLOG).with_retry_policy(RetryPolicy::none());

        let page = source.changes(Some(&SyncCursor::new("old"))).await.unwrap();
        assert!(page.reset);
        assert_eq!(page.entries.len(), 2);
    }

    #[tokio::test]
    async fn missing_blog_folder_is_folder_missing() {
        let source = DriveSource::new(Arc::new(FakeDrive::default()), BLOG).with_retry_policy(RetryPolicy::none());
        let err = source.changes(None).await.unwrap_err();
        assert_eq!(err.code(), "FOLDER_MISSING");
    }

    #[tokio::test]
    async fn index_survives_restarts_through_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("drive-index.json");
        let drive = seeded();

        DriveSource::new(drive.clone(), BLOG)
            .with_state_file(&state)
            .unwrap()
            .changes(None)
            .await
            .unwrap();

        let restarted = DriveSource::new(drive.clone(), BLOG).with_state_file(&state).unwrap();
        *drive.feed.lock().unwrap() = Some(Ok(ChangeList {
            changes: vec![Change {
                file_id: "hello".into(),
                removed: true,
                file: None,
            }],
            next_page_token: None,
            new_start_page_token: Some("t2".into()),
        }));
        let page = restarted.changes(Some(&SyncCursor::new("t1"))).await.unwrap();
        assert_eq!(summary(&page), vec![(ChangeKind::Deleted, "/Posts/hello.txt".to_string())]);
    }
}
