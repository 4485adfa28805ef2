//! Dropbox delta source
//!
//! The blog folder is addressed by its Dropbox id so that renaming or
//! moving the folder in Dropbox does not break the sync. Every page
//! re-reads the folder's current display path and reports entries
//! relative to it.

pub mod api;

pub use api::{DropboxApi, HttpDropboxApi, ListFolderResult, Metadata};

use async_trait::async_trait;
use blogsync_fs::case::resolve_case_sensitive_path;
use blogsync_fs::{LocalEntryDescriptor, NormalizedPath, should_ignore};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    ChangeRecord, ContentHash, DeltaError, DeltaPage, DeltaResult, DeltaSource, Provider, RemoteEntry,
    RemoteProvider, RemoteReader, RemoteTree, RetryPolicy, SyncCursor, with_retry,
};

/// The blog folder as Dropbox currently names it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RootFolder {
    /// Display path, empty for the app folder root
    display: String,
}

impl RootFolder {
    fn api_path(&self, relative: &NormalizedPath) -> String {
        if relative.is_root() {
            self.display.clone()
        } else {
            format!("{}/{}", self.display, relative.as_str())
        }
    }

    /// Path of an absolute Dropbox path relative to this folder, or `None`
    /// when it lies outside (or is the folder itself).
    fn relative(&self, absolute: &str) -> Option<NormalizedPath> {
        let absolute = NormalizedPath::new(absolute);
        let root = NormalizedPath::new(&self.display);
        if !absolute.starts_with_ignore_case(&root) {
            return None;
        }
        let rest: Vec<&str> = absolute.segments().skip(root.depth()).collect();
        if rest.is_empty() {
            None
        } else {
            Some(NormalizedPath::new(rest.join("/")))
        }
    }
}

/// Cached remote child names per parent lookup key. `None` means the
/// parent no longer exists remotely.
type ChildListings = HashMap<String, Option<HashSet<String>>>;

pub struct DropboxSource {
    api: Arc<dyn DropboxApi>,
    folder_id: Option<String>,
    mirror_root: PathBuf,
    retry: RetryPolicy,
    root: Mutex<Option<RootFolder>>,
}

impl DropboxSource {
    /// `folder_id` of `None` syncs the whole app folder.
    pub fn new(api: Arc<dyn DropboxApi>, folder_id: Option<String>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            api,
            folder_id,
            mirror_root: mirror_root.into(),
            retry: RetryPolicy::default(),
            root: Mutex::new(None),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn refresh_root(&self) -> DeltaResult<RootFolder> {
        let root = match &self.folder_id {
            None => RootFolder { display: String::new() },
            Some(id) => {
                let api = self.api.as_ref();
                let id_ref = id.as_str();
                let metadata = with_retry(&self.retry, "get_metadata", move || api.get_metadata(id_ref))
                    .await
                    .map_err(|e| folder_missing(e, id))?;
                match metadata {
                    Metadata::Folder {
                        path_display,
                        path_lower,
                        ..
                    } => RootFolder {
                        display: path_display.or(path_lower).unwrap_or_default(),
                    },
                    _ => return Err(DeltaError::FolderMissing { path: id.clone() }),
                }
            }
        };
        *self.root.lock().await = Some(root.clone());
        Ok(root)
    }

    async fn current_root(&self) -> DeltaResult<RootFolder> {
        let cached = self.root.lock().await.clone();
        match cached {
            Some(root) => Ok(root),
            None => self.refresh_root().await,
        }
    }

    async fn list_root(&self, root: &RootFolder) -> DeltaResult<ListFolderResult> {
        let api = self.api.as_ref();
        let path = root.display.as_str();
        with_retry(&self.retry, "list_folder", move || api.list_folder(path, true))
            .await
            .map_err(|e| folder_missing(e, &root.display))
    }

    async fn list_continue(&self, cursor: &str) -> DeltaResult<ListFolderResult> {
        let api = self.api.as_ref();
        with_retry(&self.retry, "list_folder/continue", move || api.list_folder_continue(cursor)).await
    }

    fn to_record(root: &RootFolder, metadata: &Metadata) -> Option<ChangeRecord> {
        let path = root.relative(metadata.display_path()?)?;
        if should_ignore(path.as_str()) {
            return None;
        }
        let record = match metadata {
            Metadata::File {
                size,
                content_hash,
                client_modified,
                server_modified,
                ..
            } => {
                let mut record = ChangeRecord::file(path, *size);
                record.content_hash = content_hash.clone().map(ContentHash::Dropbox);
                record.modified = (*client_modified).or(*server_modified);
                record
            }
            Metadata::Folder { .. } => ChangeRecord::folder(path),
            Metadata::Deleted { .. } => ChangeRecord::deleted(path),
        };
        Some(record)
    }

    /// Insert explicit deletes ahead of records that are case-only renames
    /// of something already in the mirror.
    async fn with_case_renames(&self, root: &RootFolder, records: Vec<ChangeRecord>) -> DeltaResult<Vec<ChangeRecord>> {
        let mut listings = ChildListings::new();
        let mut out = Vec::with_capacity(records.len());

        for record in records {
            if !record.is_deleted() {
                let stale = self.stale_case_variants(root, &record, &mut listings).await?;
                out.extend(stale);
            }
            out.push(record);
        }

        Ok(out)
    }

    async fn stale_case_variants(
        &self,
        root: &RootFolder,
        record: &ChangeRecord,
        listings: &mut ChildListings,
    ) -> DeltaResult<Vec<ChangeRecord>> {
        let (Some(parent), Some(name)) = (record.path.parent(), record.path.file_name()) else {
            return Ok(Vec::new());
        };

        let local_parent = resolve_case_sensitive_path(&self.mirror_root, &parent).await;
        let Ok(siblings) = blogsync_fs::tree::read_dir(&local_parent, &NormalizedPath::root()).await else {
            return Ok(Vec::new());
        };

        let wanted = name.to_lowercase();
        let variants: Vec<LocalEntryDescriptor> = siblings
            .into_iter()
            .filter(|s| s.name != name && s.name.to_lowercase() == wanted)
            .collect();
        if variants.is_empty() {
            return Ok(Vec::new());
        }

        let Some(remote_names) = self.remote_child_names(root, &parent, listings).await? else {
            return Ok(Vec::new());
        };
        if !remote_names.contains(name) {
            return Ok(Vec::new());
        }

        let mut deletes = Vec::new();
        for variant in variants {
            if remote_names.contains(&variant.name) {
                continue;
            }
            let old = parent.join(&variant.name);
            tracing::info!(old = %old, new = %record.path, "Detected case-only rename");
            deletes.push(ChangeRecord::deleted(old));

            if variant.is_directory {
                let descendants =
                    blogsync_fs::tree::list_recursive(&local_parent, &NormalizedPath::new(&variant.name)).await?;
                deletes.extend(
                    descendants
                        .into_iter()
                        .map(|d| ChangeRecord::deleted(parent.join(d.path.as_str()))),
                );
            }
        }

        Ok(deletes)
    }

    async fn remote_child_names(
        &self,
        root: &RootFolder,
        parent: &NormalizedPath,
        listings: &mut ChildListings,
    ) -> DeltaResult<Option<HashSet<String>>> {
        let key = parent.lookup_key();
        if let Some(cached) = listings.get(&key) {
            return Ok(cached.clone());
        }

        let api = self.api.as_ref();
        let path = root.api_path(parent);
        let path_ref = path.as_str();
        let first = with_retry(&self.retry, "list_folder", move || api.list_folder(path_ref, false)).await;

        let names = match first {
            Err(DeltaError::NotFound { .. }) => None,
            Err(e) => return Err(e),
            Ok(mut page) => {
                let mut names = HashSet::new();
                loop {
                    names.extend(
                        page.entries
                            .iter()
                            .filter(|m| !matches!(m, Metadata::Deleted { .. }))
                            .map(|m| m.name().to_string()),
                    );
                    if !page.has_more {
                        break;
                    }
                    page = self.list_continue(&page.cursor).await?;
                }
                Some(names)
            }
        };

        listings.insert(key, names.clone());
        Ok(names)
    }
}

fn folder_missing(error: DeltaError, path: &str) -> DeltaError {
    match error {
        DeltaError::NotFound { .. } => DeltaError::FolderMissing { path: path.to_string() },
        other => other,
    }
}

#[async_trait]
impl DeltaSource for DropboxSource {
    async fn changes(&self, cursor: Option<&SyncCursor>) -> DeltaResult<DeltaPage> {
        let root = self.refresh_root().await?;
        let mut reset = false;

        let listing = match cursor {
            None => self.list_root(&root).await?,
            Some(cursor) => match self.list_continue(cursor.as_str()).await {
                Err(DeltaError::Reset) => {
                    tracing::warn!(cursor = %cursor, "Dropbox reset the cursor, relisting from scratch");
                    reset = true;
                    self.list_root(&root).await?
                }
                Err(e) => return Err(folder_missing(e, &root.display)),
                Ok(listing) => listing,
            },
        };

        let records = listing
            .entries
            .iter()
            .filter_map(|m| Self::to_record(&root, m))
            .collect();
        let entries = self.with_case_renames(&root, records).await?;

        Ok(DeltaPage {
            entries,
            cursor: SyncCursor::new(listing.cursor),
            has_more: listing.has_more,
            reset,
        })
    }
}

#[async_trait]
impl RemoteReader for DropboxSource {
    async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
        let root = self.current_root().await?;
        let api = self.api.as_ref();
        let remote = root.api_path(path);
        let remote_ref = remote.as_str();
        with_retry(&self.retry, "download", move || api.download(remote_ref)).await
    }
}

#[async_trait]
impl RemoteTree for DropboxSource {
    async fn list_recursive(&self) -> DeltaResult<Vec<RemoteEntry>> {
        let root = self.refresh_root().await?;
        let mut page = self.list_root(&root).await?;
        let mut entries = Vec::new();

        loop {
            for metadata in &page.entries {
                let Some(record) = Self::to_record(&root, metadata) else {
                    continue;
                };
                if record.is_deleted() {
                    continue;
                }
                entries.push(RemoteEntry {
                    is_directory: matches!(metadata, Metadata::Folder { .. }),
                    path: record.path,
                    size: record.size,
                    content_hash: record.content_hash,
                    modified: record.modified,
                });
            }
            if !page.has_more {
                break;
            }
            page = self.list_continue(&page.cursor).await?;
        }

        Ok(entries)
    }
}

impl RemoteProvider for DropboxSource {
    fn provider(&self) -> Provider {
        Provider::Dropbox
    }

    fn tree(&self) -> Option<&dyn RemoteTree> {
        Some(self)
    }
}
