//! A plain local directory acting as the remote

use async_trait::async_trait;
use blogsync_fs::case::{resolve_case_sensitive_path, resolve_target_path};
use blogsync_fs::{NormalizedPath, RobustnessConfig, io};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::snapshot::snapshot_changes;
use crate::{
    DeltaError, DeltaPage, DeltaResult, DeltaSource, Provider, RemoteEntry, RemoteProvider,
    RemoteReader, RemoteTree, RemoteWriter, SyncCursor,
};

/// Mirrors `source_root` into a blog folder by listing diffs.
#[derive(Debug, Clone)]
pub struct LocalFolderSource {
    source_root: PathBuf,
    mirror_root: PathBuf,
    robustness: RobustnessConfig,
}

impl LocalFolderSource {
    pub fn new(source_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            mirror_root: mirror_root.into(),
            robustness: RobustnessConfig::default(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    async fn ensure_source(&self) -> DeltaResult<()> {
        match tokio::fs::metadata(&self.source_root).await {
            Ok(m) if m.is_dir() => Ok(()),
            _ => Err(DeltaError::FolderMissing {
                path: self.source_root.display().to_string(),
            }),
        }
    }
}

fn map_io(path: &Path, relative: &NormalizedPath, e: std::io::Error) -> DeltaError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeltaError::NotFound {
            path: relative.to_string(),
        }
    } else {
        blogsync_fs::Error::io(path, e).into()
    }
}

#[async_trait]
impl DeltaSource for LocalFolderSource {
    async fn changes(&self, cursor: Option<&SyncCursor>) -> DeltaResult<DeltaPage> {
        self.ensure_source().await?;
        snapshot_changes(self, &self.mirror_root, cursor).await
    }
}

#[async_trait]
impl RemoteReader for LocalFolderSource {
    async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
        let native = resolve_case_sensitive_path(&self.source_root, path).await;
        tokio::fs::read(&native).await.map_err(|e| map_io(&native, path, e))
    }
}

#[async_trait]
impl RemoteTree for LocalFolderSource {
    async fn list_recursive(&self) -> DeltaResult<Vec<RemoteEntry>> {
        self.ensure_source().await?;
        let listing = blogsync_fs::tree::list_recursive(&self.source_root, &NormalizedPath::root()).await?;
        Ok(listing
            .into_iter()
            .map(|e| RemoteEntry {
                path: e.path,
                is_directory: e.is_directory,
                size: e.size,
                content_hash: None,
                modified: e.modified,
            })
            .collect())
    }
}

#[async_trait]
impl RemoteWriter for LocalFolderSource {
    async fn upload(
        &self,
        path: &NormalizedPath,
        content: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> DeltaResult<()> {
        let target = resolve_target_path(&self.source_root, path).await;
        io::write_atomic_async(&target, content, self.robustness).await?;
        if let Some(modified) = modified {
            io::set_modified(&target, modified.into()).await?;
        }
        Ok(())
    }

    async fn mkdir(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let target = resolve_case_sensitive_path(&self.source_root, path).await;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| blogsync_fs::Error::io(&target, e).into())
    }

    async fn delete(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let target = resolve_case_sensitive_path(&self.source_root, path).await;
        let result = match tokio::fs::symlink_metadata(&target).await {
            Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(blogsync_fs::Error::io(&target, e).into()),
        }
    }
}

impl RemoteProvider for LocalFolderSource {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    fn tree(&self) -> Option<&dyn RemoteTree> {
        Some(self)
    }

    fn writer(&self) -> Option<&dyn RemoteWriter> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeKind;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_sync_lists_everything_then_goes_quiet() {
        let source = tempdir().unwrap();
        let mirror = tempdir().unwrap();
        fs::create_dir(source.path().join("posts")).unwrap();
        fs::write(source.path().join("posts/hello.txt"), "hi").unwrap();
        fs::write(source.path().join(".DS_Store"), "").unwrap();

        let remote = LocalFolderSource::new(source.path(), mirror.path());
        let page = remote.changes(None).await.unwrap();
        let kinds: Vec<_> = page.entries.iter().map(|r| (r.kind, r.path.to_string())).collect();
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Folder, "/posts".to_string()),
                (ChangeKind::File, "/posts/hello.txt".to_string()),
            ]
        );

        let again = remote.changes(Some(&page.cursor)).await.unwrap();
        assert!(again.entries.is_empty());
        assert_eq!(again.cursor, page.cursor);
    }

    #[tokio::test]
    async fn missing_source_is_folder_missing() {
        let mirror = tempdir().unwrap();
        let remote = LocalFolderSource::new(mirror.path().join("gone"), mirror.path());
        let err = remote.changes(None).await.unwrap_err();
        assert_eq!(err.code(), "FOLDER_MISSING");
    }

    #[tokio::test]
    async fn writer_round_trips_through_the_source_folder() {
        let source = tempdir().unwrap();
        let remote = LocalFolderSource::new(source.path(), source.path().join("unused"));
        let path = NormalizedPath::new("drafts/idea.md");

        remote.mkdir(&NormalizedPath::new("drafts")).await.unwrap();
        remote.upload(&path, b"# idea".to_vec(), None).await.unwrap();
        assert_eq!(remote.download(&path).await.unwrap(), b"# idea");

        remote.delete(&NormalizedPath::new("drafts")).await.unwrap();
        assert!(!source.path().join("drafts").exists());
        remote.delete(&NormalizedPath::new("drafts")).await.unwrap();

        let err = remote.download(&path).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
