//! Provider traits
//!
//! A provider is split by capability. Every provider can produce deltas
//! and download files; full listings and writes are optional and exposed
//! through [`RemoteProvider::tree`] and [`RemoteProvider::writer`].

use async_trait::async_trait;
use blogsync_fs::NormalizedPath;
use chrono::{DateTime, Utc};

use crate::{DeltaPage, DeltaResult, Provider, RemoteEntry, SyncCursor};

/// Paginated change feed.
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Changes since `cursor`, or a full listing when `cursor` is `None`.
    ///
    /// Rate limits and transient failures are retried internally; a
    /// provider reset restarts from a full listing with `reset` set.
    async fn changes(&self, cursor: Option<&SyncCursor>) -> DeltaResult<DeltaPage>;
}

#[async_trait]
pub trait RemoteReader: Send + Sync {
    async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>>;
}

/// Full recursive listing of the blog folder on the remote side.
#[async_trait]
pub trait RemoteTree: Send + Sync {
    async fn list_recursive(&self) -> DeltaResult<Vec<RemoteEntry>>;
}

/// Mutations pushed from the local folder to the remote.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn upload(
        &self,
        path: &NormalizedPath,
        content: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> DeltaResult<()>;

    async fn mkdir(&self, path: &NormalizedPath) -> DeltaResult<()>;

    /// Remove a file or folder recursively. Missing paths are not an error.
    async fn delete(&self, path: &NormalizedPath) -> DeltaResult<()>;
}

/// A configured provider for one blog.
pub trait RemoteProvider: DeltaSource + RemoteReader {
    fn provider(&self) -> Provider;

    fn tree(&self) -> Option<&dyn RemoteTree> {
        None
    }

    fn writer(&self) -> Option<&dyn RemoteWriter> {
        None
    }
}
