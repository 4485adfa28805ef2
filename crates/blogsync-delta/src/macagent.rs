//! Client for the macOS agent that exposes an iCloud Drive folder over HTTP
//!
//! The agent runs on the user's Mac and serves one blog folder. Every
//! request carries the shared secret and the blog id as headers and the
//! blog-relative path as a query parameter. The agent has no change feed,
//! so deltas are computed by diffing its recursive listing.

use async_trait::async_trait;
use blogsync_fs::NormalizedPath;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::parse_retry_after;
use crate::snapshot::snapshot_changes;
use crate::{
    DeltaError, DeltaPage, DeltaResult, DeltaSource, Provider, RemoteEntry, RemoteProvider, RemoteReader,
    RemoteTree, RemoteWriter, RetryPolicy, SyncCursor, with_retry,
};

/// One row of a `/readdir` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDirEntry {
    pub name: String,
    pub is_directory: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,
}

/// One row of a `/recursiveList` response; `path` is blog-relative.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentListEntry {
    pub path: String,
    pub is_directory: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MacAgentClient {
    client: reqwest::Client,
    base_url: String,
    blog_id: String,
    secret: String,
    metadata_timeout: Duration,
    /// Uploads can trigger rebuilds on our side, so they get longer
    transfer_timeout: Duration,
    max_file_size: u64,
}

impl MacAgentClient {
    pub fn new(base_url: impl Into<String>, blog_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blog_id: blog_id.into(),
            secret: secret.into(),
            metadata_timeout: Duration::from_secs(15),
            transfer_timeout: Duration::from_secs(120),
            max_file_size: 30 * 1024 * 1024,
        }
    }

    pub fn with_timeouts(mut self, metadata: Duration, transfer: Duration) -> Self {
        self.metadata_timeout = metadata;
        self.transfer_timeout = transfer;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    fn request(&self, endpoint: &str, path: &NormalizedPath, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}", self.base_url, endpoint))
            .header(reqwest::header::AUTHORIZATION, &self.secret)
            .header("blogID", &self.blog_id)
            .query(&[("path", path.to_slash_string())])
            .timeout(timeout)
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &NormalizedPath) -> DeltaResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            413 => DeltaError::protocol(format!("{path} exceeds the agent payload limit")),
            _ => DeltaError::from_status(status, retry_after, &path.to_string(), &body),
        })
    }

    pub async fn readdir(&self, path: &NormalizedPath) -> DeltaResult<Vec<AgentDirEntry>> {
        let request = self.request("readdir", path, self.metadata_timeout);
        Ok(self.send(request, path).await?.json().await?)
    }

    pub async fn recursive_list(&self, path: &NormalizedPath) -> DeltaResult<Vec<AgentListEntry>> {
        let request = self.request("recursiveList", path, self.transfer_timeout);
        Ok(self.send(request, path).await?.json().await?)
    }

    pub async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
        let request = self.request("download", path, self.transfer_timeout);
        Ok(self.send(request, path).await?.bytes().await?.to_vec())
    }

    pub async fn upload(
        &self,
        path: &NormalizedPath,
        content: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> DeltaResult<()> {
        if content.len() as u64 > self.max_file_size {
            return Err(DeltaError::protocol(format!(
                "{path} is {} bytes, above the {} byte limit",
                content.len(),
                self.max_file_size
            )));
        }
        let mut request = self
            .request("upload", path, self.transfer_timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        if let Some(modified) = modified {
            request = request.header("modifiedTime", modified.to_rfc3339());
        }
        self.send(request, path).await.map(|_| ())
    }

    pub async fn mkdir(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let request = self.request("mkdir", path, self.metadata_timeout);
        self.send(request, path).await.map(|_| ())
    }

    pub async fn delete(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let request = self.request("delete", path, self.metadata_timeout);
        match self.send(request, path).await {
            Ok(_) | Err(DeltaError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ask the agent to watch the blog folder and push local edits to us.
    pub async fn watch(&self) -> DeltaResult<()> {
        let root = NormalizedPath::root();
        let request = self.request("watch", &root, self.metadata_timeout);
        self.send(request, &root).await.map(|_| ())
    }

    pub async fn status(&self) -> DeltaResult<AgentStatus> {
        let root = NormalizedPath::root();
        let request = self.request("status", &root, self.metadata_timeout);
        Ok(self.send(request, &root).await?.json().await?)
    }
}

/// iCloud Drive via the Mac agent.
pub struct MacAgentSource {
    client: MacAgentClient,
    mirror_root: PathBuf,
    retry: RetryPolicy,
}

impl MacAgentSource {
    pub fn new(client: MacAgentClient, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            mirror_root: mirror_root.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &MacAgentClient {
        &self.client
    }
}

#[async_trait]
impl DeltaSource for MacAgentSource {
    async fn changes(&self, cursor: Option<&SyncCursor>) -> DeltaResult<DeltaPage> {
        let client = &self.client;
        if cursor.is_none() {
            with_retry(&self.retry, "watch", move || client.watch()).await?;
        }
        snapshot_changes(self, &self.mirror_root, cursor)
            .await
            .map_err(|e| match e {
                DeltaError::NotFound { path } => DeltaError::FolderMissing { path },
                other => other,
            })
    }
}

#[async_trait]
impl RemoteReader for MacAgentSource {
    async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
        let client = &self.client;
        with_retry(&self.retry, "download", move || client.download(path)).await
    }
}

#[async_trait]
impl RemoteTree for MacAgentSource {
    async fn list_recursive(&self) -> DeltaResult<Vec<RemoteEntry>> {
        let client = &self.client;
        let root = NormalizedPath::root();
        let root_ref = &root;
        let listing = with_retry(&self.retry, "recursiveList", move || client.recursive_list(root_ref)).await?;
        Ok(listing
            .into_iter()
            .map(|e| RemoteEntry {
                path: NormalizedPath::new(&e.path),
                is_directory: e.is_directory,
                size: if e.is_directory { None } else { e.size },
                content_hash: None,
                modified: e.mtime,
            })
            .filter(|e| !e.path.is_root())
            .collect())
    }
}

#[async_trait]
impl RemoteWriter for MacAgentSource {
    async fn upload(
        &self,
        path: &NormalizedPath,
        content: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> DeltaResult<()> {
        let client = &self.client;
        let content = &content;
        with_retry(&self.retry, "upload", move || client.upload(path, content.clone(), modified)).await
    }

    async fn mkdir(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let client = &self.client;
        with_retry(&self.retry, "mkdir", move || client.mkdir(path)).await
    }

    async fn delete(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let client = &self.client;
        with_retry(&self.retry, "delete", move || client.delete(path)).await
    }
}

impl RemoteProvider for MacAgentSource {
    fn provider(&self) -> Provider {
        Provider::ICloud
    }

    fn tree(&self) -> Option<&dyn RemoteTree> {
        Some(self)
    }

    fn writer(&self) -> Option<&dyn RemoteWriter> {
        Some(self)
    }
}
