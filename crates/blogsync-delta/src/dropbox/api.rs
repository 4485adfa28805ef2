//! Dropbox HTTP API surface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::parse_retry_after;
use crate::{DeltaError, DeltaResult};

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Metadata for a single Dropbox entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum Metadata {
    File {
        name: String,
        id: Option<String>,
        path_lower: Option<String>,
        path_display: Option<String>,
        size: u64,
        content_hash: Option<String>,
        server_modified: Option<DateTime<Utc>>,
        client_modified: Option<DateTime<Utc>>,
    },
    Folder {
        name: String,
        id: Option<String>,
        path_lower: Option<String>,
        path_display: Option<String>,
    },
    Deleted {
        name: String,
        path_lower: Option<String>,
        path_display: Option<String>,
    },
}

impl Metadata {
    pub fn name(&self) -> &str {
        match self {
            Metadata::File { name, .. } | Metadata::Folder { name, .. } | Metadata::Deleted { name, .. } => {
                name
            }
        }
    }

    /// Display path when reported, lowercased path otherwise.
    pub fn display_path(&self) -> Option<&str> {
        let (display, lower) = match self {
            Metadata::File {
                path_display,
                path_lower,
                ..
            }
            | Metadata::Folder {
                path_display,
                path_lower,
                ..
            }
            | Metadata::Deleted {
                path_display,
                path_lower,
                ..
            } => (path_display, path_lower),
        };
        display.as_deref().or(lower.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// The subset of the Dropbox API the delta source needs.
#[async_trait]
pub trait DropboxApi: Send + Sync {
    /// `files/list_folder`, including deleted entries.
    async fn list_folder(&self, path: &str, recursive: bool) -> DeltaResult<ListFolderResult>;

    /// `files/list_folder/continue`. A stale cursor yields [`DeltaError::Reset`].
    async fn list_folder_continue(&self, cursor: &str) -> DeltaResult<ListFolderResult>;

    /// `files/get_metadata` by path or `id:` identifier.
    async fn get_metadata(&self, path_or_id: &str) -> DeltaResult<Metadata>;

    async fn download(&self, path: &str) -> DeltaResult<Vec<u8>>;
}

/// Dropbox API over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpDropboxApi {
    client: reqwest::Client,
    token: String,
    metadata_timeout: Duration,
    transfer_timeout: Duration,
    api_base: String,
    content_base: String,
}

impl HttpDropboxApi {
    pub fn new(token: impl Into<String>, metadata_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            metadata_timeout,
            transfer_timeout,
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
        }
    }

    /// Point the client at another host (used against local test servers).
    pub fn with_base_urls(mut self, api_base: impl Into<String>, content_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.content_base = content_base.into();
        self
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        path: &str,
    ) -> DeltaResult<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, endpoint))
            .bearer_auth(&self.token)
            .timeout(self.metadata_timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response.json::<T>().await?);
        }
        let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
        let text = response.text().await.unwrap_or_default();
        Err(classify(status, retry_after, path, &text))
    }
}

#[async_trait]
impl DropboxApi for HttpDropboxApi {
    async fn list_folder(&self, path: &str, recursive: bool) -> DeltaResult<ListFolderResult> {
        self.rpc(
            "files/list_folder",
            json!({
                "path": path,
                "recursive": recursive,
                "include_deleted": true,
                "include_non_downloadable_files": false,
            }),
            path,
        )
        .await
    }

    async fn list_folder_continue(&self, cursor: &str) -> DeltaResult<ListFolderResult> {
        self.rpc("files/list_folder/continue", json!({ "cursor": cursor }), "")
            .await
    }

    async fn get_metadata(&self, path_or_id: &str) -> DeltaResult<Metadata> {
        self.rpc("files/get_metadata", json!({ "path": path_or_id }), path_or_id)
            .await
    }

    async fn download(&self, path: &str) -> DeltaResult<Vec<u8>> {
        let arg = header_safe_json(&json!({ "path": path }));
        let response = self
            .client
            .post(format!("{}/files/download", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .timeout(self.transfer_timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response.bytes().await?.to_vec());
        }
        let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
        let text = response.text().await.unwrap_or_default();
        Err(classify(status, retry_after, path, &text))
    }
}

/// Translate a Dropbox error response into a [`DeltaError`].
///
/// Dropbox reports endpoint-specific failures as 409 with an
/// `error_summary` such as `reset/..` or `path/not_found/..`.
pub fn classify(status: u16, retry_after: Option<Duration>, path: &str, body: &str) -> DeltaError {
    if status != 409 {
        return DeltaError::from_status(status, retry_after, path, body);
    }

    let summary = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error_summary").and_then(|s| s.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    if summary.starts_with("reset") {
        DeltaError::Reset
    } else if summary.contains("not_found") {
        DeltaError::NotFound { path: path.to_string() }
    } else if summary.contains("too_many_write_operations") {
        DeltaError::RateLimited { retry_after }
    } else {
        DeltaError::protocol(format!("Dropbox conflict: {summary}"))
    }
}

/// Serialize JSON for the `Dropbox-API-Arg` header.
///
/// Header values must be ASCII, so every non-ASCII character is escaped
/// as `\uXXXX` (surrogate pairs for characters outside the BMP).
pub fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            escaped.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    escaped
}
