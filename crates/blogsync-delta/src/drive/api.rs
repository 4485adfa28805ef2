//! Google Drive v3 API surface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::error::parse_retry_after;
use crate::{DeltaError, DeltaResult};

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const FILE_FIELDS: &str = "id,name,mimeType,parents,size,md5Checksum,modifiedTime,trashed";

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    /// Drive reports sizes as decimal strings
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Docs, Sheets and friends have no downloadable bytes.
    pub fn is_native_document(&self) -> bool {
        !self.is_folder() && self.mime_type.starts_with(NATIVE_MIME_PREFIX)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub file_id: String,
    #[serde(default)]
    pub removed: bool,
    pub file: Option<DriveFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(default)]
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageToken {
    start_page_token: String,
}

#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn start_page_token(&self) -> DeltaResult<String>;

    /// One page of the changes feed. An expired token yields [`DeltaError::Reset`].
    async fn list_changes(&self, page_token: &str) -> DeltaResult<ChangeList>;

    async fn get_file(&self, id: &str) -> DeltaResult<DriveFile>;

    /// Untrashed children of a folder.
    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> DeltaResult<FileList>;

    async fn download(&self, id: &str) -> DeltaResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct HttpDriveApi {
    client: reqwest::Client,
    token: String,
    metadata_timeout: Duration,
    transfer_timeout: Duration,
    base: String,
}

impl HttpDriveApi {
    pub fn new(token: impl Into<String>, metadata_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            metadata_timeout,
            transfer_timeout,
            base: API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        timeout: Duration,
        subject: &str,
    ) -> DeltaResult<reqwest::Response> {
        let response = self
            .client
            .get(format!("{}/{}", self.base, endpoint))
            .bearer_auth(&self.token)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, retry_after, subject, &body))
    }
}

/// Drive signals an expired page token with 410 Gone.
pub fn classify(status: u16, retry_after: Option<Duration>, subject: &str, body: &str) -> DeltaError {
    match status {
        410 => DeltaError::Reset,
        // Drive uses 403 rateLimitExceeded as often as 429
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            DeltaError::RateLimited { retry_after }
        }
        _ => DeltaError::from_status(status, retry_after, subject, body),
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn start_page_token(&self) -> DeltaResult<String> {
        let response = self
            .get("changes/startPageToken", &[], self.metadata_timeout, "startPageToken")
            .await?;
        Ok(response.json::<StartPageToken>().await?.start_page_token)
    }

    async fn list_changes(&self, page_token: &str) -> DeltaResult<ChangeList> {
        let fields = format!("nextPageToken,newStartPageToken,changes(fileId,removed,file({FILE_FIELDS}))");
        let response = self
            .get(
                "changes",
                &[
                    ("pageToken", page_token),
                    ("includeRemoved", "true"),
                    ("spaces", "drive"),
                    ("fields", &fields),
                ],
                self.metadata_timeout,
                "changes",
            )
            .await
            .map_err(|e| match e {
                // An unknown page token is rejected as an invalid value
                DeltaError::NotFound { .. } => DeltaError::Reset,
                DeltaError::Protocol { message } if message.starts_with("HTTP 400") => DeltaError::Reset,
                other => other,
            })?;
        Ok(response.json().await?)
    }

    async fn get_file(&self, id: &str) -> DeltaResult<DriveFile> {
        let response = self
            .get(&format!("files/{id}"), &[("fields", FILE_FIELDS)], self.metadata_timeout, id)
            .await?;
        Ok(response.json().await?)
    }

    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> DeltaResult<FileList> {
        let q = format!("'{folder_id}' in parents and trashed = false");
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut query = vec![("q", q.as_str()), ("fields", fields.as_str()), ("pageSize", "1000")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response = self
            .get("files", &query, self.metadata_timeout, folder_id)
            .await?;
        Ok(response.json().await?)
    }

    async fn download(&self, id: &str) -> DeltaResult<Vec<u8>> {
        let response = self
            .get(&format!("files/{id}"), &[("alt", "media")], self.transfer_timeout, id)
            .await?;
        Ok(response.bytes().await?.to_vec())
    }
}
