//! Fake build collaborators.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use blogsync_core::build::{BuildError, Builder};
use blogsync_core::entry::{Entry, EntryStat};
use blogsync_core::preview::PreviewWriter;
use blogsync_fs::NormalizedPath;
use blogsync_fs::case::resolve_case_sensitive_path;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Builds `.txt` and `.md` files from a blogs directory.
///
/// The source is read line by line:
/// - `depends: <path>` declares a dependency; the build fails with
///   `ENOENT` when that file is missing
/// - `draft: true` marks the entry as a draft
/// - `title: <text>` sets the `title` metadata
///
/// Every other line becomes a `<p>` in the HTML.
#[derive(Debug)]
pub struct FakeBuilder {
    blogs_dir: PathBuf,
    builds: Mutex<Vec<NormalizedPath>>,
}

impl FakeBuilder {
    pub fn new(blogs_dir: impl Into<PathBuf>) -> Self {
        Self {
            blogs_dir: blogs_dir.into(),
            builds: Mutex::new(Vec::new()),
        }
    }

    /// Paths built so far, in order.
    pub fn builds(&self) -> Vec<NormalizedPath> {
        self.builds.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(&self, blog_id: &str, path: &NormalizedPath) -> Result<Entry, BuildError> {
        if !self.is_convertible(path) {
            return Err(BuildError::wrong_type(path));
        }
        self.builds.lock().unwrap_or_else(|p| p.into_inner()).push(path.clone());

        let root = self.blogs_dir.join(blog_id);
        let source = resolve_case_sensitive_path(&root, path).await;
        let metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| BuildError::from_io(path, &e))?;
        let content = tokio::fs::read_to_string(&source)
            .await
            .map_err(|e| BuildError::from_io(path, &e))?;

        let mut entry = Entry::new(path.clone());
        let mut html = String::new();
        for line in content.lines() {
            if let Some(dependency) = line.strip_prefix("depends:") {
                let dependency = NormalizedPath::new(dependency.trim());
                let target = resolve_case_sensitive_path(&root, &dependency).await;
                if tokio::fs::metadata(&target).await.is_err() {
                    return Err(BuildError::not_found(&dependency));
                }
                entry.dependencies.push(dependency);
            } else if let Some(flag) = line.strip_prefix("draft:") {
                entry.draft = flag.trim() == "true";
            } else if let Some(title) = line.strip_prefix("title:") {
                entry
                    .metadata
                    .insert("title".into(), Value::String(title.trim().to_string()));
            } else if !line.trim().is_empty() {
                html.push_str(&format!("<p>{}</p>", line.trim()));
            }
        }

        entry.html = html;
        entry.stat = EntryStat {
            size: metadata.len(),
            mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
            ctime: metadata.created().ok().map(DateTime::<Utc>::from),
        };
        Ok(entry)
    }

    fn is_convertible(&self, path: &NormalizedPath) -> bool {
        path.extension()
            .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "txt" | "md"))
    }
}

/// What a [`RecordingPreview`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewCall {
    Write(String),
    Remove(String),
}

/// Preview writer that records calls instead of touching disk.
#[derive(Debug, Default)]
pub struct RecordingPreview {
    calls: Mutex<Vec<PreviewCall>>,
}

impl RecordingPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PreviewCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, call: PreviewCall) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
    }
}

#[async_trait]
impl PreviewWriter for RecordingPreview {
    async fn write(&self, _blog_id: &str, path: &NormalizedPath) -> blogsync_core::Result<()> {
        self.record(PreviewCall::Write(path.to_string()));
        Ok(())
    }

    async fn remove(&self, _blog_id: &str, path: &NormalizedPath) -> blogsync_core::Result<()> {
        self.record(PreviewCall::Remove(path.to_string()));
        Ok(())
    }
}
