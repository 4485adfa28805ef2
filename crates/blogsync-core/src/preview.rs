//! Draft preview placeholders written back into the blog folder

use async_trait::async_trait;
use blogsync_fs::case::{resolve_case_sensitive_path, resolve_target_path};
use blogsync_fs::constants::{PREVIEW_SUFFIX, is_preview_name};
use blogsync_fs::{NormalizedPath, RobustnessConfig, io};
use std::path::PathBuf;

use crate::Result;

/// Writes and removes the preview placeholder of a draft entry.
#[async_trait]
pub trait PreviewWriter: Send + Sync {
    async fn write(&self, blog_id: &str, path: &NormalizedPath) -> Result<()>;

    /// Removing a preview that does not exist is not an error.
    async fn remove(&self, blog_id: &str, path: &NormalizedPath) -> Result<()>;
}

/// `posts/Hello.md` -> `posts/Hello [preview].html`
pub fn preview_path(path: &NormalizedPath) -> NormalizedPath {
    let stem = path.file_stem().unwrap_or_default();
    let name = format!("{stem}{PREVIEW_SUFFIX}");
    match path.parent() {
        Some(parent) => parent.join(&name),
        None => NormalizedPath::new(name),
    }
}

pub fn is_preview_path(path: &NormalizedPath) -> bool {
    path.file_name().is_some_and(is_preview_name)
}

/// Preview placeholders on the local filesystem under `<blogs_dir>/<blog_id>`.
#[derive(Debug, Clone)]
pub struct FsPreview {
    blogs_dir: PathBuf,
    robustness: RobustnessConfig,
}

impl FsPreview {
    pub fn new(blogs_dir: impl Into<PathBuf>) -> Self {
        Self {
            blogs_dir: blogs_dir.into(),
            robustness: RobustnessConfig::default(),
        }
    }
}

fn placeholder_html(path: &NormalizedPath) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Preview</title></head>\n<body>\n<p>{} is a draft. It will not be published until you remove the draft flag.</p>\n</body>\n</html>\n",
        path.file_name().unwrap_or_default()
    )
}

#[async_trait]
impl PreviewWriter for FsPreview {
    async fn write(&self, blog_id: &str, path: &NormalizedPath) -> Result<()> {
        let root = self.blogs_dir.join(blog_id);
        let target = resolve_target_path(&root, &preview_path(path)).await;
        io::write_atomic_async(&target, placeholder_html(path).into_bytes(), self.robustness).await?;
        tracing::debug!(blog_id, path = %path, "Wrote preview placeholder");
        Ok(())
    }

    async fn remove(&self, blog_id: &str, path: &NormalizedPath) -> Result<()> {
        let root = self.blogs_dir.join(blog_id);
        let target = resolve_case_sensitive_path(&root, &preview_path(path)).await;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(blogsync_fs::Error::io(&target, e).into()),
        }
    }
}
