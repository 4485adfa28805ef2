//! The build collaborator and entry build dispatch

use async_trait::async_trait;
use blogsync_fs::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::entry::Entry;
use crate::multi::{MultiFileAggregator, MultiFolderInfo};

/// Failure codes reported by a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildErrorCode {
    /// The source type cannot be converted
    #[serde(rename = "WRONGTYPE")]
    WrongType,
    /// An aggregate folder had nothing to build
    #[serde(rename = "EMPTY")]
    Empty,
    #[serde(rename = "ENOENT")]
    NotFound,
    #[serde(rename = "ENOTDIR")]
    NotADirectory,
    #[serde(rename = "EISDIR")]
    IsADirectory,
    #[serde(rename = "OTHER")]
    Other,
}

impl BuildErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WrongType => "WRONGTYPE",
            Self::Empty => "EMPTY",
            Self::NotFound => "ENOENT",
            Self::NotADirectory => "ENOTDIR",
            Self::IsADirectory => "EISDIR",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for BuildErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Build failed ({code}): {message}")]
pub struct BuildError {
    pub code: BuildErrorCode,
    pub message: String,
}

impl BuildError {
    pub fn new(code: BuildErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn wrong_type(path: &NormalizedPath) -> Self {
        Self::new(BuildErrorCode::WrongType, format!("{path} cannot be converted"))
    }

    pub fn empty(path: &NormalizedPath) -> Self {
        Self::new(BuildErrorCode::Empty, format!("{path} contains no convertible files"))
    }

    pub fn not_found(path: &NormalizedPath) -> Self {
        Self::new(BuildErrorCode::NotFound, format!("{path} does not exist"))
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BuildErrorCode::Other, message)
    }

    /// Classify a filesystem error hit while reading `path`.
    pub fn from_io(path: &NormalizedPath, error: &std::io::Error) -> Self {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => BuildErrorCode::NotFound,
            std::io::ErrorKind::NotADirectory => BuildErrorCode::NotADirectory,
            std::io::ErrorKind::IsADirectory => BuildErrorCode::IsADirectory,
            _ => BuildErrorCode::Other,
        };
        Self::new(code, format!("{path}: {error}"))
    }

    /// Whether the failure means the entry's source is gone or changed
    /// kind, so the stored entry should be dropped.
    pub fn is_invalidating(&self) -> bool {
        !matches!(self.code, BuildErrorCode::Other)
    }
}

/// Converts one source file into an entry.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, blog_id: &str, path: &NormalizedPath) -> std::result::Result<Entry, BuildError>;

    /// Whether `path` is a type this builder can convert.
    fn is_convertible(&self, path: &NormalizedPath) -> bool;
}

/// What a changed path builds into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    Single(NormalizedPath),
    Multi(MultiFolderInfo),
}

impl BuildTarget {
    pub fn for_path(path: &NormalizedPath) -> Self {
        match MultiFolderInfo::detect(path) {
            Some(info) => BuildTarget::Multi(info),
            None => BuildTarget::Single(path.clone()),
        }
    }

    /// Key the resulting entry is stored under.
    pub fn entry_path(&self) -> &NormalizedPath {
        match self {
            BuildTarget::Single(path) => path,
            BuildTarget::Multi(info) => &info.folder_path,
        }
    }
}

/// Dispatches builds to the collaborator or the aggregator.
#[derive(Clone)]
pub struct EntryBuilder {
    builder: Arc<dyn Builder>,
    blogs_dir: PathBuf,
}

impl EntryBuilder {
    pub fn new(builder: Arc<dyn Builder>, blogs_dir: impl Into<PathBuf>) -> Self {
        Self {
            builder,
            blogs_dir: blogs_dir.into(),
        }
    }

    pub fn blog_root(&self, blog_id: &str) -> PathBuf {
        self.blogs_dir.join(blog_id)
    }

    pub fn is_convertible(&self, path: &NormalizedPath) -> bool {
        self.builder.is_convertible(path)
    }

    pub async fn build(&self, blog_id: &str, target: &BuildTarget) -> std::result::Result<Entry, BuildError> {
        match target {
            BuildTarget::Single(path) => self.builder.build(blog_id, path).await,
            BuildTarget::Multi(info) => {
                let root = self.blog_root(blog_id);
                MultiFileAggregator::new(self.builder.as_ref(), &root)
                    .build(blog_id, info)
                    .await
            }
        }
    }
}
