//! Error types for blogsync-core

use std::time::Duration;

use blogsync_delta::{DeltaError, Provider};

use crate::build::BuildError;
use crate::lock::Diagnostics;

/// Result type for blogsync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blogsync-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another holder owns the blog folder lock; try again later
    #[error("Blog {blog_id} is being synced by another process; retry later")]
    LockUnavailable { blog_id: String, retry_after: Duration },

    /// The lock was lost while we still believed we held it
    #[error("Lock for blog {blog_id} was compromised: {reason}")]
    LockCompromised {
        blog_id: String,
        reason: String,
        diagnostics: Box<Diagnostics>,
    },

    /// The blog's remote folder no longer exists
    #[error("Your folder no longer exists ({path})")]
    FolderMissing { blog_id: String, path: String },

    #[error("Unknown blog: {0}")]
    UnknownBlog(String),

    #[error("{operation} is not supported by the {provider} provider")]
    UnsupportedOperation { provider: Provider, operation: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    // Transparent wrappers for underlying crate errors
    /// Provider error from blogsync-delta
    #[error(transparent)]
    Delta(#[from] DeltaError),

    /// Build collaborator failure
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Filesystem error from blogsync-fs
    #[error(transparent)]
    Fs(#[from] blogsync_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::LockUnavailable { .. } => "LOCK_UNAVAILABLE",
            Self::LockCompromised { .. } => "LOCK_COMPROMISED",
            Self::FolderMissing { .. } => "FOLDER_MISSING",
            Self::UnknownBlog(_) => "UNKNOWN_BLOG",
            Self::UnsupportedOperation { .. } => "UNSUPPORTED",
            Self::Config { .. } | Self::TomlDe(_) => "CONFIG",
            Self::Delta(e) => e.code(),
            Self::Build(e) => e.code.as_str(),
            Self::Fs(_) | Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
        }
    }

    /// Status an HTTP-facing caller should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::LockUnavailable { .. } => 423,
            Self::FolderMissing { .. } => 409,
            Self::UnknownBlog(_) => 404,
            Self::Delta(e) => e.status().unwrap_or(502),
            _ => 500,
        }
    }

    /// `Retry-After` hint for lock contention.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockUnavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, Self::LockUnavailable { .. })
    }

    /// Short message persisted on the account record for the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::FolderMissing { .. } | Self::Delta(DeltaError::FolderMissing { .. }) => {
                "Your folder no longer exists"
            }
            Self::Delta(DeltaError::Unauthorized) => "Please reconnect your account",
            Self::Delta(_) => "Failed to fetch changes",
            Self::LockUnavailable { .. } => "A sync is already in progress",
            _ => "Failed to sync your folder",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_contention_maps_to_retry_later() {
        let err = Error::LockUnavailable {
            blog_id: "b".into(),
            retry_after: Duration::from_secs(10),
        };
        assert_eq!(err.http_status(), 423);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
        assert_eq!(err.code(), "LOCK_UNAVAILABLE");
    }

    #[test]
    fn provider_errors_keep_their_codes() {
        let err = Error::from(DeltaError::FolderMissing { path: "/blog".into() });
        assert_eq!(err.code(), "FOLDER_MISSING");
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.user_message(), "Your folder no longer exists");

        let err = Error::from(DeltaError::transient("timeout"));
        assert_eq!(err.user_message(), "Failed to fetch changes");
    }
}
