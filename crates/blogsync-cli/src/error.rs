//! Error types for blogsync-cli

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Exit status for "try again later" (sysexits `EX_TEMPFAIL`)
pub const EXIT_RETRY_LATER: i32 = 75;

/// Errors that can occur in CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Error from blogsync-core
    #[error(transparent)]
    Core(#[from] blogsync_core::Error),

    /// Error from blogsync-fs
    #[error(transparent)]
    Fs(#[from] blogsync_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// User-facing error with a message
    #[error("{message}")]
    User { message: String },
}

impl CliError {
    /// Create a new user error with the given message
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(e) if e.is_lock_unavailable() => EXIT_RETRY_LATER,
            _ => 1,
        }
    }
}
