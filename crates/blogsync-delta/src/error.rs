//! Error types for blogsync-delta

use std::time::Duration;

/// Result type for delta source operations
pub type DeltaResult<T> = std::result::Result<T, DeltaError>;

/// The closed set of failures a provider adapter may report.
///
/// Adapters translate raw HTTP statuses and provider error summaries into
/// these variants at the boundary; nothing above this crate inspects
/// provider-specific error strings.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// Provider asked us to slow down
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The blog folder was deleted or moved out of reach
    #[error("Blog folder no longer exists: {path}")]
    FolderMissing { path: String },

    /// The provider invalidated the cursor; a full listing is required
    #[error("Provider reset the sync cursor")]
    Reset,

    /// Network blip or server-side failure
    #[error("Transient provider error: {message}")]
    Transient { message: String },

    #[error("Provider rejected the credentials")]
    Unauthorized,

    /// A single remote path does not exist
    #[error("Remote path not found: {path}")]
    NotFound { path: String },

    /// Provider answered with something we cannot interpret
    #[error("Unexpected provider response: {message}")]
    Protocol { message: String },

    /// Local filesystem error while inspecting the mirror
    #[error(transparent)]
    Fs(#[from] blogsync_fs::Error),
}

impl DeltaError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::FolderMissing { .. } => "FOLDER_MISSING",
            Self::Reset => "RESET",
            Self::Transient { .. } => "TRANSIENT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Protocol { .. } => "PROTOCOL",
            Self::Fs(_) => "FS",
        }
    }

    /// HTTP-style status for callers that surface errors over HTTP.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::FolderMissing { .. } => Some(409),
            Self::RateLimited { .. } => Some(429),
            Self::Unauthorized => Some(401),
            Self::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// Whether [`crate::with_retry`] should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Translate a non-success HTTP status shared by all JSON providers.
    ///
    /// Provider-specific statuses (Dropbox 409, Drive 410) are handled by
    /// the adapters before falling back to this.
    pub fn from_status(status: u16, retry_after: Option<Duration>, path: &str, body: &str) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound { path: path.to_string() },
            408 | 500..=599 => Self::transient(format!("HTTP {status}")),
            _ => Self::protocol(format!("HTTP {status}: {}", truncate(body, 200))),
        }
    }
}

impl From<reqwest::Error> for DeltaError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::protocol(e.to_string())
        } else {
            // Timeouts, connection resets and body read failures are all worth retrying
            Self::transient(e.to_string())
        }
    }
}

/// Parse a `Retry-After` header value given in seconds.
pub(crate) fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(429, "RATE_LIMITED")]
    #[case(401, "UNAUTHORIZED")]
    #[case(403, "UNAUTHORIZED")]
    #[case(404, "NOT_FOUND")]
    #[case(503, "TRANSIENT")]
    #[case(408, "TRANSIENT")]
    #[case(418, "PROTOCOL")]
    fn statuses_map_to_closed_set(#[case] status: u16, #[case] code: &str) {
        assert_eq!(DeltaError::from_status(status, None, "/a", "").code(), code);
    }

    #[test]
    fn folder_missing_reports_conflict_status() {
        let err = DeltaError::FolderMissing { path: "/blog".into() };
        assert_eq!(err.status(), Some(409));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_rate_limits_and_transients_retry() {
        assert!(DeltaError::RateLimited { retry_after: None }.is_retryable());
        assert!(DeltaError::transient("blip").is_retryable());
        assert!(!DeltaError::Reset.is_retryable());
        assert!(!DeltaError::Unauthorized.is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = DeltaError::from_status(400, None, "/", &body);
        assert!(err.to_string().len() < 300);
    }
}
