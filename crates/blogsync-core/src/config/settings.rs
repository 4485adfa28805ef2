use blogsync_delta::{Provider, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::lock::LockConfig;
use crate::reconcile::{DEFAULT_MAX_FILE_SIZE, MkdirConflictPolicy, ReconcileOptions};
use crate::{Error, Result};

/// Effective configuration of a blogsync process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Accounts, entries and provider state
    pub data_dir: PathBuf,
    /// Local blog folders, one per blog id. Defaults to `<data_dir>/blogs`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blogs_dir: Option<PathBuf>,
    /// Lock files. Defaults to the blogs directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,
    pub lock: LockSettings,
    pub reconcile: ReconcileSettings,
    pub retry: RetrySettings,
    pub timeouts: TimeoutSettings,
    /// Blogs synced at once by `sync_many`
    pub concurrency: usize,
    pub blogs: Vec<BlogConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .map(|d| d.join("blogsync"))
                .unwrap_or_else(|| PathBuf::from(".blogsync")),
            blogs_dir: None,
            lock_dir: None,
            lock: LockSettings::default(),
            reconcile: ReconcileSettings::default(),
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
            concurrency: 4,
            blogs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub stale_ms: u64,
    pub update_ms: u64,
    pub fresh_process_window_secs: u64,
    pub established_retries: u32,
    pub established_min_wait_ms: u64,
    pub established_max_wait_ms: u64,
    pub diagnostics_timeout_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            stale_ms: 10_000,
            update_ms: 3_000,
            fresh_process_window_secs: 60,
            established_retries: 3,
            established_min_wait_ms: 100,
            established_max_wait_ms: 1_000,
            diagnostics_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub max_file_size: u64,
    pub unsupported_extensions: Vec<String>,
    pub mkdir_conflict: MkdirConflictPolicy,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            unsupported_extensions: Vec::new(),
            mkdir_conflict: MkdirConflictPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub max_rate_limited_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_rate_limited_attempts: 10,
            initial_interval_ms: 500,
            max_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub metadata_secs: u64,
    /// Downloads, uploads and full listings
    pub transfer_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            metadata_secs: 15,
            transfer_secs: 120,
        }
    }
}

/// One configured blog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogConfig {
    pub id: String,
    pub provider: Provider,
    /// Source directory for the `local` provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Remote folder id (Dropbox, Google Drive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Mac agent base URL (iCloud)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_url: Option<String>,
}

impl BlogConfig {
    pub fn local(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            provider: Provider::Local,
            source: Some(source.into()),
            folder_id: None,
            agent_url: None,
        }
    }
}

impl Settings {
    pub fn blogs_dir(&self) -> PathBuf {
        self.blogs_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("blogs"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir.clone().unwrap_or_else(|| self.blogs_dir())
    }

    pub fn entries_dir(&self) -> PathBuf {
        self.data_dir.join("entries")
    }

    pub fn blog_folder(&self, blog_id: &str) -> PathBuf {
        self.blogs_dir().join(blog_id)
    }

    pub fn blog(&self, blog_id: &str) -> Result<&BlogConfig> {
        self.blogs
            .iter()
            .find(|b| b.id == blog_id)
            .ok_or_else(|| Error::UnknownBlog(blog_id.to_string()))
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            stale_after: Duration::from_millis(self.lock.stale_ms),
            update_interval: Duration::from_millis(self.lock.update_ms),
            fresh_process_window: Duration::from_secs(self.lock.fresh_process_window_secs),
            established_retries: self.lock.established_retries,
            established_min_wait: Duration::from_millis(self.lock.established_min_wait_ms),
            established_max_wait: Duration::from_millis(self.lock.established_max_wait_ms),
            diagnostics_timeout: Duration::from_millis(self.lock.diagnostics_timeout_ms),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            max_file_size: self.reconcile.max_file_size,
            unsupported_extensions: self
                .reconcile
                .unsupported_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            mkdir_conflict: self.reconcile.mkdir_conflict,
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            max_rate_limited_attempts: self.retry.max_rate_limited_attempts.max(1),
            initial_interval: Duration::from_millis(self.retry.initial_interval_ms),
            max_interval: Duration::from_millis(self.retry.max_interval_ms),
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.metadata_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.transfer_secs)
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.lock.update_ms == 0 || self.lock.update_ms >= self.lock.stale_ms {
            return Err(Error::config(format!(
                "lock.update_ms ({}) must be positive and shorter than lock.stale_ms ({})",
                self.lock.update_ms, self.lock.stale_ms
            )));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }

        let mut seen = HashSet::new();
        for blog in &self.blogs {
            check_blog_id(&blog.id)?;
            if !seen.insert(blog.id.as_str()) {
                return Err(Error::config(format!("blog {} is configured twice", blog.id)));
            }
            let missing = match blog.provider {
                Provider::Local if blog.source.is_none() => Some("source"),
                Provider::GoogleDrive if blog.folder_id.is_none() => Some("folder_id"),
                Provider::ICloud if blog.agent_url.is_none() => Some("agent_url"),
                _ => None,
            };
            if let Some(field) = missing {
                return Err(Error::config(format!(
                    "blog {} uses the {} provider and needs `{field}`",
                    blog.id, blog.provider
                )));
            }
        }
        Ok(())
    }
}

/// Reject blog ids that cannot be used as a single file name.
///
/// Ids name the lock file and the account record, so they must not be
/// empty, contain separators or start with a dot.
pub fn check_blog_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(Error::config(format!("invalid blog id {id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.blogs_dir(), settings.data_dir.join("blogs"));
        assert_eq!(settings.lock_dir(), settings.blogs_dir());
        assert_eq!(settings.lock_config(), LockConfig::default());
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
    }

    #[rstest]
    #[case::renewal_too_slow(|s: &mut Settings| s.lock.update_ms = s.lock.stale_ms)]
    #[case::no_concurrency(|s: &mut Settings| s.concurrency = 0)]
    #[case::bad_id(|s: &mut Settings| s.blogs.push(BlogConfig::local("../escape", "/tmp")))]
    #[case::duplicate(|s: &mut Settings| {
        s.blogs.push(BlogConfig::local("a", "/tmp"));
        s.blogs.push(BlogConfig::local("a", "/tmp"));
    })]
    #[case::local_without_source(|s: &mut Settings| {
        let mut blog = BlogConfig::local("a", "/tmp");
        blog.source = None;
        s.blogs.push(blog);
    })]
    fn invalid_settings_are_rejected(#[case] break_it: fn(&mut Settings)) {
        let mut settings = Settings::default();
        break_it(&mut settings);
        assert!(matches!(settings.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn unsupported_extensions_are_normalised() {
        let mut settings = Settings::default();
        settings.reconcile.unsupported_extensions = vec![".MOV".into(), "psd".into()];
        assert_eq!(settings.reconcile_options().unsupported_extensions, vec!["mov", "psd"]);
    }

    #[test]
    fn unknown_blog_is_an_error() {
        let settings = Settings::default();
        assert!(matches!(settings.blog("nope"), Err(Error::UnknownBlog(_))));
    }
}
