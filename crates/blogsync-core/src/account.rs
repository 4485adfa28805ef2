//! Persisted per-blog account records
//!
//! The record carries the resume cursor, the time of the last successful
//! sync and the error state shown to the user. One JSON document per blog
//! under `<data_dir>/accounts/`.

use blogsync_delta::{Provider, SyncCursor};
use blogsync_fs::ConfigStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::check_blog_id;
use crate::reconcile::ApplyReport;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub blog_id: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<SyncCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Display path of the remote folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub setup_complete: bool,
    /// A move of the blog's files to another provider is in progress
    #[serde(default)]
    pub transferring: bool,
    /// The next sync should run a full resync first
    #[serde(default)]
    pub resync_requested: bool,
    /// Lookup keys of local files that are empty stand-ins for remote
    /// files too large or of an unsupported type
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub placeholders: BTreeSet<String>,
}

impl AccountRecord {
    pub fn new(blog_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            blog_id: blog_id.into(),
            provider,
            cursor: None,
            last_sync: None,
            error_code: None,
            error_message: None,
            folder: None,
            folder_id: None,
            setup_complete: false,
            transferring: false,
            resync_requested: false,
            placeholders: BTreeSet::new(),
        }
    }

    /// Record a successfully applied page.
    pub fn advance(&mut self, cursor: SyncCursor) {
        self.cursor = Some(cursor);
        self.last_sync = Some(Utc::now());
        self.error_code = None;
        self.error_message = None;
    }

    /// Record a failure the way the user should see it.
    pub fn record_error(&mut self, error: &Error) {
        self.error_code = Some(error.code().to_string());
        self.error_message = Some(error.user_message().to_string());
    }

    pub fn has_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Keep the placeholder set in step with an applied batch.
    pub fn note_applied(&mut self, report: &ApplyReport) {
        for path in &report.deleted {
            let key = path.lookup_key();
            let below = format!("{key}/");
            self.placeholders.retain(|p| *p != key && !p.starts_with(&below));
        }
        for path in &report.downloaded {
            self.placeholders.remove(&path.lookup_key());
        }
        for path in &report.placeholders {
            self.placeholders.insert(path.lookup_key());
        }
    }

    pub fn is_placeholder(&self, path: &blogsync_fs::NormalizedPath) -> bool {
        self.placeholders.contains(&path.lookup_key())
    }
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    dir: PathBuf,
    store: ConfigStore,
}

impl AccountStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("accounts"),
            store: ConfigStore::new(),
        }
    }

    fn path_for(&self, blog_id: &str) -> Result<PathBuf> {
        check_blog_id(blog_id)?;
        Ok(self.dir.join(format!("{blog_id}.json")))
    }

    pub fn load(&self, blog_id: &str) -> Result<Option<AccountRecord>> {
        Ok(self.store.load_optional(&self.path_for(blog_id)?)?)
    }

    /// The stored record, or a fresh one for `provider`.
    ///
    /// A stored record for a different provider is replaced: the cursor of
    /// one provider means nothing to another.
    pub fn load_or_new(&self, blog_id: &str, provider: Provider) -> Result<AccountRecord> {
        match self.load(blog_id)? {
            Some(record) if record.provider == provider => Ok(record),
            Some(record) => {
                tracing::info!(
                    blog_id,
                    from = %record.provider,
                    to = %provider,
                    "Provider changed; starting from a fresh account record"
                );
                Ok(AccountRecord::new(blog_id, provider))
            }
            None => Ok(AccountRecord::new(blog_id, provider)),
        }
    }

    pub fn save(&self, record: &AccountRecord) -> Result<()> {
        self.store.save(&self.path_for(&record.blog_id)?, record)?;
        Ok(())
    }

    pub fn remove(&self, blog_id: &str) -> Result<bool> {
        let path = self.path_for(blog_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(blogsync_fs::Error::io(&path, e).into()),
        }
    }
}
