//! Built entries and the stores that hold them

mod file;
mod index;
mod memory;

pub use file::FileEntryStore;
pub use index::BlogEntries;
pub use memory::MemoryEntryStore;

use async_trait::async_trait;
use blogsync_fs::NormalizedPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Filesystem facts about an entry's source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStat {
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub ctime: Option<DateTime<Utc>>,
}

/// A built blog post or page.
///
/// Entries are keyed by their source path: the file for ordinary entries,
/// the `+` folder for aggregated ones. `public_path` is the path the entry
/// is published under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub path: NormalizedPath,
    pub public_path: NormalizedPath,
    pub html: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Other blog files this entry consumed while building
    #[serde(default)]
    pub dependencies: Vec<NormalizedPath>,
    pub date_stamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub stat: EntryStat,
}

impl Entry {
    pub fn new(path: impl Into<NormalizedPath>) -> Self {
        let path = path.into();
        Self {
            public_path: path.clone(),
            path,
            html: String::new(),
            metadata: Map::new(),
            dependencies: Vec::new(),
            date_stamp: None,
            draft: false,
            stat: EntryStat::default(),
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    pub fn with_dependency(mut self, path: impl Into<NormalizedPath>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    pub fn with_draft(mut self, draft: bool) -> Self {
        self.draft = draft;
        self
    }

    pub fn key(&self) -> String {
        self.path.lookup_key()
    }
}

/// Persistent storage for built entries and the dependents index.
///
/// `set` and `drop_entry` keep the dependents multimap in step with the
/// stored entries: the dependency edges of an entry are replaced when it is
/// set and removed when it is dropped. Writes are last-writer-wins per key.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn get(&self, blog_id: &str, path: &NormalizedPath) -> Result<Option<Entry>>;

    async fn set(&self, blog_id: &str, entry: Entry) -> Result<()>;

    /// Remove an entry, returning what was stored.
    async fn drop_entry(&self, blog_id: &str, path: &NormalizedPath) -> Result<Option<Entry>>;

    /// Entries that declared `path` as a dependency.
    async fn dependents(&self, blog_id: &str, path: &NormalizedPath) -> Result<Vec<NormalizedPath>>;

    /// Every stored entry path for a blog, sorted.
    async fn list(&self, blog_id: &str) -> Result<Vec<NormalizedPath>>;
}
