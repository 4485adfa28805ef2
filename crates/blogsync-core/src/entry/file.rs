use async_trait::async_trait;
use blogsync_fs::{ConfigStore, NormalizedPath};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{BlogEntries, Entry, EntryStore};
use crate::Result;

/// Entry store persisted as one JSON document per blog.
///
/// Layout: `<dir>/<blog_id>.json`. Every write replaces the document
/// atomically; a process-local mutex serializes read-modify-write cycles.
#[derive(Debug)]
pub struct FileEntryStore {
    dir: PathBuf,
    store: ConfigStore,
    write_lock: Mutex<()>,
}

impl FileEntryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            store: ConfigStore::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document(&self, blog_id: &str) -> PathBuf {
        self.dir.join(format!("{blog_id}.json"))
    }

    fn load(&self, blog_id: &str) -> Result<BlogEntries> {
        Ok(self
            .store
            .load_optional::<BlogEntries>(&self.document(blog_id))?
            .unwrap_or_default())
    }

    async fn modify<T>(&self, blog_id: &str, f: impl FnOnce(&mut BlogEntries) -> T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut blog = self.load(blog_id)?;
        let result = f(&mut blog);
        self.store.save(&self.document(blog_id), &blog)?;
        Ok(result)
    }
}

#[async_trait]
impl EntryStore for FileEntryStore {
    async fn get(&self, blog_id: &str, path: &NormalizedPath) -> Result<Option<Entry>> {
        Ok(self.load(blog_id)?.get(path).cloned())
    }

    async fn set(&self, blog_id: &str, entry: Entry) -> Result<()> {
        self.modify(blog_id, |b| b.set(entry)).await
    }

    async fn drop_entry(&self, blog_id: &str, path: &NormalizedPath) -> Result<Option<Entry>> {
        self.modify(blog_id, |b| b.remove(path)).await
    }

    async fn dependents(&self, blog_id: &str, path: &NormalizedPath) -> Result<Vec<NormalizedPath>> {
        Ok(self.load(blog_id)?.dependents(path))
    }

    async fn list(&self, blog_id: &str) -> Result<Vec<NormalizedPath>> {
        Ok(self.load(blog_id)?.paths())
    }
}
