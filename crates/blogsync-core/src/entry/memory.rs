use async_trait::async_trait;
use blogsync_fs::NormalizedPath;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{BlogEntries, Entry, EntryStore};
use crate::Result;

/// Entry store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    blogs: Mutex<HashMap<String, BlogEntries>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_blog<T>(&self, blog_id: &str, f: impl FnOnce(&mut BlogEntries) -> T) -> T {
        let mut blogs = self.blogs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(blogs.entry(blog_id.to_string()).or_default())
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn get(&self, blog_id: &str, path: &NormalizedPath) -> Result<Option<Entry>> {
        Ok(self.with_blog(blog_id, |b| b.get(path).cloned()))
    }

    async fn set(&self, blog_id: &str, entry: Entry) -> Result<()> {
        self.with_blog(blog_id, |b| b.set(entry));
        Ok(())
    }

    async fn drop_entry(&self, blog_id: &str, path: &NormalizedPath) -> Result<Option<Entry>> {
        Ok(self.with_blog(blog_id, |b| b.remove(path)))
    }

    async fn dependents(&self, blog_id: &str, path: &NormalizedPath) -> Result<Vec<NormalizedPath>> {
        Ok(self.with_blog(blog_id, |b| b.dependents(path)))
    }

    async fn list(&self, blog_id: &str) -> Result<Vec<NormalizedPath>> {
        Ok(self.with_blog(blog_id, |b| b.paths()))
    }
}
