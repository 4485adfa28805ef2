//! Service wiring from resolved settings

use std::path::PathBuf;
use std::sync::Arc;

use blogsync_core::{FileEntryStore, FsPreview, Settings, SettingsResolver, SyncService};

use crate::builder::PlainBuilder;
use crate::error::{CliError, Result};

/// Settings plus the service built from them.
pub struct AppContext {
    pub settings: Settings,
    pub service: Arc<SyncService>,
}

impl AppContext {
    /// Resolve settings and wire the file-backed collaborators.
    pub fn load(config: Option<PathBuf>, config_dir: Option<PathBuf>) -> Result<Self> {
        let mut resolver = SettingsResolver::new();
        if let Some(path) = config {
            resolver = resolver.with_config_file(path);
        }
        if let Some(dir) = config_dir {
            resolver = resolver.with_global_config_dir(dir);
        }
        let settings = resolver.resolve()?;
        Ok(Self::from_settings(settings))
    }

    pub fn from_settings(settings: Settings) -> Self {
        let blogs_dir = settings.blogs_dir();
        let builder = Arc::new(PlainBuilder::new(&blogs_dir));
        let store = Arc::new(FileEntryStore::new(settings.entries_dir()));
        let preview = Arc::new(FsPreview::new(&blogs_dir));
        let service = SyncService::new(settings.clone(), builder, store, preview);
        tracing::debug!(data_dir = %settings.data_dir.display(), blogs_dir = %blogs_dir.display(), "Loaded settings");

        Self {
            settings,
            service: Arc::new(service),
        }
    }

    /// The named blog, or every configured blog when `blog` is `None`.
    pub fn blog_ids(&self, blog: Option<&str>) -> Result<Vec<String>> {
        match blog {
            Some(id) => {
                self.settings.blog(id)?;
                Ok(vec![id.to_string()])
            }
            None if self.settings.blogs.is_empty() => Err(CliError::user(
                "No blogs configured. Add a [[blogs]] table to your config file.",
            )),
            None => Ok(self.settings.blogs.iter().map(|b| b.id.clone()).collect()),
        }
    }
}
