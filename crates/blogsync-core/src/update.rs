//! Bringing stored entries in line with a changed path

use blogsync_fs::case::resolve_case_sensitive_path;
use blogsync_fs::{NormalizedPath, should_ignore};
use serde::Serialize;
use std::io::ErrorKind;
use std::sync::Arc;

use crate::Result;
use crate::build::{BuildTarget, EntryBuilder};
use crate::dependents::{DependentRebuilder, RebuildReport, drop_entry, log_kept, store_entry};
use crate::entry::EntryStore;
use crate::preview::{PreviewWriter, is_preview_path};

/// What happened to the entry for a changed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum UpdateOutcome {
    /// System files and previews never become entries
    Ignored,
    /// Nothing to build here
    Unchanged,
    Built { path: NormalizedPath },
    Dropped { paths: Vec<NormalizedPath> },
    /// The build failed for a reason that does not invalidate the entry
    Kept { path: NormalizedPath, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub path: NormalizedPath,
    pub outcome: UpdateOutcome,
    pub dependents: RebuildReport,
}

/// Rebuilds, stores or drops entries as their sources change.
#[derive(Clone)]
pub struct EntryUpdater {
    builder: EntryBuilder,
    store: Arc<dyn EntryStore>,
    preview: Arc<dyn PreviewWriter>,
}

impl EntryUpdater {
    pub fn new(builder: EntryBuilder, store: Arc<dyn EntryStore>, preview: Arc<dyn PreviewWriter>) -> Self {
        Self {
            builder,
            store,
            preview,
        }
    }

    pub fn builder(&self) -> &EntryBuilder {
        &self.builder
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// Update the entry for `path` and then its direct dependents.
    pub async fn update(&self, blog_id: &str, path: &NormalizedPath) -> Result<UpdateReport> {
        if should_ignore(path.as_str()) || is_preview_path(path) {
            return Ok(UpdateReport {
                path: path.clone(),
                outcome: UpdateOutcome::Ignored,
                dependents: RebuildReport::default(),
            });
        }

        let outcome = match BuildTarget::for_path(path) {
            target @ BuildTarget::Multi(_) => self.build(blog_id, &target).await?,
            BuildTarget::Single(single) => self.update_single(blog_id, &single).await?,
        };

        let dependents = DependentRebuilder::new(self.store.as_ref(), &self.builder, self.preview.as_ref())
            .rebuild(blog_id, path)
            .await?;

        Ok(UpdateReport {
            path: path.clone(),
            outcome,
            dependents,
        })
    }

    async fn update_single(&self, blog_id: &str, path: &NormalizedPath) -> Result<UpdateOutcome> {
        let native = resolve_case_sensitive_path(&self.builder.blog_root(blog_id), path).await;

        match tokio::fs::metadata(&native).await {
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                self.drop_under(blog_id, path).await
            }
            Err(e) => Err(blogsync_fs::Error::io(&native, e).into()),
            Ok(metadata) if metadata.is_dir() => Ok(UpdateOutcome::Unchanged),
            Ok(_) if self.builder.is_convertible(path) => {
                self.build(blog_id, &BuildTarget::Single(path.clone())).await
            }
            Ok(_) => match drop_entry(self.store.as_ref(), self.preview.as_ref(), blog_id, path).await? {
                Some(entry) => Ok(UpdateOutcome::Dropped {
                    paths: vec![entry.path],
                }),
                None => Ok(UpdateOutcome::Unchanged),
            },
        }
    }

    async fn build(&self, blog_id: &str, target: &BuildTarget) -> Result<UpdateOutcome> {
        let path = target.entry_path();

        match self.builder.build(blog_id, target).await {
            Ok(entry) => {
                store_entry(self.store.as_ref(), self.preview.as_ref(), blog_id, entry).await?;
                Ok(UpdateOutcome::Built { path: path.clone() })
            }
            Err(e) if e.is_invalidating() => {
                let dropped = drop_entry(self.store.as_ref(), self.preview.as_ref(), blog_id, path).await?;
                Ok(match dropped {
                    Some(entry) => UpdateOutcome::Dropped {
                        paths: vec![entry.path],
                    },
                    None => UpdateOutcome::Unchanged,
                })
            }
            Err(e) => {
                log_kept(blog_id, path, &e);
                Ok(UpdateOutcome::Kept {
                    path: path.clone(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// The source is gone: drop every entry at or below it.
    async fn drop_under(&self, blog_id: &str, path: &NormalizedPath) -> Result<UpdateOutcome> {
        let mut dropped = Vec::new();
        for stored in self.store.list(blog_id).await? {
            if stored.starts_with_ignore_case(path) {
                if let Some(entry) = drop_entry(self.store.as_ref(), self.preview.as_ref(), blog_id, &stored).await? {
                    dropped.push(entry.path);
                }
            }
        }

        Ok(if dropped.is_empty() {
            UpdateOutcome::Unchanged
        } else {
            UpdateOutcome::Dropped { paths: dropped }
        })
    }
}
