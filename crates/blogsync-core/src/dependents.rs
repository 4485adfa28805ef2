//! One-hop rebuilds of entries that depend on a changed file

use blogsync_fs::NormalizedPath;
use serde::Serialize;

use crate::Result;
use crate::build::{BuildError, BuildTarget, EntryBuilder};
use crate::entry::{Entry, EntryStore};
use crate::preview::PreviewWriter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub rebuilt: Vec<NormalizedPath>,
    pub dropped: Vec<NormalizedPath>,
    /// Entries left stale because their rebuild failed
    pub failed: Vec<NormalizedPath>,
}

impl RebuildReport {
    pub fn is_empty(&self) -> bool {
        self.rebuilt.is_empty() && self.dropped.is_empty() && self.failed.is_empty()
    }
}

/// Rebuilds the dependents of a changed path.
///
/// Only direct dependents are rebuilt. Rebuilding one does not trigger
/// the dependents of its own path.
pub struct DependentRebuilder<'a> {
    store: &'a dyn EntryStore,
    builder: &'a EntryBuilder,
    preview: &'a dyn PreviewWriter,
}

impl<'a> DependentRebuilder<'a> {
    pub fn new(store: &'a dyn EntryStore, builder: &'a EntryBuilder, preview: &'a dyn PreviewWriter) -> Self {
        Self { store, builder, preview }
    }

    pub async fn rebuild(&self, blog_id: &str, changed: &NormalizedPath) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();

        for dependent in self.store.dependents(blog_id, changed).await? {
            if dependent.eq_ignore_case(changed) {
                continue;
            }

            let target = BuildTarget::for_path(&dependent);
            match self.builder.build(blog_id, &target).await {
                Ok(entry) => {
                    store_entry(self.store, self.preview, blog_id, entry).await?;
                    report.rebuilt.push(dependent);
                }
                Err(e) if e.is_invalidating() => {
                    tracing::debug!(blog_id, path = %dependent, code = %e.code, "Dependent no longer builds; dropping it");
                    drop_entry(self.store, self.preview, blog_id, &dependent).await?;
                    report.dropped.push(dependent);
                }
                Err(e) => {
                    log_kept(blog_id, &dependent, &e);
                    report.failed.push(dependent);
                }
            }
        }

        Ok(report)
    }
}

/// Persist a freshly built entry and bring its preview in line with its
/// draft flag.
pub(crate) async fn store_entry(
    store: &dyn EntryStore,
    preview: &dyn PreviewWriter,
    blog_id: &str,
    entry: Entry,
) -> Result<()> {
    let path = entry.path.clone();
    let draft = entry.draft;
    store.set(blog_id, entry).await?;
    if draft {
        preview.write(blog_id, &path).await
    } else {
        preview.remove(blog_id, &path).await
    }
}

/// Drop an entry, removing its preview if it was a draft.
pub(crate) async fn drop_entry(
    store: &dyn EntryStore,
    preview: &dyn PreviewWriter,
    blog_id: &str,
    path: &NormalizedPath,
) -> Result<Option<Entry>> {
    let dropped = store.drop_entry(blog_id, path).await?;
    if let Some(entry) = &dropped {
        if entry.draft {
            preview.remove(blog_id, &entry.path).await?;
        }
    }
    Ok(dropped)
}

pub(crate) fn log_kept(blog_id: &str, path: &NormalizedPath, error: &BuildError) {
    tracing::warn!(blog_id, path = %path, error = %error, "Build failed; keeping the existing entry");
}
