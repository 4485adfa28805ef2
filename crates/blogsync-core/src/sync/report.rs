//! What a sync run did

use blogsync_delta::SyncCursor;
use serde::Serialize;

use crate::reconcile::ApplyReport;
use crate::resync::PushReport;
use crate::update::{UpdateOutcome, UpdateReport};

/// Report from a sync, resync or rebuild of one blog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub blog_id: String,
    /// Delta pages applied
    pub pages: usize,
    /// Pages on which the provider reset the cursor
    pub resets: usize,
    /// Whether a full pull resync ran before the delta pages
    pub resynced: bool,
    /// Local folder changes, accumulated across pages
    pub applied: ApplyReport,
    /// Remote changes, for push resyncs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushed: Option<PushReport>,
    pub updates: Vec<UpdateReport>,
    /// Paths whose entry update failed, with the error
    pub update_failures: Vec<String>,
    /// Cursor persisted at the end of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<SyncCursor>,
    /// Cache version after the run, bumped once the lock was released
    pub cache_version: u64,
}

impl SyncReport {
    pub fn new(blog_id: impl Into<String>) -> Self {
        Self {
            blog_id: blog_id.into(),
            ..Self::default()
        }
    }

    /// Fold one batch's apply report into the totals.
    pub fn absorb(&mut self, batch: ApplyReport) {
        let ApplyReport {
            deleted,
            created_dirs,
            downloaded,
            skipped_unchanged,
            placeholders,
            failures,
        } = batch;
        self.applied.deleted.extend(deleted);
        self.applied.created_dirs.extend(created_dirs);
        self.applied.downloaded.extend(downloaded);
        self.applied.skipped_unchanged.extend(skipped_unchanged);
        self.applied.placeholders.extend(placeholders);
        self.applied.failures.extend(failures);
    }

    /// No per-item failure anywhere in the run.
    pub fn is_clean(&self) -> bool {
        self.applied.is_clean()
            && self.update_failures.is_empty()
            && self.pushed.as_ref().is_none_or(|p| p.failures.is_empty())
    }

    /// Entries built during the run, dependents included.
    pub fn built(&self) -> usize {
        self.updates
            .iter()
            .map(|u| {
                let own = usize::from(matches!(u.outcome, UpdateOutcome::Built { .. }));
                own + u.dependents.rebuilt.len()
            })
            .sum()
    }

    /// Entries dropped during the run, dependents included.
    pub fn dropped(&self) -> usize {
        self.updates
            .iter()
            .map(|u| {
                let own = match &u.outcome {
                    UpdateOutcome::Dropped { paths } => paths.len(),
                    _ => 0,
                };
                own + u.dependents.dropped.len()
            })
            .sum()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("{} page(s)", self.pages),
            format!("{} downloaded", self.applied.downloaded.len()),
            format!("{} deleted", self.applied.deleted.len()),
            format!("{} folder(s) created", self.applied.created_dirs.len()),
            format!("{} built", self.built()),
            format!("{} dropped", self.dropped()),
        ];
        if let Some(pushed) = &self.pushed {
            parts.push(format!("{} uploaded", pushed.uploaded.len()));
        }
        let failures = self.applied.failures.len()
            + self.update_failures.len()
            + self.pushed.as_ref().map_or(0, |p| p.failures.len());
        if failures > 0 {
            parts.push(format!("{failures} failure(s)"));
        }
        parts.join(", ")
    }
}
