//! SyncService implementation
//!
//! The service is the only layer that decides what a failure means: it
//! persists the account error state, requests resyncs, and releases the
//! folder lock whatever happens below it.

use std::collections::HashSet;
use std::sync::Arc;

use blogsync_delta::{DeltaError, RemoteProvider};
use blogsync_fs::NormalizedPath;
use blogsync_fs::tree::list_recursive;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::account::{AccountRecord, AccountStore};
use crate::build::{Builder, BuildTarget, EntryBuilder};
use crate::config::Settings;
use crate::entry::EntryStore;
use crate::lock::{AcquirePolicy, FolderHandle, LockInfo, SyncLock};
use crate::preview::PreviewWriter;
use crate::providers;
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::registry::{BlogRegistry, RegistrySnapshot};
use crate::resync::{self, Direction};
use crate::update::EntryUpdater;
use crate::{Error, Result};

use super::SyncReport;

/// Everything known about one blog, for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct BlogStatus {
    pub blog_id: String,
    pub lock: LockInfo,
    pub registry: Option<RegistrySnapshot>,
    pub account: Option<AccountRecord>,
}

/// Entry point for syncing blog folders.
///
/// Every operation runs under the blog's [`SyncLock`]:
/// - **sync**: apply the provider's change feed page by page, in cursor order
/// - **resync**: compare full listings and pull or push the difference
/// - **rebuild**: rebuild every entry from the local folder
pub struct SyncService {
    settings: Settings,
    lock: SyncLock,
    registry: Arc<BlogRegistry>,
    accounts: AccountStore,
    updater: EntryUpdater,
    options: ReconcileOptions,
}

impl SyncService {
    /// Create a service with a file-backed lock in the configured lock dir.
    pub fn new(
        settings: Settings,
        builder: Arc<dyn Builder>,
        store: Arc<dyn EntryStore>,
        preview: Arc<dyn PreviewWriter>,
    ) -> Self {
        let registry = Arc::new(BlogRegistry::new());
        let lock = SyncLock::file_backed(settings.lock_dir(), settings.lock_config(), Arc::clone(&registry));
        let accounts = AccountStore::new(&settings.data_dir);
        let updater = EntryUpdater::new(EntryBuilder::new(builder, settings.blogs_dir()), store, preview);
        let options = settings.reconcile_options();

        Self {
            settings,
            lock,
            registry,
            accounts,
            updater,
            options,
        }
    }

    pub fn with_lock_policy(mut self, policy: AcquirePolicy) -> Self {
        self.lock = self.lock.with_policy(policy);
        self
    }

    /// Replace the lock; the service adopts the lock's registry.
    pub fn with_lock(mut self, lock: SyncLock) -> Self {
        self.registry = Arc::clone(lock.registry());
        self.lock = lock;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<BlogRegistry> {
        &self.registry
    }

    pub fn lock(&self) -> &SyncLock {
        &self.lock
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn updater(&self) -> &EntryUpdater {
        &self.updater
    }

    /// Provider for a configured blog.
    pub fn connect(&self, blog_id: &str) -> Result<Arc<dyn RemoteProvider>> {
        providers::connect(&self.settings, self.settings.blog(blog_id)?)
    }

    /// Apply the provider's pending changes to the blog folder.
    ///
    /// # Errors
    ///
    /// [`Error::LockUnavailable`] when another sync holds the folder,
    /// [`Error::FolderMissing`] when the remote folder is gone, and any
    /// provider failure that survived the retry policy. Per-item apply and
    /// build failures are reported in the [`SyncReport`] instead.
    pub async fn sync(&self, blog_id: &str, provider: &dyn RemoteProvider) -> Result<SyncReport> {
        let handle = self.lock.acquire(blog_id).await?;
        let result = self.sync_locked(&handle, provider).await;
        self.finish(handle, result).await
    }

    /// Compare full listings and reconcile in `direction`.
    pub async fn resync(
        &self,
        blog_id: &str,
        provider: &dyn RemoteProvider,
        direction: Direction,
    ) -> Result<SyncReport> {
        let handle = self.lock.acquire(blog_id).await?;
        let result = self.resync_locked(&handle, provider, direction).await;
        self.finish(handle, result).await
    }

    /// Rebuild every entry of a blog from its local folder.
    ///
    /// Stored entries whose source no longer exists are dropped.
    pub async fn rebuild(&self, blog_id: &str) -> Result<SyncReport> {
        let handle = self.lock.acquire(blog_id).await?;
        let result = self.rebuild_locked(&handle).await;
        self.finish(handle, result).await
    }

    /// Sync several blogs concurrently, at most `concurrency` at a time.
    ///
    /// Results are sorted by blog id. Different blogs never contend for
    /// the same lock.
    pub async fn sync_many(
        self: Arc<Self>,
        jobs: Vec<(String, Arc<dyn RemoteProvider>)>,
    ) -> Vec<(String, Result<SyncReport>)> {
        let limit = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (blog_id, provider) in jobs {
            let service = Arc::clone(&self);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let result = service.sync(&blog_id, provider.as_ref()).await;
                (blog_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "Sync task did not complete"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Lock, registry and account state for one blog.
    pub async fn status(&self, blog_id: &str) -> Result<BlogStatus> {
        Ok(BlogStatus {
            blog_id: blog_id.to_string(),
            lock: self.lock.inspect(blog_id).await?,
            registry: self.registry.snapshot(blog_id),
            account: self.accounts.load(blog_id)?,
        })
    }

    /// Forget a blog: registry slot and persisted account record.
    pub fn disconnect(&self, blog_id: &str) -> Result<bool> {
        let had_slot = self.registry.disconnect(blog_id);
        let had_account = self.accounts.remove(blog_id)?;
        tracing::info!(blog_id, "Disconnected blog");
        Ok(had_slot || had_account)
    }

    async fn sync_locked(&self, handle: &FolderHandle, provider: &dyn RemoteProvider) -> Result<SyncReport> {
        let blog_id = handle.blog_id();
        let root = self.blog_root(blog_id).await?;
        let mut account = self.accounts.load_or_new(blog_id, provider.provider())?;
        let mut report = SyncReport::new(blog_id);

        if account.resync_requested {
            if provider.tree().is_some() {
                handle.status("Resyncing folder");
                let applied = resync::pull(provider, &root, &self.options, handle).await?;
                account.note_applied(&applied);
                self.update_paths(handle, &applied.touched(), &mut report).await?;
                report.absorb(applied);
                report.resynced = true;
            } else {
                handle.log("Resync requested; restarting from a full listing");
                account.cursor = None;
            }
            account.resync_requested = false;
            self.accounts.save(&account)?;
        }

        let mut reset_seen = false;
        loop {
            handle.ensure_held().await?;

            let page = match provider.changes(account.cursor.as_ref()).await {
                Ok(page) => page,
                Err(e) => return Err(self.record_failure(&mut account, e)),
            };

            if page.reset {
                report.resets += 1;
                reset_seen = true;
                handle.log("Provider reset the cursor; applying a full listing");
            }
            handle.status(format!("Applying {} change(s)", page.entries.len()));

            let applied = {
                let _permit = self.registry.batch_permit(blog_id).await;
                Reconciler::new(&root, provider, &self.options)
                    .with_guard(handle)
                    .apply(page.entries)
                    .await?
            };
            let item_failures = !applied.is_clean();
            account.note_applied(&applied);
            self.update_paths(handle, &applied.touched(), &mut report).await?;
            report.absorb(applied);
            report.pages += 1;

            // The page is applied; only now may the cursor move past it
            account.advance(page.cursor.clone());
            if item_failures {
                account.resync_requested = true;
            }
            self.accounts.save(&account)?;
            tracing::debug!(blog_id, cursor = %page.cursor, "Advanced cursor");
            report.cursor = Some(page.cursor);

            if !page.has_more {
                break;
            }
        }

        // A fresh listing carries no deletions for what vanished meanwhile
        if reset_seen {
            if provider.tree().is_some() {
                handle.status("Resyncing folder after cursor reset");
                let applied = resync::pull(provider, &root, &self.options, handle).await?;
                if !applied.is_clean() {
                    account.resync_requested = true;
                }
                account.note_applied(&applied);
                self.update_paths(handle, &applied.touched(), &mut report).await?;
                report.absorb(applied);
                report.resynced = true;
            } else {
                tracing::warn!(
                    blog_id,
                    "Cursor reset by a provider without full listings; remote deletions may be missed"
                );
            }
        }

        account.setup_complete = true;
        self.accounts.save(&account)?;
        handle.status("Synced");
        Ok(report)
    }

    async fn resync_locked(
        &self,
        handle: &FolderHandle,
        provider: &dyn RemoteProvider,
        direction: Direction,
    ) -> Result<SyncReport> {
        let blog_id = handle.blog_id();
        let root = self.blog_root(blog_id).await?;
        let mut report = SyncReport::new(blog_id);
        report.resynced = true;

        match direction {
            Direction::Pull => {
                handle.status("Pulling folder from remote");
                let applied = resync::pull(provider, &root, &self.options, handle).await?;
                let mut account = self.accounts.load_or_new(blog_id, provider.provider())?;
                account.note_applied(&applied);
                self.update_paths(handle, &applied.touched(), &mut report).await?;
                report.absorb(applied);

                account.resync_requested = !report.applied.is_clean();
                self.accounts.save(&account)?;
                report.cursor = account.cursor;
            }
            Direction::Push => {
                handle.status("Pushing folder to remote");
                let account = self.accounts.load_or_new(blog_id, provider.provider())?;
                report.pushed = Some(resync::push(provider, &root, handle, &account.placeholders).await?);
            }
        }

        handle.status("Synced");
        Ok(report)
    }

    async fn rebuild_locked(&self, handle: &FolderHandle) -> Result<SyncReport> {
        let blog_id = handle.blog_id();
        let root = self.blog_root(blog_id).await?;
        let mut report = SyncReport::new(blog_id);
        handle.status("Rebuilding entries");

        let mut paths: Vec<NormalizedPath> = list_recursive(&root, &NormalizedPath::root())
            .await?
            .into_iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.path)
            .collect();

        let present: HashSet<String> = paths.iter().map(NormalizedPath::lookup_key).collect();
        for stored in self.updater.store().list(blog_id).await? {
            if !present.contains(&stored.lookup_key()) {
                paths.push(stored);
            }
        }

        self.update_paths(handle, &paths, &mut report).await?;
        handle.status("Rebuilt");
        Ok(report)
    }

    /// Update entries for changed paths.
    ///
    /// Several changes inside one `+` folder rebuild that folder once.
    async fn update_paths(&self, handle: &FolderHandle, paths: &[NormalizedPath], report: &mut SyncReport) -> Result<()> {
        let blog_id = handle.blog_id();
        let mut aggregates = HashSet::new();

        for path in paths {
            if let BuildTarget::Multi(info) = BuildTarget::for_path(path) {
                if !aggregates.insert(info.folder_path.lookup_key()) {
                    continue;
                }
            }

            handle.ensure_held().await?;
            match handle.update(path, || self.updater.update(blog_id, path)).await {
                Ok(update) => report.updates.push(update),
                Err(e) => {
                    tracing::warn!(blog_id, path = %path, error = %e, "Entry update failed");
                    report.update_failures.push(format!("{path}: {e}"));
                }
            }
        }
        Ok(())
    }

    /// Persist a change feed failure on the account and classify it.
    fn record_failure(&self, account: &mut AccountRecord, error: DeltaError) -> Error {
        let retryable = error.is_retryable();
        let error = match error {
            DeltaError::FolderMissing { path } => Error::FolderMissing {
                blog_id: account.blog_id.clone(),
                path,
            },
            other => Error::Delta(other),
        };

        tracing::warn!(blog_id = %account.blog_id, code = error.code(), error = %error, "Sync failed");
        account.record_error(&error);
        if retryable {
            account.resync_requested = true;
        }
        if let Err(save_error) = self.accounts.save(account) {
            tracing::warn!(blog_id = %account.blog_id, error = %save_error, "Failed to persist account error");
        }
        error
    }

    async fn blog_root(&self, blog_id: &str) -> Result<std::path::PathBuf> {
        let root = self.settings.blog_folder(blog_id);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| blogsync_fs::Error::io(&root, e))?;
        Ok(root)
    }

    /// Release the lock, bumping the cache version after a success.
    async fn finish(&self, handle: FolderHandle, result: Result<SyncReport>) -> Result<SyncReport> {
        match result {
            Ok(mut report) => {
                let registry = Arc::clone(&self.registry);
                let blog_id = handle.blog_id().to_string();
                report.cache_version = handle
                    .release_then(|| async move { registry.bump_cache_version(&blog_id) })
                    .await?;
                Ok(report)
            }
            Err(e) => {
                let blog_id = handle.blog_id().to_string();
                if let Err(release_error) = handle.release().await {
                    tracing::warn!(blog_id, error = %release_error, "Failed to release folder lock");
                }
                Err(e)
            }
        }
    }
}
