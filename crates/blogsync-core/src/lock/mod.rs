//! Per-blog folder lock
//!
//! Every mutation of a blog's local folder happens while holding its
//! lock. The lock is a lease: a lock file renewed on an interval by a
//! background task and stealable once it goes stale. The holder checks
//! [`FolderHandle::ensure_held`] before each write so a lost lease stops
//! the work instead of racing the new owner.
//!
//! ```text
//! Unlocked -> Acquiring -> Held -> Released
//!                            \-> Compromised
//! ```

mod backend;
mod diagnostics;

pub use backend::{FileLeaseBackend, Lease, LeaseBackend, LeaseStatus, LockInfo};
pub use diagnostics::{Diagnostics, LockFileStat};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use blogsync_fs::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::registry::BlogRegistry;
use crate::{Error, Result};

/// First use of the lock subsystem in this process.
static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Released,
    Compromised,
}

/// Lease timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// A lock not renewed for this long may be stolen
    pub stale_after: Duration,
    /// Renewal interval, shorter than `stale_after`
    pub update_interval: Duration,
    /// Processes younger than this wait out a predecessor's stale lock
    pub fresh_process_window: Duration,
    pub established_retries: u32,
    pub established_min_wait: Duration,
    pub established_max_wait: Duration,
    /// Bound on each diagnostic check after a compromise
    pub diagnostics_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10),
            update_interval: Duration::from_secs(3),
            fresh_process_window: Duration::from_secs(60),
            established_retries: 3,
            established_min_wait: Duration::from_millis(100),
            established_max_wait: Duration::from_secs(1),
            diagnostics_timeout: Duration::from_secs(1),
        }
    }
}

/// How long to wait between acquisition attempts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AcquirePolicy {
    /// Depends on process age: a freshly started process waits once for a
    /// full staleness window, an established one retries briefly
    #[default]
    Auto,
    Fixed {
        retries: u32,
        min_wait: Duration,
        max_wait: Duration,
    },
    /// Fail on first contention
    NoRetry,
}

impl AcquirePolicy {
    fn waits(&self, config: &LockConfig) -> Vec<Duration> {
        match self {
            AcquirePolicy::NoRetry => Vec::new(),
            AcquirePolicy::Fixed {
                retries,
                min_wait,
                max_wait,
            } => backoff_waits(*retries, *min_wait, *max_wait),
            AcquirePolicy::Auto => {
                if PROCESS_START.elapsed() < config.fresh_process_window {
                    vec![config.stale_after + config.update_interval]
                } else {
                    backoff_waits(
                        config.established_retries,
                        config.established_min_wait,
                        config.established_max_wait,
                    )
                }
            }
        }
    }
}

fn backoff_waits(retries: u32, min_wait: Duration, max_wait: Duration) -> Vec<Duration> {
    let mut backoff = ExponentialBackoff {
        initial_interval: min_wait,
        current_interval: min_wait,
        max_interval: max_wait,
        max_elapsed_time: None,
        ..Default::default()
    };
    (0..retries)
        .map(|_| backoff.next_backoff().unwrap_or(max_wait).min(max_wait))
        .collect()
}

/// Entry point for taking blog folder locks.
#[derive(Clone)]
pub struct SyncLock {
    backend: Arc<dyn LeaseBackend>,
    config: LockConfig,
    registry: Arc<BlogRegistry>,
    policy: AcquirePolicy,
}

impl SyncLock {
    pub fn new(backend: Arc<dyn LeaseBackend>, config: LockConfig, registry: Arc<BlogRegistry>) -> Self {
        LazyLock::force(&PROCESS_START);
        Self {
            backend,
            config,
            registry,
            policy: AcquirePolicy::Auto,
        }
    }

    /// Lock files under `lock_dir`.
    pub fn file_backed(lock_dir: impl Into<PathBuf>, config: LockConfig, registry: Arc<BlogRegistry>) -> Self {
        Self::new(Arc::new(FileLeaseBackend::new(lock_dir)), config, registry)
    }

    pub fn with_policy(mut self, policy: AcquirePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BlogRegistry> {
        &self.registry
    }

    /// Acquire the lock for `blog_id`.
    ///
    /// # Errors
    ///
    /// [`Error::LockUnavailable`] once the acquisition policy is exhausted
    /// while another holder keeps the lease alive.
    pub async fn acquire(&self, blog_id: &str) -> Result<FolderHandle> {
        // A holder elsewhere in this process keeps its state if we fail
        let previous = self.registry.lock_state(blog_id);
        self.registry.set_lock_state(blog_id, LockState::Acquiring);
        let waits = self.policy.waits(&self.config);
        let mut attempt = 0;

        loop {
            let acquired = match self.backend.try_acquire(blog_id, self.config.stale_after).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    self.registry.set_lock_state(blog_id, previous);
                    return Err(e);
                }
            };

            if let Some(lease) = acquired {
                tracing::debug!(blog_id, attempt, "Acquired folder lock");
                return Ok(FolderHandle::start(
                    lease,
                    Arc::clone(&self.backend),
                    Arc::clone(&self.registry),
                    self.config.clone(),
                ));
            }

            let Some(wait) = waits.get(attempt) else {
                self.registry.set_lock_state(blog_id, previous);
                tracing::info!(blog_id, attempts = attempt + 1, "Folder lock unavailable");
                return Err(Error::LockUnavailable {
                    blog_id: blog_id.to_string(),
                    retry_after: self.config.stale_after,
                });
            };

            tracing::debug!(blog_id, attempt, wait_ms = wait.as_millis() as u64, "Folder lock busy; waiting");
            tokio::time::sleep(*wait).await;
            attempt += 1;
        }
    }

    pub async fn inspect(&self, blog_id: &str) -> Result<LockInfo> {
        self.backend.inspect(blog_id, self.config.stale_after).await
    }
}

struct Shared {
    state: Mutex<LockState>,
    last_renewed: Mutex<Instant>,
    lost: Mutex<Option<String>>,
}

impl Shared {
    fn state(&self) -> LockState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: LockState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn renewed(&self) {
        *self.last_renewed.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn since_renewal(&self) -> Duration {
        self.last_renewed.lock().unwrap_or_else(|p| p.into_inner()).elapsed()
    }

    fn lose(&self, reason: String) {
        *self.lost.lock().unwrap_or_else(|p| p.into_inner()) = Some(reason);
        self.set_state(LockState::Compromised);
    }

    fn lost(&self) -> Option<String> {
        self.lost.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// A held blog folder lock.
///
/// Dropping the handle without calling [`release`](Self::release) stops
/// renewal and releases the lease in the background.
pub struct FolderHandle {
    lease: Lease,
    backend: Arc<dyn LeaseBackend>,
    registry: Arc<BlogRegistry>,
    config: LockConfig,
    shared: Arc<Shared>,
    renewer: Option<JoinHandle<()>>,
    released: bool,
}

impl FolderHandle {
    fn start(lease: Lease, backend: Arc<dyn LeaseBackend>, registry: Arc<BlogRegistry>, config: LockConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(LockState::Held),
            last_renewed: Mutex::new(Instant::now()),
            lost: Mutex::new(None),
        });
        registry.set_lock_state(&lease.blog_id, LockState::Held);
        registry.begin_sync(&lease.blog_id);

        let renewer = tokio::spawn(renew_loop(
            lease.clone(),
            Arc::clone(&backend),
            Arc::clone(&shared),
            config.update_interval,
        ));

        Self {
            lease,
            backend,
            registry,
            config,
            shared,
            renewer: Some(renewer),
            released: false,
        }
    }

    pub fn blog_id(&self) -> &str {
        &self.lease.blog_id
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn state(&self) -> LockState {
        self.shared.state()
    }

    /// Fail if the lease can no longer be trusted.
    ///
    /// The lease is compromised when renewal found it stolen or removed,
    /// or when renewal has been overdue long enough that another process
    /// may already consider it stale. Diagnostics are collected and logged
    /// before the error is returned.
    pub async fn ensure_held(&self) -> Result<()> {
        let reason = match self.shared.state() {
            LockState::Held => match self.shared.lost() {
                Some(reason) => Some(reason),
                None => {
                    let since = self.shared.since_renewal();
                    (since > self.config.stale_after)
                        .then(|| format!("renewal overdue by {}ms", since.as_millis()))
                }
            },
            LockState::Compromised => Some(self.shared.lost().unwrap_or_else(|| "lease lost".into())),
            state => Some(format!("lock is {state:?}")),
        };

        match reason {
            None => Ok(()),
            Some(reason) => Err(self.compromised(reason).await),
        }
    }

    async fn compromised(&self, reason: String) -> Error {
        self.shared.set_state(LockState::Compromised);
        self.registry.set_lock_state(self.blog_id(), LockState::Compromised);

        let lock_path = self.backend.lock_path(self.blog_id());
        let diagnostics =
            Diagnostics::collect(&self.registry, lock_path.as_deref(), self.config.diagnostics_timeout).await;

        tracing::error!(
            blog_id = %self.blog_id(),
            reason = %reason,
            diagnostics = %diagnostics,
            "Folder lock compromised"
        );

        Error::LockCompromised {
            blog_id: self.blog_id().to_string(),
            reason,
            diagnostics: Box::new(diagnostics),
        }
    }

    /// Run `f` as a tracked update of `path`.
    pub async fn update<F, Fut, T>(&self, path: &NormalizedPath, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = path.to_string();
        self.registry.begin_update(self.blog_id(), &key);
        let result = f().await;
        self.registry.end_update(self.blog_id(), &key);
        result
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(blog_id = %self.blog_id(), status = %message, "Sync status");
        self.registry.set_status(self.blog_id(), message);
    }

    pub fn log(&self, message: &str) {
        tracing::info!(blog_id = %self.blog_id(), "{message}");
    }

    /// Stop renewing and give the lease up.
    pub async fn release(mut self) -> Result<()> {
        self.stop();
        let result = self.backend.release(&self.lease).await;
        tracing::debug!(blog_id = %self.blog_id(), "Released folder lock");
        result
    }

    /// Release, then run `after` without the lock held.
    pub async fn release_then<F, Fut, T>(self, after: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.release().await?;
        Ok(after().await)
    }

    fn stop(&mut self) {
        if let Some(renewer) = self.renewer.take() {
            renewer.abort();
        }
        if self.shared.state() == LockState::Held {
            self.shared.set_state(LockState::Released);
        }
        self.registry.set_lock_state(&self.lease.blog_id, LockState::Released);
        self.registry.end_sync(&self.lease.blog_id);
        self.released = true;
    }
}

impl Drop for FolderHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.stop();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let backend = Arc::clone(&self.backend);
            let lease = self.lease.clone();
            runtime.spawn(async move {
                if let Err(e) = backend.release(&lease).await {
                    tracing::warn!(blog_id = %lease.blog_id, error = %e, "Failed to release dropped folder lock");
                }
            });
        }
    }
}

async fn renew_loop(lease: Lease, backend: Arc<dyn LeaseBackend>, shared: Arc<Shared>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        match backend.renew(&lease).await {
            Ok(LeaseStatus::Held) => shared.renewed(),
            Ok(LeaseStatus::Lost { reason }) => {
                tracing::warn!(blog_id = %lease.blog_id, reason = %reason, "Folder lock lost");
                shared.lose(reason);
                return;
            }
            Err(e) => {
                // Keep trying; ensure_held notices if renewals stay overdue
                tracing::warn!(blog_id = %lease.blog_id, error = %e, "Failed to renew folder lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quick_config() -> LockConfig {
        LockConfig {
            stale_after: Duration::from_millis(400),
            update_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn lock_in(dir: &std::path::Path) -> SyncLock {
        SyncLock::file_backed(dir, quick_config(), Arc::new(BlogRegistry::new())).with_policy(AcquirePolicy::NoRetry)
    }

    #[tokio::test]
    async fn contention_is_lock_unavailable() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path());

        let handle = lock.acquire("blog").await.unwrap();
        assert_eq!(handle.state(), LockState::Held);

        let err = lock.acquire("blog").await.err().unwrap();
        assert!(err.is_lock_unavailable());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(400)));

        handle.release().await.unwrap();
        lock.acquire("blog").await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn renewal_keeps_the_lock_alive_past_the_staleness_window() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path());

        let handle = lock.acquire("blog").await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        handle.ensure_held().await.unwrap();
        assert!(lock.acquire("blog").await.is_err());
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn stolen_lock_is_compromised() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path());
        let handle = lock.acquire("blog").await.unwrap();

        // Another process takes over the lock file
        std::fs::write(dir.path().join("blog.lock"), "someone-else").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = handle.ensure_held().await.err().unwrap();
        match err {
            Error::LockCompromised { reason, diagnostics, .. } => {
                assert!(reason.contains("another holder"), "{reason}");
                assert!(diagnostics.lock_file.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handle.state(), LockState::Compromised);
        assert_eq!(lock.registry().lock_state("blog"), LockState::Compromised);
    }

    #[tokio::test]
    async fn release_then_runs_after_the_lock_is_gone() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path());
        let handle = lock.acquire("blog").await.unwrap();

        let lock_file = dir.path().join("blog.lock");
        let existed_during_callback = handle
            .release_then(|| async { lock_file.exists() })
            .await
            .unwrap();
        assert!(!existed_during_callback);
        assert_eq!(lock.registry().lock_state("blog"), LockState::Released);
    }

    #[tokio::test]
    async fn updates_are_tracked_in_the_registry() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path());
        let handle = lock.acquire("blog").await.unwrap();
        let registry = Arc::clone(lock.registry());

        let pending = handle
            .update(&NormalizedPath::new("post.txt"), || async {
                registry.snapshot("blog").unwrap().pending_updates
            })
            .await;
        assert_eq!(pending, vec!["/post.txt".to_string()]);
        assert!(registry.snapshot("blog").unwrap().pending_updates.is_empty());

        handle.status("Applied 3 changes");
        assert_eq!(registry.last_status("blog").as_deref(), Some("Applied 3 changes"));
        handle.release().await.unwrap();
    }

    #[test]
    fn fixed_policy_waits_grow_and_are_capped() {
        let policy = AcquirePolicy::Fixed {
            retries: 4,
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_millis(300),
        };
        let waits = policy.waits(&LockConfig::default());
        assert_eq!(waits.len(), 4);
        assert!(waits.iter().all(|w| *w <= Duration::from_millis(300)));
        assert!(AcquirePolicy::NoRetry.waits(&LockConfig::default()).is_empty());
    }

    #[tokio::test]
    async fn dropped_handle_releases_in_background() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path());
        drop(lock.acquire("blog").await.unwrap());

        let mut reacquired = None;
        for _ in 0..20 {
            if let Ok(handle) = lock.acquire("blog").await {
                reacquired = Some(handle);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reacquired.is_some());
    }
}
