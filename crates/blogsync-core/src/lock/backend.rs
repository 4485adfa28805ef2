//! Lease storage behind the folder lock
//!
//! [`LeaseBackend`] is the seam between the lock state machine and the
//! medium holding the lease. [`FileLeaseBackend`] keeps one lock file per
//! blog whose mtime is the liveness signal shared between processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blogsync_fs::io::{RobustnessConfig, write_atomic};

use crate::Result;
use crate::config::check_blog_id;

/// A lease we hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub blog_id: String,
    /// Proof of ownership written into the lock
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    Held,
    Lost { reason: String },
}

/// What [`LeaseBackend::inspect`] found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub blog_id: String,
    pub path: Option<PathBuf>,
    pub held: bool,
    /// Time since the lease was last renewed
    pub age: Option<Duration>,
    pub stale: bool,
}

#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Take the lease if it is free or stale. `None` means someone else
    /// holds a live lease.
    async fn try_acquire(&self, blog_id: &str, stale_after: Duration) -> Result<Option<Lease>>;

    /// Prove liveness. Reports [`LeaseStatus::Lost`] if the lease was
    /// stolen or removed.
    async fn renew(&self, lease: &Lease) -> Result<LeaseStatus>;

    /// Give the lease up. Does nothing if it is no longer ours.
    async fn release(&self, lease: &Lease) -> Result<()>;

    async fn inspect(&self, blog_id: &str, stale_after: Duration) -> Result<LockInfo>;

    /// On-disk location of the lease, when there is one.
    fn lock_path(&self, _blog_id: &str) -> Option<PathBuf> {
        None
    }
}

/// Lock files under a shared directory.
///
/// `<lock_dir>/<blog_id>.lock` holds the owner's token. A sibling
/// `.guard` file is locked with `fs2` around every read-check-write so two
/// processes never both decide a stale lock is theirs.
#[derive(Debug, Clone)]
pub struct FileLeaseBackend {
    lock_dir: PathBuf,
}

impl FileLeaseBackend {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    fn path_for(&self, blog_id: &str) -> Result<PathBuf> {
        check_blog_id(blog_id)?;
        Ok(self.lock_dir.join(format!("{blog_id}.lock")))
    }
}

#[async_trait]
impl LeaseBackend for FileLeaseBackend {
    async fn try_acquire(&self, blog_id: &str, stale_after: Duration) -> Result<Option<Lease>> {
        let path = self.path_for(blog_id)?;
        let blog = blog_id.to_string();

        blocking(&path.clone(), move || {
            with_guard(&path, || {
                if let Some(age) = lock_age(&path)? {
                    if age <= stale_after {
                        return Ok(None);
                    }
                    tracing::warn!(
                        blog_id = %blog,
                        age_ms = age.as_millis() as u64,
                        "Stealing stale folder lock"
                    );
                }

                let token = uuid::Uuid::new_v4().to_string();
                write_atomic(&path, token.as_bytes(), RobustnessConfig::default())?;
                Ok(Some(Lease {
                    blog_id: blog,
                    token,
                    acquired_at: Utc::now(),
                }))
            })
        })
        .await
    }

    async fn renew(&self, lease: &Lease) -> Result<LeaseStatus> {
        let path = self.path_for(&lease.blog_id)?;
        let token = lease.token.clone();

        blocking(&path.clone(), move || {
            with_guard(&path, || match read_token(&path)? {
                None => Ok(LeaseStatus::Lost {
                    reason: "lock file was removed".into(),
                }),
                Some(current) if current != token => Ok(LeaseStatus::Lost {
                    reason: "lock was taken over by another holder".into(),
                }),
                Some(_) => {
                    let file = OpenOptions::new()
                        .write(true)
                        .open(&path)
                        .map_err(|e| blogsync_fs::Error::io(&path, e))?;
                    file.set_modified(SystemTime::now())
                        .map_err(|e| blogsync_fs::Error::io(&path, e))?;
                    Ok(LeaseStatus::Held)
                }
            })
        })
        .await
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let path = self.path_for(&lease.blog_id)?;
        let token = lease.token.clone();

        blocking(&path.clone(), move || {
            with_guard(&path, || {
                if read_token(&path)?.as_deref() == Some(token.as_str()) {
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(blogsync_fs::Error::io(&path, e).into()),
                    }
                } else {
                    tracing::debug!(path = %path.display(), "Lock no longer ours; leaving it in place");
                }
                Ok(())
            })
        })
        .await
    }

    async fn inspect(&self, blog_id: &str, stale_after: Duration) -> Result<LockInfo> {
        let path = self.path_for(blog_id)?;
        let blog = blog_id.to_string();

        blocking(&path.clone(), move || {
            let age = lock_age(&path)?;
            Ok(LockInfo {
                blog_id: blog,
                held: age.is_some_and(|a| a <= stale_after),
                stale: age.is_some_and(|a| a > stale_after),
                age,
                path: Some(path),
            })
        })
        .await
    }

    fn lock_path(&self, blog_id: &str) -> Option<PathBuf> {
        self.path_for(blog_id).ok()
    }
}

async fn blocking<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        crate::Error::from(blogsync_fs::Error::Task {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    })?
}

fn with_guard<T>(lock_path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    if let Some(dir) = lock_path.parent() {
        fs::create_dir_all(dir).map_err(|e| blogsync_fs::Error::io(dir, e))?;
    }

    let mut guard_name = lock_path.as_os_str().to_owned();
    guard_name.push(".guard");
    let guard_path = PathBuf::from(guard_name);

    let guard = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&guard_path)
        .map_err(|e| blogsync_fs::Error::io(&guard_path, e))?;
    FileExt::lock_exclusive(&guard).map_err(|e| blogsync_fs::Error::io(&guard_path, e))?;

    let result = f();
    let _ = FileExt::unlock(&guard);
    result
}

/// Time since the lock file was last touched, `None` if there is none.
fn lock_age(path: &Path) -> Result<Option<Duration>> {
    match fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata.modified().map_err(|e| blogsync_fs::Error::io(path, e))?;
            // A clock step backwards makes the lock look brand new
            Ok(Some(SystemTime::now().duration_since(modified).unwrap_or_default()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(blogsync_fs::Error::io(path, e).into()),
    }
}

fn read_token(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(blogsync_fs::Error::io(path, e).into()),
    }
}
