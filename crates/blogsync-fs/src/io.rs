//! Atomic I/O operations with file locking

use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::{Error, Result};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Tuning for [`write_atomic`].
#[derive(Debug, Clone, Copy)]
pub struct RobustnessConfig {
    /// How long to wait for the advisory lock on the temp file
    pub lock_timeout: Duration,
    /// Flush file contents to disk before the rename
    pub enable_fsync: bool,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            enable_fsync: true,
        }
    }
}

/// Write content atomically to a file with locking.
///
/// Uses write-to-temp-then-rename so readers never observe a partial file.
/// The temp file lives in the target directory (same filesystem) and is
/// named so that [`is_temp_name`] recognises it.
pub fn write_atomic(path: &Path, content: &[u8], config: RobustnessConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = temp_path_for(path);

    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    lock_with_timeout(&temp_file, config.lock_timeout).map_err(|_| {
        let _ = fs::remove_file(&temp_path);
        Error::LockFailed {
            path: path.to_path_buf(),
        }
    })?;

    let written = temp_file
        .write_all(content)
        .and_then(|_| {
            if config.enable_fsync {
                temp_file.sync_all()
            } else {
                Ok(())
            }
        })
        .map_err(|e| Error::io(&temp_path, e));

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    // Release lock (implicit on drop, but be explicit)
    let _ = FileExt::unlock(&temp_file);
    drop(temp_file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io(path, e)
    })
}

/// Async wrapper around [`write_atomic`] running on the blocking pool.
pub async fn write_atomic_async(path: &Path, content: Vec<u8>, config: RobustnessConfig) -> Result<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&target, &content, config))
        .await
        .map_err(|e| Error::Task {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
}

/// Set a file's modification time.
pub async fn set_modified(path: &Path, modified: SystemTime) -> Result<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .map_err(|e| Error::io(&target, e))?;
        file.set_modified(modified).map_err(|e| Error::io(&target, e))
    })
    .await
    .map_err(|e| Error::Task {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?
}

/// Create (or truncate to) an empty placeholder file.
pub async fn write_placeholder(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    tokio::fs::write(path, b"").await.map_err(|e| Error::io(path, e))
}

/// Read text content from a file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Write text content to a file atomically.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes(), RobustnessConfig::default())
}

/// Canonical form of a local folder path, without Windows `\\?\` prefixes.
///
/// Falls back to the path as given when it cannot be canonicalized
/// (for instance because it does not exist yet).
pub fn canonical_path(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Whether a file name was produced by [`write_atomic`] as a temp file.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp") && name.matches('.').count() >= 4
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(
        ".{}.{}.{}.tmp",
        name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    path.with_file_name(temp_name)
}

fn lock_with_timeout(file: &fs::File, timeout: Duration) -> std::io::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if Instant::now() >= deadline => return Err(e),
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}
