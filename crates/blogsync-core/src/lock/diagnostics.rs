//! Evidence gathered when a held lock turns out to be compromised

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::registry::{BlogRegistry, RegistrySnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockFileStat {
    pub path: PathBuf,
    pub exists: bool,
    pub age: Option<Duration>,
    pub size: Option<u64>,
}

/// Snapshot of process and host state at the moment of compromise.
///
/// Every field is best effort. Checks that did not finish within the
/// configured timeout are named in `timed_out` and left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub registry: Vec<RegistrySnapshot>,
    pub available_disk_bytes: Option<u64>,
    pub load_average: Option<String>,
    pub lock_file: Option<LockFileStat>,
    pub timed_out: Vec<&'static str>,
}

impl Diagnostics {
    pub async fn collect(registry: &BlogRegistry, lock_path: Option<&Path>, timeout: Duration) -> Self {
        let mut diagnostics = Diagnostics {
            registry: registry.snapshot_all(),
            ..Default::default()
        };

        if let Some(path) = lock_path {
            let dir = path.parent().unwrap_or(path).to_path_buf();
            diagnostics.available_disk_bytes =
                bounded(&mut diagnostics.timed_out, "disk", timeout, disk_space(dir)).await;
            diagnostics.lock_file =
                bounded(&mut diagnostics.timed_out, "lock_file", timeout, lock_file_stat(path)).await;
        }
        diagnostics.load_average =
            bounded(&mut diagnostics.timed_out, "load", timeout, load_average()).await;

        diagnostics
    }
}

async fn bounded<T>(
    timed_out: &mut Vec<&'static str>,
    name: &'static str,
    timeout: Duration,
    check: impl Future<Output = Option<T>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, check).await {
        Ok(value) => value,
        Err(_) => {
            timed_out.push(name);
            None
        }
    }
}

async fn disk_space(dir: PathBuf) -> Option<u64> {
    tokio::task::spawn_blocking(move || fs2::available_space(&dir).ok())
        .await
        .ok()
        .flatten()
}

async fn load_average() -> Option<String> {
    tokio::fs::read_to_string("/proc/loadavg")
        .await
        .ok()
        .map(|s| s.split_whitespace().take(3).collect::<Vec<_>>().join(" "))
}

async fn lock_file_stat(path: &Path) -> Option<LockFileStat> {
    let stat = match tokio::fs::metadata(path).await {
        Ok(metadata) => LockFileStat {
            path: path.to_path_buf(),
            exists: true,
            age: metadata
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok()),
            size: Some(metadata.len()),
        },
        Err(_) => LockFileStat {
            path: path.to_path_buf(),
            exists: false,
            age: None,
            size: None,
        },
    };
    Some(stat)
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: usize = self.registry.iter().map(|s| s.pending_updates.len()).sum();
        let syncing = self.registry.iter().filter(|s| s.sync_started.is_some()).count();
        write!(f, "syncing={syncing} pending_updates={pending}")?;

        if let Some(bytes) = self.available_disk_bytes {
            write!(f, " disk_free={}MiB", bytes / (1024 * 1024))?;
        }
        if let Some(load) = &self.load_average {
            write!(f, " load=[{load}]")?;
        }
        if let Some(stat) = &self.lock_file {
            match stat.age {
                Some(age) if stat.exists => write!(f, " lock_age={}ms", age.as_millis())?,
                _ => write!(f, " lock_exists={}", stat.exists)?,
            }
        }
        if !self.timed_out.is_empty() {
            write!(f, " timed_out={}", self.timed_out.join(","))?;
        }
        Ok(())
    }
}
