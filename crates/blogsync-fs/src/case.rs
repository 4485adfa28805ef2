//! Case-insensitive path resolution
//!
//! Remote providers are case-insensitive while the local filesystem may not
//! be. These helpers find the on-disk casing of a blog-relative path so that
//! `Foo/bar.txt` and `foo/Bar.txt` address the same local file.

use std::path::{Path, PathBuf};

use crate::NormalizedPath;

/// Resolve every segment of `relative` to its actual on-disk casing.
///
/// Each segment is matched exactly first, then case-insensitively against a
/// listing of its parent. When a segment cannot be resolved (it does not
/// exist yet, or the parent cannot be listed) the remaining segments are
/// appended with their requested casing. Never fails: callers treat the
/// result as a best-effort path.
pub async fn resolve_case_sensitive_path(root: &Path, relative: &NormalizedPath) -> PathBuf {
    let segments: Vec<&str> = relative.segments().collect();
    let mut resolved = root.to_path_buf();

    for (idx, segment) in segments.iter().enumerate() {
        let exact = resolved.join(segment);
        if tokio::fs::symlink_metadata(&exact).await.is_ok() {
            resolved = exact;
            continue;
        }

        match find_case_insensitive(&resolved, segment).await {
            Ok(Some(actual)) => resolved.push(actual),
            Ok(None) => {
                append_verbatim(&mut resolved, &segments[idx..]);
                return resolved;
            }
            Err(e) => {
                tracing::debug!(
                    dir = %resolved.display(),
                    error = %e,
                    "Could not list directory while resolving case; using requested casing"
                );
                append_verbatim(&mut resolved, &segments[idx..]);
                return resolved;
            }
        }
    }

    resolved
}

/// Resolve only the parent directory and append the leaf name verbatim.
///
/// Used for write targets: the containing directory is matched to its
/// on-disk casing while the file name keeps the casing the remote reported.
pub async fn resolve_target_path(root: &Path, relative: &NormalizedPath) -> PathBuf {
    match (relative.parent(), relative.file_name()) {
        (Some(parent), Some(name)) => resolve_case_sensitive_path(root, &parent).await.join(name),
        _ => root.to_path_buf(),
    }
}

/// Find a directory entry whose name matches `name` ignoring case.
///
/// When several entries match (possible on case-sensitive filesystems), the
/// lexicographically smallest is returned so resolution is deterministic.
pub async fn find_case_insensitive(dir: &Path, name: &str) -> std::io::Result<Option<String>> {
    let wanted = name.to_lowercase();
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut best: Option<String> = None;

    while let Some(entry) = reader.next_entry().await? {
        let candidate = entry.file_name().to_string_lossy().into_owned();
        if candidate.to_lowercase() == wanted {
            best = match best {
                Some(current) if current <= candidate => Some(current),
                _ => Some(candidate),
            };
        }
    }

    Ok(best)
}

fn append_verbatim(base: &mut PathBuf, segments: &[&str]) {
    for segment in segments {
        base.push(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn resolves_differently_cased_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Posts/Travel")).unwrap();
        fs::write(dir.path().join("Posts/Travel/Day One.txt"), "x").unwrap();

        let resolved =
            resolve_case_sensitive_path(dir.path(), &NormalizedPath::new("posts/travel/day one.txt"))
                .await;
        assert_eq!(resolved, dir.path().join("Posts/Travel/Day One.txt"));
    }

    #[tokio::test]
    async fn missing_segments_keep_requested_casing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Posts")).unwrap();

        let resolved =
            resolve_case_sensitive_path(dir.path(), &NormalizedPath::new("posts/New/File.txt")).await;
        assert_eq!(resolved, dir.path().join("Posts/New/File.txt"));
    }

    #[tokio::test]
    async fn target_path_keeps_leaf_casing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Posts")).unwrap();
        fs::write(dir.path().join("Posts/foo.txt"), "x").unwrap();

        let target = resolve_target_path(dir.path(), &NormalizedPath::new("posts/Foo.txt")).await;
        assert_eq!(target, dir.path().join("Posts/Foo.txt"));
    }

    #[tokio::test]
    async fn unreadable_root_falls_back_to_requested_path() {
        let dir = tempdir().unwrap();
        let missing_root = dir.path().join("does-not-exist");

        let resolved = resolve_case_sensitive_path(&missing_root, &NormalizedPath::new("a/b")).await;
        assert_eq!(resolved, missing_root.join("a/b"));
    }
}
