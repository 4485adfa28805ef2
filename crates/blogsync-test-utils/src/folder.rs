//! [`TestFolder`] sandbox for blogsync test scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blogsync_core::config::{BlogConfig, Settings};
use tempfile::TempDir;

/// A temporary sandbox laid out like a blogsync installation:
///
/// ```text
/// <root>/data           accounts, entries
/// <root>/blogs/<id>     local blog folders
/// <root>/remote/<id>    folders acting as local-provider remotes
/// ```
///
/// # Example
///
/// ```rust,no_run
/// use blogsync_test_utils::TestFolder;
///
/// let folder = TestFolder::new();
/// folder.write_blog("blog", "posts/hello.txt", "Hello");
/// folder.assert_blog_file_contains("blog", "posts/hello.txt", "Hello");
/// ```
pub struct TestFolder {
    temp_dir: TempDir,
}

impl Default for TestFolder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFolder {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn blogs_dir(&self) -> PathBuf {
        self.root().join("blogs")
    }

    pub fn blog_dir(&self, blog_id: &str) -> PathBuf {
        self.blogs_dir().join(blog_id)
    }

    pub fn remote_dir(&self, blog_id: &str) -> PathBuf {
        self.root().join("remote").join(blog_id)
    }

    /// Settings rooted in the sandbox, with a fast-renewing lock and no
    /// acquisition retries worth waiting for.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings {
            data_dir: self.data_dir(),
            blogs_dir: Some(self.blogs_dir()),
            ..Settings::default()
        };
        settings.lock.stale_ms = 2_000;
        settings.lock.update_ms = 200;
        settings.lock.fresh_process_window_secs = 0;
        settings.lock.established_retries = 1;
        settings.lock.established_min_wait_ms = 10;
        settings.lock.established_max_wait_ms = 20;
        settings.retry.initial_interval_ms = 1;
        settings.retry.max_interval_ms = 5;
        settings
    }

    /// [`settings`](Self::settings) with a local-provider blog whose remote
    /// is [`remote_dir`](Self::remote_dir).
    pub fn settings_with_local_blog(&self, blog_id: &str) -> Settings {
        let mut settings = self.settings();
        fs::create_dir_all(self.remote_dir(blog_id)).unwrap();
        settings
            .blogs
            .push(BlogConfig::local(blog_id, self.remote_dir(blog_id)));
        settings
    }

    /// Write `content` to `relative` (creating parents) under `base`.
    pub fn write(&self, base: &Path, relative: &str, content: &str) -> PathBuf {
        let path = base.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn write_blog(&self, blog_id: &str, relative: &str, content: &str) -> PathBuf {
        self.write(&self.blog_dir(blog_id), relative, content)
    }

    pub fn write_remote(&self, blog_id: &str, relative: &str, content: &str) -> PathBuf {
        self.write(&self.remote_dir(blog_id), relative, content)
    }

    /// Push a file's mtime into the past so size/mtime comparisons see a change.
    pub fn age(&self, path: &Path, by: Duration) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    pub fn read_blog(&self, blog_id: &str, relative: &str) -> String {
        let path = self.blog_dir(blog_id).join(relative);
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("Could not read file: {}", path.display()))
    }

    /// Relative paths of every file and folder in a blog folder, sorted.
    pub fn blog_tree(&self, blog_id: &str) -> Vec<String> {
        let root = self.blog_dir(blog_id);
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(reader) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in reader {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path.clone());
                }
                let relative = path.strip_prefix(&root).unwrap();
                found.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        found.sort();
        found
    }

    /// # Panics
    /// Panics with a descriptive message if the path does not exist.
    pub fn assert_blog_file_exists(&self, blog_id: &str, relative: &str) {
        let full_path = self.blog_dir(blog_id).join(relative);
        assert!(full_path.exists(), "Expected file to exist: {}", full_path.display());
    }

    /// # Panics
    /// Panics with a descriptive message if the path exists.
    pub fn assert_blog_file_not_exists(&self, blog_id: &str, relative: &str) {
        let full_path = self.blog_dir(blog_id).join(relative);
        assert!(!full_path.exists(), "Expected file NOT to exist: {}", full_path.display());
    }

    /// # Panics
    /// Panics if the file cannot be read or does not contain `content`.
    pub fn assert_blog_file_contains(&self, blog_id: &str, relative: &str, content: &str) {
        let file_content = self.read_blog(blog_id, relative);
        assert!(
            file_content.contains(content),
            "Expected {relative} to contain {content:?}, got: {file_content:?}"
        );
    }
}
