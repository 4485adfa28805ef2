//! Blog-relative path normalization

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A path relative to the blog folder root.
///
/// Stored canonically with forward slashes, no leading or trailing slash,
/// no empty or `.` segments and `..` resolved (never escaping the root).
/// Rendered with a leading slash at API boundaries via [`Display`].
///
/// Casing is preserved exactly as given. Use [`NormalizedPath::lookup_key`]
/// for case-insensitive comparisons.
///
/// [`Display`]: std::fmt::Display
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NormalizedPath {
    inner: String,
}

impl NormalizedPath {
    /// Normalize any slash-separated path.
    pub fn new(path: impl AsRef<str>) -> Self {
        let unified = path.as_ref().replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Self {
            inner: segments.join("/"),
        }
    }

    /// The blog folder root itself.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    /// Internal form, without a leading slash. Empty for the root.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// External form, always `/`-rooted.
    pub fn to_slash_string(&self) -> String {
        format!("/{}", self.inner)
    }

    /// Lowercased form used as a case-insensitive lookup key.
    pub fn lookup_key(&self) -> String {
        self.inner.to_lowercase()
    }

    /// Resolve against a local folder root, segment by segment.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut native = root.to_path_buf();
        for segment in self.segments() {
            native.push(segment);
        }
        native
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Join this path with a (possibly multi-segment) relative path.
    pub fn join(&self, segment: &str) -> Self {
        if self.inner.is_empty() {
            Self::new(segment)
        } else {
            Self::new(format!("{}/{}", self.inner, segment))
        }
    }

    /// Parent directory. The root has no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.inner.is_empty() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Final segment. `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.inner.is_empty() {
            None
        } else {
            self.inner.rsplit('/').next()
        }
    }

    /// Extension of the final segment, without the dot.
    ///
    /// Dotfiles such as `.gitignore` have no extension.
    pub fn extension(&self) -> Option<&str> {
        self.file_name().and_then(|name| {
            let idx = name.rfind('.')?;
            if idx == 0 || idx + 1 == name.len() {
                None
            } else {
                Some(&name[idx + 1..])
            }
        })
    }

    /// File name without its extension.
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.file_name()?;
        match self.extension() {
            Some(ext) => Some(&name[..name.len() - ext.len() - 1]),
            None => Some(name),
        }
    }

    /// Segment-wise prefix test. Every path starts with the root.
    pub fn starts_with(&self, prefix: &NormalizedPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.inner == prefix.inner
            || (self.inner.starts_with(&prefix.inner)
                && self.inner.as_bytes().get(prefix.inner.len()) == Some(&b'/'))
    }

    /// Like [`NormalizedPath::starts_with`] but ignoring case.
    pub fn starts_with_ignore_case(&self, prefix: &NormalizedPath) -> bool {
        NormalizedPath::new(self.lookup_key()).starts_with(&NormalizedPath::new(prefix.lookup_key()))
    }

    /// Remove a leading prefix, returning the remainder relative to it.
    pub fn strip_prefix(&self, prefix: &NormalizedPath) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        Some(Self::new(&self.inner[prefix.inner.len()..]))
    }

    /// Case-insensitive equality.
    pub fn eq_ignore_case(&self, other: &NormalizedPath) -> bool {
        self.lookup_key() == other.lookup_key()
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.inner)
    }
}

impl From<&str> for NormalizedPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NormalizedPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&Path> for NormalizedPath {
    fn from(p: &Path) -> Self {
        Self::new(p.to_string_lossy())
    }
}

impl From<NormalizedPath> for String {
    fn from(p: NormalizedPath) -> Self {
        p.to_slash_string()
    }
}
