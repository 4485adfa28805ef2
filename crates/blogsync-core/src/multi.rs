//! Multi-file (`+` folder) entries
//!
//! A folder whose name ends in `+` is published as a single entry built
//! from every convertible file inside it. Each file is built on its own
//! and the results are merged: HTML concatenated in sections, metadata
//! deep-merged, dependencies unioned and stats combined.

use blogsync_fs::case::resolve_case_sensitive_path;
use blogsync_fs::constants::MULTI_FOLDER_MARKER;
use blogsync_fs::{NormalizedPath, should_ignore};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::Path;

use crate::build::{BuildError, BuildErrorCode, Builder};
use crate::entry::{Entry, EntryStat};
use crate::preview::is_preview_path;

/// Location of the aggregate a path belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiFolderInfo {
    /// The `+` folder being aggregated
    pub folder_path: NormalizedPath,
    /// `folder_path` with the `+` stripped from every segment
    pub entry_path: NormalizedPath,
    /// The path that caused the rebuild
    pub trigger_path: NormalizedPath,
}

impl MultiFolderInfo {
    /// The aggregate containing `path`, if any.
    ///
    /// The nearest `+` segment wins: in `a+/b+/c.md` the aggregate is
    /// `a+/b+`, and `a+` excludes `b+` from its own walk.
    pub fn detect(path: &NormalizedPath) -> Option<Self> {
        let segments: Vec<&str> = path.segments().collect();
        let last = segments
            .iter()
            .rposition(|s| s.len() > 1 && s.ends_with(MULTI_FOLDER_MARKER))?;

        let folder_path = NormalizedPath::new(segments[..=last].join("/"));
        let entry_path = NormalizedPath::new(
            segments[..=last]
                .iter()
                .map(|s| s.trim_end_matches(MULTI_FOLDER_MARKER))
                .collect::<Vec<_>>()
                .join("/"),
        );

        Some(Self {
            folder_path,
            entry_path,
            trigger_path: path.clone(),
        })
    }
}

fn is_multi_folder_name(name: &str) -> bool {
    name.len() > 1 && name.ends_with(MULTI_FOLDER_MARKER)
}

/// Case-insensitive ordering with a byte-wise tiebreak, so `a.md` sorts
/// before `B.md` and the result is total.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

pub struct MultiFileAggregator<'a> {
    builder: &'a dyn Builder,
    blog_root: &'a Path,
}

impl<'a> MultiFileAggregator<'a> {
    pub fn new(builder: &'a dyn Builder, blog_root: &'a Path) -> Self {
        Self { builder, blog_root }
    }

    /// Convertible files of the folder in section order.
    pub async fn collect(&self, folder: &NormalizedPath) -> Result<Vec<NormalizedPath>, BuildError> {
        let native = resolve_case_sensitive_path(self.blog_root, folder).await;
        let metadata = tokio::fs::metadata(&native)
            .await
            .map_err(|e| BuildError::from_io(folder, &e))?;
        if !metadata.is_dir() {
            return Err(BuildError::new(
                BuildErrorCode::NotADirectory,
                format!("{folder} is not a folder"),
            ));
        }

        // Walk with the on-disk casing of the folder
        let on_disk = native
            .strip_prefix(self.blog_root)
            .map(NormalizedPath::from)
            .unwrap_or_else(|_| folder.clone());

        let mut pending = vec![on_disk];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            let listing = blogsync_fs::tree::read_dir(self.blog_root, &dir)
                .await
                .map_err(|e| match e.io_kind() {
                    Some(kind) => BuildError::from_io(&dir, &std::io::Error::from(kind)),
                    None => BuildError::other(e.to_string()),
                })?;

            for child in listing {
                let path = dir.join(&child.name);
                if should_ignore(path.as_str()) {
                    continue;
                }
                if child.is_directory {
                    if !is_multi_folder_name(&child.name) {
                        pending.push(path);
                    }
                } else if !is_preview_path(&path) && self.builder.is_convertible(&path) {
                    files.push(path);
                }
            }
        }

        files.sort_by(|a, b| locale_compare(a.as_str(), b.as_str()));
        Ok(files)
    }

    /// Build the composite entry for `info`.
    ///
    /// Files are built one at a time in section order. A file the builder
    /// rejects as the wrong type is left out; any other build failure fails
    /// the aggregate. Zero buildable files is [`BuildErrorCode::Empty`].
    pub async fn build(&self, blog_id: &str, info: &MultiFolderInfo) -> Result<Entry, BuildError> {
        let files = self.collect(&info.folder_path).await?;
        let mut parts = Vec::with_capacity(files.len());

        for path in files {
            match self.builder.build(blog_id, &path).await {
                Ok(entry) => parts.push((path, entry)),
                Err(e) if e.code == BuildErrorCode::WrongType => {
                    tracing::debug!(blog_id, path = %path, "Skipping unconvertible file in multi-file entry");
                }
                Err(e) => return Err(e),
            }
        }

        if parts.is_empty() {
            return Err(BuildError::empty(&info.folder_path));
        }

        Ok(merge(info, parts))
    }
}

fn merge(info: &MultiFolderInfo, parts: Vec<(NormalizedPath, Entry)>) -> Entry {
    let mut entry = Entry::new(info.folder_path.clone());
    entry.public_path = info.entry_path.clone();

    let mut html = format!("<section class=\"multi-file\" data-path=\"{}\">\n", escape_attr(&info.folder_path.to_string()));
    let mut source_paths = Vec::with_capacity(parts.len());
    let mut stat = EntryStat::default();

    for (index, (path, part)) in parts.into_iter().enumerate() {
        html.push_str(&format!(
            "<section class=\"file\" data-path=\"{}\" data-extension=\"{}\" data-index=\"{}\">\n{}\n</section>\n",
            escape_attr(&path.to_string()),
            escape_attr(path.extension().unwrap_or_default()),
            index,
            part.html.trim_end()
        ));

        merge_metadata(&mut entry.metadata, &part.metadata);

        for dependency in part.dependencies {
            if !entry.dependencies.iter().any(|d| d.eq_ignore_case(&dependency)) {
                entry.dependencies.push(dependency);
            }
        }

        stat.size += part.stat.size;
        stat.mtime = stat.mtime.max(part.stat.mtime);
        stat.ctime = stat.ctime.max(part.stat.ctime);
        entry.draft |= part.draft;
        if entry.date_stamp.is_none() {
            entry.date_stamp = part.date_stamp;
        }

        source_paths.push(Value::String(path.to_string()));
    }

    html.push_str("</section>");
    entry.html = html;
    entry.stat = stat;
    entry
        .metadata
        .insert("_sourcePaths".to_string(), Value::Array(source_paths));
    entry
}

/// Deep-merge `source` into `target`.
///
/// Arrays are unioned without duplicates, objects merge recursively and
/// for everything else the first non-empty value wins.
pub fn merge_metadata(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), incoming.clone());
            }
            Some(Value::Array(existing)) if incoming.is_array() => {
                if let Value::Array(items) = incoming {
                    for item in items {
                        if !existing.contains(item) {
                            existing.push(item.clone());
                        }
                    }
                }
            }
            Some(Value::Object(existing)) if incoming.is_object() => {
                if let Value::Object(fields) = incoming {
                    merge_metadata(existing, fields);
                }
            }
            Some(existing) => {
                if is_empty(existing) && !is_empty(incoming) {
                    *existing = incoming.clone();
                }
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
