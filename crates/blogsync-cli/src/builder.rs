//! Minimal build collaborator for the command line
//!
//! Converts text, markdown and html sources into entries. Leading
//! `Key: value` lines are metadata; `Draft: yes` marks a draft. Markdown
//! image and link targets inside the blog become dependencies.

use std::path::PathBuf;

use async_trait::async_trait;
use blogsync_core::build::{BuildError, Builder};
use blogsync_core::entry::{Entry, EntryStat};
use blogsync_fs::NormalizedPath;
use blogsync_fs::case::resolve_case_sensitive_path;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

const CONVERTIBLE: &[&str] = &["txt", "md", "markdown", "html", "htm"];

/// Builds entries from files under `<blogs_dir>/<blog_id>`.
#[derive(Debug, Clone)]
pub struct PlainBuilder {
    blogs_dir: PathBuf,
}

impl PlainBuilder {
    pub fn new(blogs_dir: impl Into<PathBuf>) -> Self {
        Self {
            blogs_dir: blogs_dir.into(),
        }
    }
}

#[async_trait]
impl Builder for PlainBuilder {
    async fn build(&self, blog_id: &str, path: &NormalizedPath) -> Result<Entry, BuildError> {
        if !self.is_convertible(path) {
            return Err(BuildError::wrong_type(path));
        }

        let root = self.blogs_dir.join(blog_id);
        let source = resolve_case_sensitive_path(&root, path).await;
        let metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| BuildError::from_io(path, &e))?;
        let content = tokio::fs::read_to_string(&source)
            .await
            .map_err(|e| BuildError::from_io(path, &e))?;

        let (header, body) = split_header(&content);
        let mut entry = Entry::new(path.clone());
        for (key, value) in header {
            match key.as_str() {
                "draft" => entry.draft = matches!(value.to_lowercase().as_str(), "yes" | "true"),
                "date" => entry.date_stamp = parse_date(&value),
                _ => {}
            }
            entry.metadata.insert(key, Value::String(value));
        }

        let is_html = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));
        entry.html = if is_html { body.to_string() } else { render_paragraphs(body) };
        entry.dependencies = local_references(path, body);
        entry.stat = EntryStat {
            size: metadata.len(),
            mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
            ctime: metadata.created().ok().map(DateTime::<Utc>::from),
        };
        Ok(entry)
    }

    fn is_convertible(&self, path: &NormalizedPath) -> bool {
        path.extension()
            .is_some_and(|ext| CONVERTIBLE.contains(&ext.to_lowercase().as_str()))
    }
}

/// Leading `Key: value` lines, lowercased keys, up to the first other line.
fn split_header(content: &str) -> (Vec<(String, String)>, &str) {
    let mut header = Vec::new();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        let Some((key, value)) = trimmed.split_once(':') else {
            break;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) || value.starts_with("//") {
            break;
        }
        header.push((key.to_lowercase(), value.trim().to_string()));
        offset += line.len();
    }

    (header, &content[offset..])
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        })
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn render_paragraphs(body: &str) -> String {
    body.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.strip_prefix("# ") {
            Some(heading) => format!("<h1>{}</h1>", escape(heading)),
            None => format!("<p>{}</p>", escape(p)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Targets of `](...)` references that point inside the blog.
fn local_references(path: &NormalizedPath, body: &str) -> Vec<NormalizedPath> {
    let base = path.parent().unwrap_or_else(NormalizedPath::root);
    let mut found: Vec<NormalizedPath> = Vec::new();

    for chunk in body.split("](").skip(1) {
        let Some(end) = chunk.find(')') else {
            continue;
        };
        let target = chunk[..end].trim();
        if target.is_empty() || target.contains("://") || target.starts_with('#') || target.starts_with("mailto:") {
            continue;
        }
        let resolved = match target.strip_prefix('/') {
            Some(absolute) => NormalizedPath::new(absolute),
            None => NormalizedPath::new(format!("{}/{}", base.as_str(), target)),
        };
        if !found.iter().any(|p| p.eq_ignore_case(&resolved)) {
            found.push(resolved);
        }
    }
    found
}
