//! [`MemoryRemote`], an in-memory provider for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use blogsync_delta::{
    ChangeRecord, ContentHash, DeltaError, DeltaPage, DeltaResult, DeltaSource, Provider, RemoteEntry,
    RemoteProvider, RemoteReader, RemoteTree, RemoteWriter, SyncCursor,
};
use blogsync_fs::NormalizedPath;
use blogsync_fs::checksum::compute_bytes_checksum;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
struct RemoteFile {
    path: NormalizedPath,
    content: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, RemoteFile>,
    dirs: BTreeMap<String, NormalizedPath>,
    /// Changes recorded by mutations since the last page
    pending: Vec<ChangeRecord>,
    /// Scripted responses served before anything else
    scripted: VecDeque<DeltaResult<DeltaPage>>,
    generation: u64,
    downloads: Vec<NormalizedPath>,
    uploads: Vec<NormalizedPath>,
}

/// A remote folder held in memory.
///
/// Mutations made through [`put_file`](Self::put_file),
/// [`put_dir`](Self::put_dir) and [`remove`](Self::remove) are recorded
/// and served as the next delta page. A `None` cursor yields the full
/// listing. Scripted pages and errors queued with
/// [`push_page`](Self::push_page) and [`fail_next`](Self::fail_next) take
/// precedence over recorded changes.
pub struct MemoryRemote {
    provider: Provider,
    with_tree: bool,
    state: Mutex<State>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            provider: Provider::Dropbox,
            with_tree: true,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Hide the full-listing capability, as a feed-only provider would.
    pub fn without_tree(mut self) -> Self {
        self.with_tree = false;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create or replace a file, creating missing parent folders.
    pub fn put_file(&self, path: &str, content: &str) {
        let path = NormalizedPath::new(path);
        let mut state = self.state();
        ensure_parents(&mut state, &path);
        let file = RemoteFile {
            path: path.clone(),
            content: content.as_bytes().to_vec(),
            modified: Utc::now(),
        };
        state.pending.push(change_for(&file));
        state.files.insert(path.lookup_key(), file);
    }

    pub fn put_dir(&self, path: &str) {
        let path = NormalizedPath::new(path);
        let mut state = self.state();
        ensure_parents(&mut state, &path);
        state.dirs.insert(path.lookup_key(), path.clone());
        state.pending.push(ChangeRecord::folder(path));
    }

    /// Remove a file or folder and everything below it.
    pub fn remove(&self, path: &str) {
        let path = NormalizedPath::new(path);
        let mut state = self.state();
        remove_under(&mut state, &path);
        state.pending.push(ChangeRecord::deleted(path));
    }

    /// Queue a page to be returned verbatim by the next `changes` call.
    pub fn push_page(&self, entries: Vec<ChangeRecord>, has_more: bool) {
        let mut state = self.state();
        state.generation += 1;
        let cursor = SyncCursor::new(format!("scripted-{}", state.generation));
        state.scripted.push_back(Ok(DeltaPage {
            entries,
            cursor,
            has_more,
            reset: false,
        }));
    }

    /// Make the next `changes` call answer the way a provider does after
    /// invalidating the cursor: the full current listing, flagged as a reset,
    /// with pending deletions forgotten.
    pub fn push_reset_listing(&self) {
        let mut state = self.state();
        state.pending.clear();
        state.generation += 1;
        let entries = Self::listing(&state).iter().map(RemoteEntry::to_change).collect();
        let cursor = SyncCursor::new(format!("reset-{}", state.generation));
        state.scripted.push_back(Ok(DeltaPage {
            entries,
            cursor,
            has_more: false,
            reset: true,
        }));
    }

    /// Make the next `changes` call fail with `error`.
    pub fn fail_next(&self, error: DeltaError) {
        self.state().scripted.push_back(Err(error));
    }

    /// Paths downloaded so far, in order.
    pub fn downloads(&self) -> Vec<NormalizedPath> {
        self.state().downloads.clone()
    }

    /// Paths uploaded so far, in order.
    pub fn uploads(&self) -> Vec<NormalizedPath> {
        self.state().uploads.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state()
            .files
            .get(&NormalizedPath::new(path).lookup_key())
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state().dirs.contains_key(&NormalizedPath::new(path).lookup_key())
    }

    fn listing(state: &State) -> Vec<RemoteEntry> {
        let dirs = state.dirs.values().map(|path| RemoteEntry {
            path: path.clone(),
            is_directory: true,
            size: None,
            content_hash: None,
            modified: None,
        });
        let files = state.files.values().map(|file| RemoteEntry {
            path: file.path.clone(),
            is_directory: false,
            size: Some(file.content.len() as u64),
            content_hash: Some(ContentHash::Sha256(compute_bytes_checksum(&file.content))),
            modified: Some(file.modified),
        });
        let mut entries: Vec<RemoteEntry> = dirs.chain(files).collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

fn change_for(file: &RemoteFile) -> ChangeRecord {
    ChangeRecord::file(file.path.clone(), file.content.len() as u64)
        .with_hash(ContentHash::Sha256(compute_bytes_checksum(&file.content)))
        .with_modified(file.modified)
}

fn ensure_parents(state: &mut State, path: &NormalizedPath) {
    let mut parent = path.parent();
    while let Some(dir) = parent {
        if dir.is_root() {
            break;
        }
        state.dirs.entry(dir.lookup_key()).or_insert_with(|| dir.clone());
        parent = dir.parent();
    }
}

fn remove_under(state: &mut State, path: &NormalizedPath) {
    state.files.retain(|_, f| !f.path.starts_with_ignore_case(path));
    state.dirs.retain(|_, d| !d.starts_with_ignore_case(path));
}

#[async_trait]
impl DeltaSource for MemoryRemote {
    async fn changes(&self, cursor: Option<&SyncCursor>) -> DeltaResult<DeltaPage> {
        let mut state = self.state();
        if let Some(scripted) = state.scripted.pop_front() {
            return scripted;
        }

        let entries = match cursor {
            None => {
                state.pending.clear();
                Self::listing(&state).iter().map(RemoteEntry::to_change).collect()
            }
            Some(_) => std::mem::take(&mut state.pending),
        };
        state.generation += 1;
        Ok(DeltaPage {
            entries,
            cursor: SyncCursor::new(format!("gen-{}", state.generation)),
            has_more: false,
            reset: false,
        })
    }
}

#[async_trait]
impl RemoteReader for MemoryRemote {
    async fn download(&self, path: &NormalizedPath) -> DeltaResult<Vec<u8>> {
        let mut state = self.state();
        state.downloads.push(path.clone());
        state
            .files
            .get(&path.lookup_key())
            .map(|f| f.content.clone())
            .ok_or_else(|| DeltaError::NotFound { path: path.to_string() })
    }
}

#[async_trait]
impl RemoteTree for MemoryRemote {
    async fn list_recursive(&self) -> DeltaResult<Vec<RemoteEntry>> {
        Ok(Self::listing(&self.state()))
    }
}

#[async_trait]
impl RemoteWriter for MemoryRemote {
    async fn upload(
        &self,
        path: &NormalizedPath,
        content: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> DeltaResult<()> {
        let mut state = self.state();
        ensure_parents(&mut state, path);
        state.uploads.push(path.clone());
        state.files.insert(
            path.lookup_key(),
            RemoteFile {
                path: path.clone(),
                content,
                modified: modified.unwrap_or_else(Utc::now),
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &NormalizedPath) -> DeltaResult<()> {
        let mut state = self.state();
        ensure_parents(&mut state, path);
        state.dirs.insert(path.lookup_key(), path.clone());
        Ok(())
    }

    async fn delete(&self, path: &NormalizedPath) -> DeltaResult<()> {
        remove_under(&mut self.state(), path);
        Ok(())
    }
}

impl RemoteProvider for MemoryRemote {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn tree(&self) -> Option<&dyn RemoteTree> {
        if self.with_tree { Some(self) } else { None }
    }

    fn writer(&self) -> Option<&dyn RemoteWriter> {
        Some(self)
    }
}
