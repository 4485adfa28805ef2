//! Behavioural properties of the sync pipeline
//!
//! Each test pins one guarantee the pieces give when composed: replaying
//! batches, ordering inside a batch, case-only renames, multi-file
//! aggregation, folder locking, dependent invalidation and the ignore filter.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blogsync_core::build::{BuildErrorCode, EntryBuilder};
use blogsync_core::multi::{MultiFileAggregator, MultiFolderInfo};
use blogsync_core::{
    AcquirePolicy, BlogRegistry, EntryStore, EntryUpdater, Error, MemoryEntryStore, ReconcileOptions, Reconciler,
    SyncLock, UpdateOutcome,
};
use blogsync_delta::dropbox::{DropboxApi, DropboxSource, ListFolderResult, Metadata};
use blogsync_delta::{ChangeKind, ChangeRecord, DeltaError, DeltaResult, DeltaSource, RetryPolicy};
use blogsync_fs::{NormalizedPath, should_ignore};
use blogsync_test_utils::{FakeBuilder, MemoryRemote, RecordingPreview, TestFolder};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

const BLOG: &str = "blog";

fn updater(folder: &TestFolder) -> (EntryUpdater, Arc<MemoryEntryStore>) {
    let builder = EntryBuilder::new(Arc::new(FakeBuilder::new(folder.blogs_dir())), folder.blogs_dir());
    let store = Arc::new(MemoryEntryStore::new());
    let updater = EntryUpdater::new(builder, store.clone(), Arc::new(RecordingPreview::new()));
    (updater, store)
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_replaying_a_batch_leaves_the_folder_unchanged() {
    let folder = TestFolder::new();
    let root = folder.blog_dir(BLOG);
    let remote = MemoryRemote::new();
    remote.put_file("posts/hello.txt", "Hello");
    remote.put_file("posts/bye.txt", "Bye");
    remote.put_dir("drafts");

    let batch = vec![
        ChangeRecord::folder("posts"),
        ChangeRecord::folder("drafts"),
        ChangeRecord::file("posts/hello.txt", 5),
        ChangeRecord::file("posts/bye.txt", 3),
        ChangeRecord::deleted("old.txt"),
    ];
    let options = ReconcileOptions::default();
    let reconciler = Reconciler::new(&root, &remote, &options);

    let first = reconciler.apply(batch.clone()).await.unwrap();
    let after_first = folder.blog_tree(BLOG);
    let second = reconciler.apply(batch).await.unwrap();

    assert!(first.is_clean() && second.is_clean());
    assert_eq!(folder.blog_tree(BLOG), after_first);
    assert_eq!(after_first, vec!["drafts", "posts", "posts/bye.txt", "posts/hello.txt"]);
    assert!(second.deleted.is_empty());
    assert!(second.created_dirs.is_empty());
    folder.assert_blog_file_contains(BLOG, "posts/hello.txt", "Hello");
}

#[tokio::test]
async fn test_file_replaced_by_folder_of_the_same_name() {
    let folder = TestFolder::new();
    folder.write_blog(BLOG, "notes", "was a file");
    let root = folder.blog_dir(BLOG);
    let remote = MemoryRemote::new();
    remote.put_file("notes/first.txt", "first");

    let batch = vec![
        ChangeRecord::deleted("notes"),
        ChangeRecord::folder("notes"),
        ChangeRecord::file("notes/first.txt", 5),
    ];
    let options = ReconcileOptions::default();
    let report = Reconciler::new(&root, &remote, &options).apply(batch).await.unwrap();

    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(root.join("notes").is_dir());
    folder.assert_blog_file_contains(BLOG, "notes/first.txt", "first");
}

#[tokio::test]
async fn test_deletion_after_creation_in_one_batch_wins() {
    let folder = TestFolder::new();
    let root = folder.blog_dir(BLOG);
    fs::create_dir_all(&root).unwrap();
    let remote = MemoryRemote::new();

    let batch = vec![ChangeRecord::folder("gone"), ChangeRecord::deleted("gone")];
    let options = ReconcileOptions::default();
    Reconciler::new(&root, &remote, &options).apply(batch).await.unwrap();

    folder.assert_blog_file_not_exists(BLOG, "gone");
}

// ============================================================================
// Case-only renames
// ============================================================================

/// Dropbox API answering from canned listings.
#[derive(Default)]
struct CannedDropbox {
    root: Option<Metadata>,
    recursive: Vec<Metadata>,
    children: HashMap<String, Vec<Metadata>>,
    content: HashMap<String, Vec<u8>>,
}

fn dropbox_folder(display: &str) -> Metadata {
    Metadata::Folder {
        name: display.rsplit('/').next().unwrap_or_default().to_string(),
        id: None,
        path_lower: Some(display.to_lowercase()),
        path_display: Some(display.to_string()),
    }
}

fn dropbox_file(display: &str, size: u64) -> Metadata {
    Metadata::File {
        name: display.rsplit('/').next().unwrap_or_default().to_string(),
        id: None,
        path_lower: Some(display.to_lowercase()),
        path_display: Some(display.to_string()),
        size,
        content_hash: None,
        server_modified: None,
        client_modified: None,
    }
}

#[async_trait]
impl DropboxApi for CannedDropbox {
    async fn list_folder(&self, path: &str, recursive: bool) -> DeltaResult<ListFolderResult> {
        let entries = if recursive {
            self.recursive.clone()
        } else {
            self.children
                .get(&path.to_lowercase())
                .cloned()
                .ok_or(DeltaError::NotFound { path: path.into() })?
        };
        Ok(ListFolderResult {
            entries,
            cursor: "c1".into(),
            has_more: false,
        })
    }

    async fn list_folder_continue(&self, _cursor: &str) -> DeltaResult<ListFolderResult> {
        Err(DeltaError::Reset)
    }

    async fn get_metadata(&self, path_or_id: &str) -> DeltaResult<Metadata> {
        self.root.clone().ok_or(DeltaError::NotFound { path: path_or_id.into() })
    }

    async fn download(&self, path: &str) -> DeltaResult<Vec<u8>> {
        self.content
            .get(path)
            .cloned()
            .ok_or(DeltaError::NotFound { path: path.into() })
    }
}

#[tokio::test]
async fn test_case_only_rename_ends_with_the_new_name() {
    let folder = TestFolder::new();
    folder.write_blog(BLOG, "foo.txt", "old");
    let root = folder.blog_dir(BLOG);

    let mut children = HashMap::new();
    children.insert("/blog".to_string(), vec![dropbox_file("/Blog/Foo.txt", 3)]);
    let mut content = HashMap::new();
    content.insert("/Blog/Foo.txt".to_string(), b"new".to_vec());
    let api = CannedDropbox {
        root: Some(dropbox_folder("/Blog")),
        recursive: vec![dropbox_file("/Blog/Foo.txt", 3)],
        children,
        content,
    };
    let source = DropboxSource::new(Arc::new(api), Some("id:blog".into()), &root).with_retry_policy(RetryPolicy::none());

    let page = source.changes(None).await.unwrap();
    let kinds: Vec<_> = page.entries.iter().map(|r| (r.kind, r.path.to_string())).collect();
    assert_eq!(
        kinds,
        vec![
            (ChangeKind::Deleted, "/foo.txt".to_string()),
            (ChangeKind::File, "/Foo.txt".to_string()),
        ]
    );

    let options = ReconcileOptions::default();
    let report = Reconciler::new(&root, &source, &options)
        .apply(page.entries)
        .await
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(folder.blog_tree(BLOG), vec!["Foo.txt"]);
    assert_eq!(folder.read_blog(BLOG, "Foo.txt"), "new");
}

// ============================================================================
// Multi-file entries
// ============================================================================

#[tokio::test]
async fn test_multi_file_entry_is_built_in_name_order() {
    let folder = TestFolder::new();
    folder.write_blog(BLOG, "album+/b.md", "title: Second\nB");
    folder.write_blog(BLOG, "album+/a.md", "title: First\nA");
    folder.write_blog(BLOG, "album+/photo.jpg", "jpeg");
    folder.write_blog(BLOG, "album+/inner+/c.md", "C");
    let root = folder.blog_dir(BLOG);
    let builder = FakeBuilder::new(folder.blogs_dir());
    let aggregator = MultiFileAggregator::new(&builder, &root);
    let info = MultiFolderInfo::detect(&NormalizedPath::new("album+/b.md")).unwrap();

    let first = aggregator.build(BLOG, &info).await.unwrap();
    let second = aggregator.build(BLOG, &info).await.unwrap();

    assert_eq!(first.path, NormalizedPath::new("album+"));
    assert_eq!(first.public_path, NormalizedPath::new("album"));
    assert_eq!(first.metadata["_sourcePaths"], json!(["/album+/a.md", "/album+/b.md"]));
    assert_eq!(first.metadata["title"], json!("Second"));
    let a = first.html.find("<p>A</p>").unwrap();
    let b = first.html.find("<p>B</p>").unwrap();
    assert!(a < b);
    assert!(!first.html.contains("<p>C</p>"));
    assert_eq!(first.html, second.html);
    assert_eq!(first.metadata, second.metadata);
}

#[tokio::test]
async fn test_multi_folder_without_buildable_files_is_empty() {
    let folder = TestFolder::new();
    folder.write_blog(BLOG, "album+/photo.jpg", "jpeg");
    let root = folder.blog_dir(BLOG);
    let builder = FakeBuilder::new(folder.blogs_dir());
    let info = MultiFolderInfo::detect(&NormalizedPath::new("album+/photo.jpg")).unwrap();

    let err = MultiFileAggregator::new(&builder, &root)
        .build(BLOG, &info)
        .await
        .unwrap_err();

    assert_eq!(err.code, BuildErrorCode::Empty);
}

#[tokio::test]
async fn test_emptied_multi_folder_drops_its_entry() {
    let folder = TestFolder::new();
    let source = folder.write_blog(BLOG, "album+/a.md", "A");
    folder.write_blog(BLOG, "album+/photo.jpg", "jpeg");
    let (updater, store) = updater(&folder);
    let trigger = NormalizedPath::new("album+/a.md");

    let built = updater.update(BLOG, &trigger).await.unwrap();
    assert_eq!(
        built.outcome,
        UpdateOutcome::Built {
            path: NormalizedPath::new("album+")
        }
    );

    fs::remove_file(source).unwrap();
    let report = updater.update(BLOG, &trigger).await.unwrap();

    assert_eq!(
        report.outcome,
        UpdateOutcome::Dropped {
            paths: vec![NormalizedPath::new("album+")]
        }
    );
    assert!(store.get(BLOG, &NormalizedPath::new("album+")).await.unwrap().is_none());
}

// ============================================================================
// Locking
// ============================================================================

fn file_lock(folder: &TestFolder) -> SyncLock {
    let settings = folder.settings();
    SyncLock::file_backed(settings.lock_dir(), settings.lock_config(), Arc::new(BlogRegistry::new()))
        .with_policy(AcquirePolicy::NoRetry)
}

#[tokio::test]
async fn test_only_one_concurrent_acquirer_wins() {
    let folder = TestFolder::new();
    let lock = file_lock(&folder);

    let (first, second) = tokio::join!(lock.acquire(BLOG), lock.acquire(BLOG));

    let (held, refused) = match (first, second) {
        (Ok(handle), Err(e)) | (Err(e), Ok(handle)) => (handle, e),
        (Ok(_), Ok(_)) => panic!("both acquirers hold the lock"),
        (Err(a), Err(b)) => panic!("neither acquirer got the lock: {a}, {b}"),
    };
    assert!(matches!(refused, Error::LockUnavailable { .. }));
    assert!(lock.inspect(BLOG).await.unwrap().held);

    held.release().await.unwrap();
    let again = lock.acquire(BLOG).await.unwrap();
    again.release().await.unwrap();
}

#[tokio::test]
async fn test_different_blogs_lock_independently() {
    let folder = TestFolder::new();
    let lock = file_lock(&folder);

    let one = lock.acquire("one").await.unwrap();
    let two = lock.acquire("two").await.unwrap();

    one.release().await.unwrap();
    two.release().await.unwrap();
}

#[tokio::test]
async fn test_stale_lock_is_taken_over() {
    let folder = TestFolder::new();
    let lock_file = folder.write(&folder.blogs_dir(), "blog.lock", "someone-else");
    folder.age(&lock_file, Duration::from_secs(60));
    let lock = file_lock(&folder);

    let handle = lock.acquire(BLOG).await.unwrap();

    assert_ne!(fs::read_to_string(&lock_file).unwrap(), "someone-else");
    handle.release().await.unwrap();
    assert!(!lock_file.exists());
}

// ============================================================================
// Dependents
// ============================================================================

#[tokio::test]
async fn test_removing_a_dependency_drops_its_dependent() {
    let folder = TestFolder::new();
    let image = folder.write_blog(BLOG, "images/cover.txt", "cover");
    folder.write_blog(BLOG, "post.txt", "depends: images/cover.txt\nBody");
    let (updater, store) = updater(&folder);

    updater.update(BLOG, &NormalizedPath::new("post.txt")).await.unwrap();
    assert!(store.get(BLOG, &NormalizedPath::new("post.txt")).await.unwrap().is_some());

    fs::remove_file(image).unwrap();
    let report = updater
        .update(BLOG, &NormalizedPath::new("images/cover.txt"))
        .await
        .unwrap();

    assert_eq!(report.dependents.dropped, vec![NormalizedPath::new("post.txt")]);
    assert!(store.get(BLOG, &NormalizedPath::new("post.txt")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_dependents_are_rebuilt_only_one_hop() {
    let folder = TestFolder::new();
    folder.write_blog(BLOG, "base.txt", "base");
    folder.write_blog(BLOG, "middle.txt", "depends: base.txt\nmiddle");
    folder.write_blog(BLOG, "top.txt", "depends: middle.txt\ntop");
    let (updater, _store) = updater(&folder);
    for path in ["base.txt", "middle.txt", "top.txt"] {
        updater.update(BLOG, &NormalizedPath::new(path)).await.unwrap();
    }

    let report = updater.update(BLOG, &NormalizedPath::new("base.txt")).await.unwrap();

    assert_eq!(report.dependents.rebuilt, vec![NormalizedPath::new("middle.txt")]);
}

// ============================================================================
// Ignore filter
// ============================================================================

#[tokio::test]
async fn test_ignored_paths_never_reach_disk_or_the_store() {
    let folder = TestFolder::new();
    let root = folder.blog_dir(BLOG);
    let remote = MemoryRemote::new();
    remote.put_file(".git/config", "[core]");
    remote.put_file("posts/.DS_Store", "finder");
    remote.put_file("posts/ok.txt", "ok");

    let batch = vec![
        ChangeRecord::folder(".git"),
        ChangeRecord::file(".git/config", 6),
        ChangeRecord::folder("posts"),
        ChangeRecord::file("posts/.DS_Store", 6),
        ChangeRecord::file("posts/ok.txt", 2),
    ];
    let options = ReconcileOptions::default();
    let report = Reconciler::new(&root, &remote, &options).apply(batch).await.unwrap();

    assert_eq!(folder.blog_tree(BLOG), vec!["posts", "posts/ok.txt"]);
    assert!(report.touched().iter().all(|p| !should_ignore(p.as_str())));

    let (updater, store) = updater(&folder);
    folder.write_blog(BLOG, ".git/notes.txt", "not a post");
    let ignored = updater.update(BLOG, &NormalizedPath::new(".git/notes.txt")).await.unwrap();
    assert_eq!(ignored.outcome, UpdateOutcome::Ignored);
    assert!(store.list(BLOG).await.unwrap().is_empty());
}

fn segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 _-]{1,12}"
}

fn reserved() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(".DS_Store".to_string()),
        Just("Thumbs.db".to_string()),
        Just("desktop.INI".to_string()),
        Just(".git".to_string()),
        "[a-z]{1,8}".prop_map(|s| format!("~${s}.docx")),
    ]
}

proptest! {
    #[test]
    fn prop_any_reserved_segment_ignores_the_path(
        before in prop::collection::vec(segment(), 0..3),
        name in reserved(),
        after in prop::collection::vec(segment(), 0..3),
    ) {
        let path = before
            .iter()
            .chain(std::iter::once(&name))
            .chain(after.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("/");
        let rooted = format!("/{path}");
        prop_assert!(should_ignore(&rooted));
    }

    #[test]
    fn prop_ordinary_paths_are_kept(segments in prop::collection::vec(segment(), 1..5)) {
        let path = format!("/{}", segments.join("/"));
        prop_assert!(!should_ignore(&path));
    }
}
