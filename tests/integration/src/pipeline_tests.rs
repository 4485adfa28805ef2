//! End-to-end runs over a local source folder
//!
//! These wire the service the way the command line does: file-backed entry
//! store, preview placeholders on disk and the local provider.

use std::sync::Arc;

use blogsync_core::{AcquirePolicy, Direction, EntryStore, FileEntryStore, FsPreview, Settings, SyncService};
use blogsync_fs::NormalizedPath;
use blogsync_test_utils::{FakeBuilder, TestFolder};
use pretty_assertions::assert_eq;

const BLOG: &str = "blog";

struct Pipeline {
    folder: TestFolder,
    settings: Settings,
    service: SyncService,
}

fn service_for(settings: &Settings) -> SyncService {
    let builder = Arc::new(FakeBuilder::new(settings.blogs_dir()));
    let store = Arc::new(FileEntryStore::new(settings.entries_dir()));
    let preview = Arc::new(FsPreview::new(settings.blogs_dir()));
    SyncService::new(settings.clone(), builder, store, preview).with_lock_policy(AcquirePolicy::NoRetry)
}

fn pipeline() -> Pipeline {
    pipeline_with(|_| {})
}

fn pipeline_with(adjust: impl FnOnce(&mut Settings)) -> Pipeline {
    let folder = TestFolder::new();
    let mut settings = folder.settings_with_local_blog(BLOG);
    adjust(&mut settings);
    let service = service_for(&settings);
    Pipeline {
        folder,
        settings,
        service,
    }
}

impl Pipeline {
    async fn sync(&self) -> blogsync_core::SyncReport {
        let provider = self.service.connect(BLOG).unwrap();
        self.service.sync(BLOG, provider.as_ref()).await.unwrap()
    }

    async fn entry_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .service
            .updater()
            .store()
            .list(BLOG)
            .await
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        paths.sort();
        paths
    }
}

#[tokio::test]
async fn test_local_source_is_mirrored_and_built() {
    let p = pipeline();
    p.folder.write_remote(BLOG, "posts/hello.txt", "title: Hello\nHi");
    p.folder.write_remote(BLOG, "album+/a.md", "A");
    p.folder.write_remote(BLOG, "album+/b.md", "B");
    p.folder.write_remote(BLOG, ".DS_Store", "finder");

    let report = p.sync().await;

    assert!(report.is_clean(), "{}", report.summary());
    assert_eq!(
        p.folder.blog_tree(BLOG),
        vec!["album+", "album+/a.md", "album+/b.md", "posts", "posts/hello.txt"]
    );
    assert_eq!(p.entry_paths().await, vec!["/album+", "/posts/hello.txt"]);
}

#[tokio::test]
async fn test_unchanged_source_is_a_no_op() {
    let p = pipeline();
    p.folder.write_remote(BLOG, "a.txt", "a");
    p.sync().await;

    let report = p.sync().await;

    assert!(report.applied.touched().is_empty());
    assert!(report.updates.is_empty());
}

#[tokio::test]
async fn test_case_only_rename_in_the_source() {
    let p = pipeline();
    let old = p.folder.write_remote(BLOG, "foo.txt", "post");
    p.sync().await;

    std::fs::rename(&old, p.folder.remote_dir(BLOG).join("Foo.txt")).unwrap();
    let report = p.sync().await;

    assert!(report.is_clean(), "{}", report.summary());
    assert_eq!(p.folder.blog_tree(BLOG), vec!["Foo.txt"]);
    assert_eq!(p.entry_paths().await, vec!["/Foo.txt"]);
}

#[tokio::test]
async fn test_draft_preview_survives_the_next_sync() {
    let p = pipeline();
    p.folder.write_remote(BLOG, "posts/wip.txt", "draft: true\nNot yet");
    p.sync().await;
    p.folder.assert_blog_file_exists(BLOG, "posts/wip [preview].html");

    p.folder.write_remote(BLOG, "posts/other.txt", "Other");
    let report = p.sync().await;

    assert!(report.is_clean(), "{}", report.summary());
    p.folder.assert_blog_file_exists(BLOG, "posts/wip [preview].html");
}

#[tokio::test]
async fn test_publishing_a_draft_removes_its_preview() {
    let p = pipeline();
    p.folder.write_remote(BLOG, "wip.txt", "draft: true\nNot yet");
    p.sync().await;
    p.folder.assert_blog_file_exists(BLOG, "wip [preview].html");

    p.folder.write_remote(BLOG, "wip.txt", "draft: false\nPublished now");
    p.sync().await;

    p.folder.assert_blog_file_not_exists(BLOG, "wip [preview].html");
    p.folder.assert_blog_file_contains(BLOG, "wip.txt", "Published now");
}

#[tokio::test]
async fn test_entries_survive_a_restart() {
    let p = pipeline();
    p.folder.write_remote(BLOG, "a.txt", "a");
    p.sync().await;

    let restarted = service_for(&p.settings);
    let entry = restarted
        .updater()
        .store()
        .get(BLOG, &NormalizedPath::new("a.txt"))
        .await
        .unwrap();

    assert!(entry.is_some());
    let account = restarted.accounts().load(BLOG).unwrap().unwrap();
    assert!(account.setup_complete);
}

#[tokio::test]
async fn test_push_resync_restores_the_source() {
    let p = pipeline();
    p.folder.write_remote(BLOG, "a.txt", "a");
    p.sync().await;
    std::fs::remove_file(p.folder.remote_dir(BLOG).join("a.txt")).unwrap();

    let provider = p.service.connect(BLOG).unwrap();
    let report = p.service.resync(BLOG, provider.as_ref(), Direction::Push).await.unwrap();

    let pushed = report.pushed.unwrap();
    assert_eq!(pushed.uploaded, vec![NormalizedPath::new("a.txt")]);
    assert_eq!(
        std::fs::read_to_string(p.folder.remote_dir(BLOG).join("a.txt")).unwrap(),
        "a"
    );
}

#[tokio::test]
async fn test_push_resync_keeps_files_mirrored_as_placeholders() {
    let p = pipeline_with(|s| s.reconcile.max_file_size = 10);
    p.folder.write_remote(BLOG, "video.bin", "twenty bytes of data");
    p.folder.write_remote(BLOG, "note.txt", "short");
    p.sync().await;
    assert_eq!(std::fs::metadata(p.folder.blog_dir(BLOG).join("video.bin")).unwrap().len(), 0);

    let provider = p.service.connect(BLOG).unwrap();
    let report = p.service.resync(BLOG, provider.as_ref(), Direction::Push).await.unwrap();

    let pushed = report.pushed.unwrap();
    assert!(pushed.uploaded.is_empty(), "{:?}", pushed.uploaded);
    assert_eq!(pushed.skipped_placeholders, vec![NormalizedPath::new("video.bin")]);
    assert_eq!(
        std::fs::read_to_string(p.folder.remote_dir(BLOG).join("video.bin")).unwrap(),
        "twenty bytes of data"
    );
}

#[tokio::test]
async fn test_deleted_source_folder_is_reported() {
    let p = pipeline();
    std::fs::remove_dir_all(p.folder.remote_dir(BLOG)).unwrap();
    let provider = p.service.connect(BLOG).unwrap();

    let err = p.service.sync(BLOG, provider.as_ref()).await.unwrap_err();

    assert_eq!(err.code(), "FOLDER_MISSING");
    let account = p.service.accounts().load(BLOG).unwrap().unwrap();
    assert!(account.has_error());
}
