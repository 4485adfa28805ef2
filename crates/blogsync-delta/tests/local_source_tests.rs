use std::fs;

use blogsync_delta::local::LocalFolderSource;
use blogsync_delta::{
    ChangeKind, ChangeRecord, DeltaError, DeltaSource, RemoteProvider, RemoteReader, RemoteWriter,
};
use blogsync_fs::NormalizedPath;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Dirs {
    _temp: TempDir,
    source: std::path::PathBuf,
    mirror: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    let mirror = temp.path().join("mirror");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&mirror).unwrap();
    Dirs {
        _temp: temp,
        source,
        mirror,
    }
}

fn summary(entries: &[ChangeRecord]) -> Vec<(String, ChangeKind)> {
    entries.iter().map(|c| (c.path.to_string(), c.kind)).collect()
}

#[tokio::test]
async fn test_first_page_lists_everything() {
    let d = dirs();
    fs::create_dir_all(d.source.join("posts")).unwrap();
    fs::write(d.source.join("posts/a.txt"), "a").unwrap();
    fs::write(d.source.join(".DS_Store"), "").unwrap();

    let source = LocalFolderSource::new(&d.source, &d.mirror);
    let page = source.changes(None).await.unwrap();

    assert_eq!(
        summary(&page.entries),
        vec![
            ("/posts".to_string(), ChangeKind::Folder),
            ("/posts/a.txt".to_string(), ChangeKind::File),
        ]
    );
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_unchanged_listing_yields_empty_page() {
    let d = dirs();
    fs::write(d.source.join("a.txt"), "a").unwrap();
    let source = LocalFolderSource::new(&d.source, &d.mirror);

    let first = source.changes(None).await.unwrap();
    let second = source.changes(Some(&first.cursor)).await.unwrap();

    assert!(second.entries.is_empty());
    assert_eq!(second.cursor, first.cursor);
}

#[tokio::test]
async fn test_case_only_rename_deletes_old_casing_first() {
    let d = dirs();
    fs::write(d.source.join("Foo.txt"), "x").unwrap();
    fs::write(d.mirror.join("foo.txt"), "x").unwrap();

    let source = LocalFolderSource::new(&d.source, &d.mirror);
    let page = source.changes(None).await.unwrap();

    assert_eq!(
        summary(&page.entries),
        vec![
            ("/foo.txt".to_string(), ChangeKind::Deleted),
            ("/Foo.txt".to_string(), ChangeKind::File),
        ]
    );
}

#[tokio::test]
async fn test_missing_source_is_folder_missing() {
    let d = dirs();
    let source = LocalFolderSource::new(d.source.join("gone"), &d.mirror);

    let err = source.changes(None).await.unwrap_err();
    assert!(matches!(err, DeltaError::FolderMissing { .. }), "{err:?}");
    assert_eq!(err.code(), "FOLDER_MISSING");
}

#[tokio::test]
async fn test_download_resolves_case() {
    let d = dirs();
    fs::create_dir_all(d.source.join("Posts")).unwrap();
    fs::write(d.source.join("Posts/Hello.txt"), "hi").unwrap();
    let source = LocalFolderSource::new(&d.source, &d.mirror);

    let content = source.download(&NormalizedPath::new("posts/hello.txt")).await.unwrap();
    assert_eq!(content, b"hi");

    let missing = source.download(&NormalizedPath::new("nope.txt")).await.unwrap_err();
    assert!(matches!(missing, DeltaError::NotFound { .. }));
}

#[tokio::test]
async fn test_writer_round_trips_through_the_source_folder() {
    let d = dirs();
    let source = LocalFolderSource::new(&d.source, &d.mirror);
    let writer = source.writer().unwrap();

    writer.mkdir(&NormalizedPath::new("posts")).await.unwrap();
    writer
        .upload(&NormalizedPath::new("posts/new.txt"), b"new".to_vec(), None)
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(d.source.join("posts/new.txt")).unwrap(), "new");

    writer.delete(&NormalizedPath::new("posts")).await.unwrap();
    assert!(!d.source.join("posts").exists());
    // Deleting twice is fine
    writer.delete(&NormalizedPath::new("posts")).await.unwrap();
}
