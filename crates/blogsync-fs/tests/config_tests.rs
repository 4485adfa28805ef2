use blogsync_fs::ConfigStore;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::fs;
use tempfile::TempDir;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestRecord {
    cursor: Option<String>,
    count: i32,
}

#[test]
fn test_load_toml() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("record.toml");
    fs::write(&file_path, "cursor = \"abc\"\ncount = 42").unwrap();

    let record: TestRecord = ConfigStore::new().load(&file_path).unwrap();

    assert_eq!(
        record,
        TestRecord {
            cursor: Some("abc".into()),
            count: 42
        }
    );
}

#[test]
fn test_save_then_load_json() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("accounts/blog_1/dropbox.json");
    let store = ConfigStore::new();
    let record = TestRecord {
        cursor: None,
        count: 7,
    };

    store.save(&file_path, &record).unwrap();
    let loaded: TestRecord = store.load(&file_path).unwrap();

    assert_eq!(loaded, record);
}

#[test]
fn test_load_yaml() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("record.yml");
    fs::write(&file_path, "cursor: xyz\ncount: 1").unwrap();

    let record: TestRecord = ConfigStore::new().load(&file_path).unwrap();
    assert_eq!(record.cursor.as_deref(), Some("xyz"));
}

#[test]
fn test_load_optional_missing_file() {
    let temp = TempDir::new().unwrap();
    let loaded: Option<TestRecord> = ConfigStore::new()
        .load_optional(&temp.path().join("absent.json"))
        .unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_unsupported_extension() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("record.ini");
    fs::write(&file_path, "x=1").unwrap();

    let result: blogsync_fs::Result<TestRecord> = ConfigStore::new().load(&file_path);
    assert!(matches!(
        result,
        Err(blogsync_fs::Error::UnsupportedFormat { .. })
    ));
}
