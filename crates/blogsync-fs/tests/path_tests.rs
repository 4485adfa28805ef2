use blogsync_fs::NormalizedPath;
use rstest::rstest;

#[rstest]
#[case("foo/bar/baz", "foo/bar/baz")]
#[case("foo\\bar\\baz", "foo/bar/baz")]
#[case("/foo//bar/", "foo/bar")]
#[case("//foo/./bar", "foo/bar")]
#[case("a/../b", "b")]
#[case("../../a/b", "a/b")]
#[case("/", "")]
fn test_normalize(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(NormalizedPath::new(input).as_str(), expected);
}

#[test]
fn test_display_is_slash_rooted() {
    let path = NormalizedPath::new("foo/bar.txt");
    assert_eq!(path.to_string(), "/foo/bar.txt");
    assert_eq!(path.to_slash_string(), "/foo/bar.txt");
}

#[test]
fn test_join_paths() {
    let base = NormalizedPath::new("/foo/bar");
    assert_eq!(base.join("baz").as_str(), "foo/bar/baz");
    assert_eq!(NormalizedPath::root().join("/baz/").as_str(), "baz");
}

#[test]
fn test_to_native_joins_segments() {
    let root = std::path::Path::new("/srv/blogs/blog_1");
    let path = NormalizedPath::new("posts/hello.txt");
    assert_eq!(path.to_native(root), root.join("posts").join("hello.txt"));
}

#[test]
fn test_parent() {
    let path = NormalizedPath::new("foo/bar/baz");
    let parent = path.parent().unwrap();
    assert_eq!(parent.as_str(), "foo/bar");
}

#[test]
fn test_file_name() {
    let path = NormalizedPath::new("foo/bar/baz.txt");
    assert_eq!(path.file_name(), Some("baz.txt"));
    assert_eq!(NormalizedPath::root().file_name(), None);
}

#[test]
fn test_lookup_key_ignores_case() {
    let a = NormalizedPath::new("/Posts/Foo.TXT");
    let b = NormalizedPath::new("posts/foo.txt");
    assert_ne!(a, b);
    assert!(a.eq_ignore_case(&b));
    assert!(a.starts_with_ignore_case(&NormalizedPath::new("POSTS")));
}
