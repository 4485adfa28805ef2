use blogsync_fs::{NormalizedPath, should_ignore};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_normalization_invariants(s in "\\PC*") {
        let path = NormalizedPath::new(&s);
        let as_str = path.as_str();

        prop_assert!(!as_str.contains('\\'));
        prop_assert!(!as_str.contains("//"));
        prop_assert!(!as_str.starts_with('/'));
        prop_assert!(!as_str.ends_with('/'));

        // Normalizing twice is a no-op, from either rendering
        prop_assert_eq!(&NormalizedPath::new(as_str), &path);
        prop_assert_eq!(&NormalizedPath::new(path.to_slash_string()), &path);
    }

    #[test]
    fn test_join_stays_under_base(a in "[a-z]{1,8}(/[a-z]{1,8}){0,3}", b in "[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
        let base = NormalizedPath::new(&a);
        let joined = base.join(&b);
        prop_assert!(joined.starts_with(&base));
        prop_assert_eq!(joined.strip_prefix(&base).unwrap(), NormalizedPath::new(&b));
    }

    #[test]
    fn test_ignore_is_case_insensitive(prefix in "[a-z]{0,6}", upper in proptest::bool::ANY) {
        let name = if upper { ".DS_STORE" } else { ".ds_store" };
        let path = format!("/{}/{}", prefix, name);
        prop_assert!(should_ignore(&path));
    }

    #[test]
    fn test_plain_names_are_not_ignored(name in "[a-z]{1,10}\\.(txt|md|jpg)") {
        let rooted = format!("/posts/{}", name);
        prop_assert!(!should_ignore(&rooted));
    }
}
