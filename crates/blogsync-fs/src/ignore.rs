//! Filter for system and temporary files

use crate::constants::{OFFICE_LOCK_PREFIX, ReservedName};

/// Whether a path must be kept out of synchronization.
///
/// True when any segment matches a reserved system name (case-insensitive)
/// or starts with the Office lock-file prefix. Pure, no I/O.
pub fn should_ignore(path: &str) -> bool {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .any(is_ignored_segment)
}

/// Whether a single file or directory name is ignored.
pub fn is_ignored_segment(segment: &str) -> bool {
    segment.starts_with(OFFICE_LOCK_PREFIX) || ReservedName::ALL.iter().any(|r| r.matches(segment))
}
