//! Reserved file names and markers.

use std::path::Path;

/// System files that never take part in synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedName {
    /// macOS Finder metadata
    DsStore,
    /// Windows thumbnail cache
    ThumbsDb,
    /// Windows folder customization
    DesktopIni,
    /// Git database
    GitDir,
}

impl ReservedName {
    pub const ALL: [ReservedName; 4] = [
        ReservedName::DsStore,
        ReservedName::ThumbsDb,
        ReservedName::DesktopIni,
        ReservedName::GitDir,
    ];

    /// Lowercased on-disk name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DsStore => ".ds_store",
            Self::ThumbsDb => "thumbs.db",
            Self::DesktopIni => "desktop.ini",
            Self::GitDir => ".git",
        }
    }

    /// Case-insensitive match against a single path segment.
    pub fn matches(&self, segment: &str) -> bool {
        segment.eq_ignore_ascii_case(self.as_str())
    }
}

impl AsRef<Path> for ReservedName {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl std::fmt::Display for ReservedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Prefix of Microsoft Office owner/lock files (`~$report.docx`).
pub const OFFICE_LOCK_PREFIX: &str = "~$";

/// Suffix appended to a blog folder path to form its sync lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Suffix of draft preview placeholder files (`Post [preview].html`).
pub const PREVIEW_SUFFIX: &str = " [preview].html";

/// Whether a file name is a draft preview placeholder.
pub fn is_preview_name(name: &str) -> bool {
    name.to_lowercase().ends_with(PREVIEW_SUFFIX)
}

/// Marker suffix of a multi-file folder segment (`album+`).
pub const MULTI_FOLDER_MARKER: char = '+';
