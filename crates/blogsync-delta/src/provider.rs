//! Storage provider identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The storage providers a blog folder can be synchronized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// A plain directory on this machine
    Local,
    Dropbox,
    GoogleDrive,
    /// iCloud Drive through the macOS agent
    #[serde(rename = "icloud")]
    ICloud,
}

impl Provider {
    pub const ALL: &'static [Provider] = &[
        Provider::Local,
        Provider::Dropbox,
        Provider::GoogleDrive,
        Provider::ICloud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Dropbox => "dropbox",
            Provider::GoogleDrive => "google-drive",
            Provider::ICloud => "icloud",
        }
    }

    /// Whether the provider exposes a native change feed with cursors.
    ///
    /// Providers without one are synchronized by diffing listings.
    pub fn has_change_feed(&self) -> bool {
        matches!(self, Provider::Dropbox | Provider::GoogleDrive)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown provider '{s}' (expected one of: local, dropbox, google-drive, icloud)"))
    }
}
