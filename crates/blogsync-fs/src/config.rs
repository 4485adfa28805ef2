//! Format-agnostic configuration loading and saving

use crate::{Error, Result, io};
use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;

/// Format-agnostic configuration store.
///
/// Detects the format from the file extension and handles
/// serialization/deserialization transparently. Used for settings files
/// and for persisted per-blog records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigStore {
    robustness: io::RobustnessConfig,
}

impl ConfigStore {
    /// Create a new ConfigStore with default robustness settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new ConfigStore with custom robustness settings.
    pub fn with_robustness(robustness: io::RobustnessConfig) -> Self {
        Self { robustness }
    }

    /// Load configuration from a file.
    ///
    /// Format is detected from file extension:
    /// - `.toml` -> TOML
    /// - `.json` -> JSON
    /// - `.yaml`, `.yml` -> YAML
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = io::read_text(path)?;
        let extension = extension_of(path);

        match extension.as_str() {
            "toml" => toml::from_str(&content).map_err(|e| parse_error(path, "TOML", e)),
            "json" => serde_json::from_str(&content).map_err(|e| parse_error(path, "JSON", e)),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_error(path, "YAML", e)),
            _ => Err(Error::UnsupportedFormat { extension }),
        }
    }

    /// Load configuration, returning `None` when the file does not exist.
    pub fn load_optional<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        self.load(path).map(Some)
    }

    /// Save configuration to a file.
    ///
    /// Format is determined from file extension.
    /// Uses atomic write to prevent corruption.
    pub fn save<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let extension = extension_of(path);

        let content = match extension.as_str() {
            "toml" => toml::to_string_pretty(value).map_err(|e| serialize_error(path, "TOML", e))?,
            "json" => {
                serde_json::to_string_pretty(value).map_err(|e| serialize_error(path, "JSON", e))?
            }
            "yaml" | "yml" => serde_yaml::to_string(value).map_err(|e| serialize_error(path, "YAML", e))?,
            _ => return Err(Error::UnsupportedFormat { extension }),
        };

        io::write_atomic(path, content.as_bytes(), self.robustness)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn parse_error(path: &Path, format: &str, e: impl std::fmt::Display) -> Error {
    Error::ConfigParse {
        path: path.to_path_buf(),
        format: format.into(),
        message: e.to_string(),
    }
}

fn serialize_error(path: &Path, format: &str, e: impl std::fmt::Display) -> Error {
    Error::ConfigSerialize {
        path: path.to_path_buf(),
        format: format.into(),
        message: e.to_string(),
    }
}
