use blogsync_fs::ConfigStore;
use std::collections::HashMap;
use std::path::PathBuf;
use toml::Value;

use super::settings::Settings;
use crate::{Error, Result};

pub const ENV_DATA_DIR: &str = "BLOGSYNC_DATA_DIR";
pub const ENV_BLOGS_DIR: &str = "BLOGSYNC_BLOGS_DIR";

/// Resolves [`Settings`] from the layered sources.
#[derive(Debug, Clone, Default)]
pub struct SettingsResolver {
    config_file: Option<PathBuf>,
    /// Override for the global config directory (used for testing).
    /// When `None`, `dirs::config_dir()/blogsync` is used.
    global_config_dir_override: Option<PathBuf>,
    /// Environment to read overrides from; `None` reads the process env
    env_override: Option<HashMap<String, String>>,
}

impl SettingsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer an explicit settings file on top of the global one.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_global_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_config_dir_override = Some(dir.into());
        self
    }

    /// Read environment overrides from `vars` instead of the process.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_override = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    fn global_config_dir(&self) -> Option<PathBuf> {
        if let Some(ref override_dir) = self.global_config_dir_override {
            return Some(override_dir.clone());
        }
        dirs::config_dir().map(|d| d.join("blogsync"))
    }

    fn env(&self, name: &str) -> Option<String> {
        let value = match &self.env_override {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Merge every layer and validate the result.
    ///
    /// Missing global config is skipped; a missing explicit file, a file
    /// that does not parse and settings that fail validation are errors.
    pub fn resolve(&self) -> Result<Settings> {
        let store = ConfigStore::new();
        let mut merged = Value::try_from(Settings::default())
            .map_err(|e| Error::config(format!("default settings do not serialize: {e}")))?;

        // Layer 2 - Global config
        if let Some(global_dir) = self.global_config_dir() {
            let global_config_path = global_dir.join("config.toml");
            if global_config_path.is_file() {
                tracing::debug!(?global_config_path, "Loading global config");
                let layer: Value = store.load(&global_config_path)?;
                merge_values(&mut merged, layer);
            } else {
                tracing::debug!(?global_config_path, "No global config found; skipping");
            }
        }

        // Layer 3 - Explicit config
        if let Some(path) = &self.config_file {
            if !path.is_file() {
                return Err(Error::config(format!("config file not found: {}", path.display())));
            }
            tracing::debug!(config_path = ?path, "Loading config file");
            let layer: Value = store.load(path)?;
            merge_values(&mut merged, layer);
        }

        let mut settings: Settings = merged.try_into()?;

        // Layer 4 - Environment
        if let Some(dir) = self.env(ENV_DATA_DIR) {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = self.env(ENV_BLOGS_DIR) {
            settings.blogs_dir = Some(PathBuf::from(dir));
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Deep-merge `overlay` into `base`.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base), Value::Table(overlay)) => {
            for (key, value) in overlay {
                if key == "blogs" {
                    merge_blogs(base.entry(key).or_insert(Value::Array(Vec::new())), value);
                    continue;
                }
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// `[[blogs]]` entries are matched by `id`; new ids are appended.
fn merge_blogs(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Array(existing), Value::Array(incoming)) => {
            for blog in incoming {
                let id = blog.get("id").and_then(Value::as_str);
                let position =
                    id.and_then(|id| existing.iter().position(|b| b.get("id").and_then(Value::as_str) == Some(id)));
                match position {
                    Some(index) => merge_values(&mut existing[index], blog),
                    None => existing.push(blog),
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogsync_delta::Provider;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn isolated() -> (TempDir, SettingsResolver) {
        let temp_dir = TempDir::new().unwrap();
        let resolver = SettingsResolver::new()
            .with_global_config_dir(temp_dir.path().join("global"))
            .with_env(Vec::<(String, String)>::new());
        (temp_dir, resolver)
    }

    #[test]
    fn resolve_returns_defaults_when_no_config_exists() {
        let (_temp, resolver) = isolated();
        let settings = resolver.resolve().unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn explicit_file_overrides_global_and_merges_blogs_by_id() {
        let (temp, resolver) = isolated();
        fs::create_dir_all(temp.path().join("global")).unwrap();
        fs::write(
            temp.path().join("global/config.toml"),
            r#"
concurrency = 2

[lock]
stale_ms = 20000

[[blogs]]
id = "travel"
provider = "dropbox"
folder_id = "id:global"

[[blogs]]
id = "notes"
provider = "local"
source = "/srv/notes"
"#,
        )
        .unwrap();

        let explicit = temp.path().join("blogsync.toml");
        fs::write(
            &explicit,
            r#"
[lock]
update_ms = 5000

[[blogs]]
id = "travel"
folder_id = "id:explicit"
"#,
        )
        .unwrap();

        let settings = resolver.with_config_file(&explicit).resolve().unwrap();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.lock.stale_ms, 20_000);
        assert_eq!(settings.lock.update_ms, 5_000);
        assert_eq!(settings.blogs.len(), 2);

        let travel = settings.blog("travel").unwrap();
        assert_eq!(travel.provider, Provider::Dropbox);
        assert_eq!(travel.folder_id.as_deref(), Some("id:explicit"));
    }

    #[test]
    fn explicit_file_may_be_yaml() {
        let (temp, resolver) = isolated();
        let explicit = temp.path().join("blogsync.yaml");
        fs::write(&explicit, "concurrency: 8\nreconcile:\n  mkdir_conflict: replace-file\n").unwrap();

        let settings = resolver.with_config_file(&explicit).resolve().unwrap();
        assert_eq!(settings.concurrency, 8);
        assert_eq!(
            settings.reconcile.mkdir_conflict,
            crate::reconcile::MkdirConflictPolicy::ReplaceFile
        );
    }

    #[test]
    fn environment_overrides_directories() {
        let (temp, _) = isolated();
        let settings = SettingsResolver::new()
            .with_global_config_dir(temp.path().join("global"))
            .with_env([(ENV_DATA_DIR, "/var/lib/blogsync"), (ENV_BLOGS_DIR, "/srv/blogs")])
            .resolve()
            .unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/blogsync"));
        assert_eq!(settings.blog_folder("b"), PathBuf::from("/srv/blogs/b"));
    }

    #[test]
    fn missing_explicit_file_and_invalid_toml_are_errors() {
        let (temp, resolver) = isolated();
        let missing = resolver.clone().with_config_file(temp.path().join("nope.toml")).resolve();
        assert!(matches!(missing, Err(Error::Config { .. })));

        let broken = temp.path().join("broken.toml");
        fs::write(&broken, "concurrency = [").unwrap();
        assert!(resolver.with_config_file(&broken).resolve().is_err());
    }
}
