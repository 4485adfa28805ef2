//! Settings and their resolution
//!
//! Settings are merged from these sources (later sources override earlier):
//!
//! 1. **Built-in defaults**
//! 2. **Global config** - `<config_dir>/blogsync/config.toml`
//! 3. **Explicit config** - the file passed with `--config` (TOML, JSON or YAML)
//! 4. **Environment** - `BLOGSYNC_DATA_DIR`, `BLOGSYNC_BLOGS_DIR`
//!
//! Tables are merged key by key. `[[blogs]]` entries are merged by `id`, so
//! a later layer can adjust one blog without restating the others.
//!
//! # Example
//!
//! ```ignore
//! use blogsync_core::config::SettingsResolver;
//!
//! let settings = SettingsResolver::new().with_config_file("blogsync.toml").resolve()?;
//! for blog in &settings.blogs {
//!     println!("{} -> {}", blog.id, settings.blog_folder(&blog.id).display());
//! }
//! ```

mod resolver;
mod settings;

pub use resolver::{ENV_BLOGS_DIR, ENV_DATA_DIR, SettingsResolver};
pub use settings::{BlogConfig, check_blog_id, LockSettings, ReconcileSettings, RetrySettings, Settings, TimeoutSettings};
