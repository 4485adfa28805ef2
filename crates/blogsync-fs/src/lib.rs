//! Filesystem layer for blogsync
//!
//! Provides blog-relative path normalization, case-insensitive path
//! resolution, the ignore filter applied at every ingestion boundary,
//! local tree listings and safe I/O operations.

pub mod case;
pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod ignore;
pub mod io;
pub mod path;
pub mod tree;

pub use case::resolve_case_sensitive_path;
pub use config::ConfigStore;
pub use constants::ReservedName;
pub use error::{Error, Result};
pub use ignore::should_ignore;
pub use io::RobustnessConfig;
pub use path::NormalizedPath;
pub use tree::{LocalEntryDescriptor, LocalTreeEntry};
