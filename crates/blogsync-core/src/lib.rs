//! Core orchestration layer for blogsync
//!
//! This crate turns provider deltas into a consistent local blog folder
//! and up-to-date entries, implementing:
//!
//! - **Folder lock**: a renewed, stealable lease per blog folder with diagnostics on compromise
//! - **Reconciler**: idempotent delete, mkdir and download application of change records
//! - **Resync**: full listing comparison in either direction
//! - **Entry updates**: builds, multi-file (`+` folder) aggregation and the dependent rebuild cascade
//! - **SyncService**: the orchestrator that owns error policy, cursors and account state
//!
//! # Architecture
//!
//! `blogsync-core` sits above the Layer 0 crates and below the CLI:
//!
//! ```text
//!                  blogsync-cli
//!                        |
//!                  blogsync-core
//!                        |
//!          +-------------+-------------+
//!          |                           |
//!     blogsync-fs <-------------- blogsync-delta
//! ```
//!
//! # Example
//!
//! ```ignore
//! use blogsync_core::{Result, SyncService};
//!
//! async fn example(service: &SyncService) -> Result<()> {
//!     let provider = service.connect("my-blog")?;
//!     let report = service.sync("my-blog", provider.as_ref()).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod build;
pub mod config;
pub mod dependents;
pub mod entry;
pub mod error;
pub mod lock;
pub mod multi;
pub mod preview;
pub mod providers;
pub mod reconcile;
pub mod registry;
pub mod resync;
pub mod sync;
pub mod update;

pub use account::{AccountRecord, AccountStore};
pub use build::{BuildError, BuildErrorCode, BuildTarget, Builder, EntryBuilder};
pub use config::{BlogConfig, Settings, SettingsResolver};
pub use dependents::{DependentRebuilder, RebuildReport};
pub use entry::{Entry, EntryStat, EntryStore, FileEntryStore, MemoryEntryStore};
pub use error::{Error, Result};
pub use lock::{AcquirePolicy, Diagnostics, FolderHandle, LockConfig, LockInfo, LockState, SyncLock};
pub use multi::{MultiFileAggregator, MultiFolderInfo};
pub use preview::{FsPreview, PreviewWriter};
pub use reconcile::{ApplyReport, MkdirConflictPolicy, ReconcileOptions, Reconciler};
pub use registry::{BlogRegistry, RegistrySnapshot};
pub use resync::{Direction, PushReport};
pub use sync::{BlogStatus, SyncReport, SyncService};
pub use update::{EntryUpdater, UpdateOutcome, UpdateReport};
