//! Shared test utilities for the blogsync workspace.
//!
//! This crate provides standardised test fixtures to eliminate duplication
//! across crate test suites. It is a dev-dependency only and never published.
//!
//! # Modules
//!
//! - [`folder`]: [`TestFolder`], a sandbox with settings, blog folders and a remote directory
//! - [`remote`]: [`MemoryRemote`], a scripted in-memory provider
//! - [`builder`]: [`FakeBuilder`] and [`RecordingPreview`] build collaborators

pub mod builder;
pub mod folder;
pub mod remote;

pub use builder::{FakeBuilder, PreviewCall, RecordingPreview};
pub use folder::TestFolder;
pub use remote::MemoryRemote;
