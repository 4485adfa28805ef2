//! Sync orchestration
//!
//! This module provides:
//! - **service**: [`SyncService`], the locked sync, resync and rebuild entry points
//! - **report**: [`SyncReport`], what one run changed

mod report;
mod service;

pub use report::SyncReport;
pub use service::{BlogStatus, SyncService};
