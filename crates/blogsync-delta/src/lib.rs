//! Remote delta sources for blogsync
//!
//! Every storage provider is reduced to the same contract: a paginated
//! stream of [`ChangeRecord`]s relative to the blog folder root, plus a
//! cursor that resumes after the last applied page. Provider quirks (case
//! insensitive renames, cursor resets, id-addressed files) are normalized
//! inside the adapters so the reconciler only ever sees the common shape.
//!
//! # Layout
//!
//! - [`record`] - change records, content hashes, cursors, delta pages
//! - [`source`] - the provider traits
//! - [`retry`] - bounded exponential backoff around provider calls
//! - [`snapshot`] - listing-diff deltas for providers without a change feed
//! - [`dropbox`], [`drive`], [`macagent`], [`local`] - the adapters

pub mod drive;
pub mod dropbox;
pub mod error;
pub mod local;
pub mod macagent;
pub mod provider;
pub mod record;
pub mod retry;
pub mod snapshot;
pub mod source;

pub use error::{DeltaError, DeltaResult};
pub use provider::Provider;
pub use record::{ChangeKind, ChangeRecord, ContentHash, DeltaPage, RemoteEntry, SyncCursor};
pub use retry::{RetryPolicy, with_retry};
pub use source::{DeltaSource, RemoteProvider, RemoteReader, RemoteTree, RemoteWriter};
