//! Download coordination for zampy.
//!
//! The [`DownloadCoordinator`] sits between the recipe pipeline and the
//! dataset adapters. It makes raw downloads idempotent and resumable:
//! - every artifact key has a row in the SQLite [`ArtifactIndex`]
//! - a complete artifact whose file exists is never fetched again
//! - transient failures are retried with bounded exponential backoff
//! - concurrent requests for one key are serialized by a per-key lock

pub mod coordinator;
pub mod index;

pub use coordinator::{DownloadCoordinator, RequestMode, RetryPolicy};
pub use index::{ArtifactIndex, ArtifactRecord, IndexStats};
