//! The seam between dataset adapters and the wire.
//!
//! Adapters build an [`ArchiveRequest`] and hand it to an [`ArchiveClient`];
//! the client performs the transfer and writes the raw bytes to disk. Real
//! clients talk HTTP, tests use an in-process fake.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A native request against a remote archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveRequest {
    /// A CDS-style retrieval: product name plus request body.
    Cds {
        dataset: String,
        body: serde_json::Value,
    },
    /// A plain file download.
    Url { url: String },
}

impl ArchiveRequest {
    pub fn cds(dataset: impl Into<String>, body: serde_json::Value) -> Self {
        Self::Cds {
            dataset: dataset.into(),
            body,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }
}

impl fmt::Display for ArchiveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cds { dataset, .. } => write!(f, "cds:{}", dataset),
            Self::Url { url } => f.write_str(url),
        }
    }
}

/// Executes archive requests.
///
/// Implementations map wire failures onto the error taxonomy:
/// `RemoteUnavailable` for anything worth retrying, `AuthorizationRequired`
/// and `UnsupportedRequest` for permanent rejections.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Fetch `request` and write the payload to `target`. Returns the number
    /// of bytes written.
    async fn retrieve(&self, request: &ArchiveRequest, target: &Path) -> Result<u64>;
}
