//! Wire clients for the remote archives.

mod cds;
mod http;

pub use cds::{CdsClient, Portal};
pub use http::HttpClient;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use zampy_common::{ArchiveClient, Result, ZampyConfig, ZampyError};

/// The clients an adapter catalog is wired with.
#[derive(Clone)]
pub struct ArchiveClients {
    pub cds: Arc<dyn ArchiveClient>,
    pub ads: Arc<dyn ArchiveClient>,
    pub http: Arc<dyn ArchiveClient>,
}

impl ArchiveClients {
    /// Real clients built from the process configuration.
    pub fn from_config(config: &ZampyConfig) -> Result<Self> {
        let timeout = config.download.request_timeout();
        Ok(Self {
            cds: Arc::new(CdsClient::for_portal(
                Portal::Cds,
                config.archive(Portal::Cds.config_key()),
                timeout,
            )?),
            ads: Arc::new(CdsClient::for_portal(
                Portal::Ads,
                config.archive(Portal::Ads.config_key()),
                timeout,
            )?),
            http: Arc::new(HttpClient::new(timeout)?),
        })
    }

    /// Route every archive through one client (used by tests).
    pub fn uniform(client: Arc<dyn ArchiveClient>) -> Self {
        Self {
            cds: client.clone(),
            ads: client.clone(),
            http: client,
        }
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(4)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| ZampyError::InvalidConfig(format!("failed to create HTTP client: {}", e)))
}

/// Map a transport failure onto the error taxonomy. Everything at this level
/// (timeouts, resets, DNS) is worth retrying.
pub(crate) fn transport_error(err: reqwest::Error) -> ZampyError {
    ZampyError::RemoteUnavailable(err.to_string())
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str, context: &str) -> ZampyError {
    let message = format!("{} returned {}: {}", context, status, extract_message(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ZampyError::AuthorizationRequired(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ZampyError::RemoteUnavailable(message)
        }
        s if s.is_server_error() => ZampyError::RemoteUnavailable(message),
        _ => ZampyError::UnsupportedRequest(message),
    }
}

/// Pull a human-readable message out of a JSON or text error body.
pub(crate) fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for pointer in ["/error/message", "/message", "/detail", "/title", "/reason"] {
            if let Some(text) = value.pointer(pointer).and_then(|v| v.as_str()) {
                let reason = value
                    .pointer("/error/reason")
                    .and_then(|v| v.as_str())
                    .filter(|r| *r != text);
                return match reason {
                    Some(reason) => format!("{} ({})", text, reason),
                    None => text.to_string(),
                };
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > 300 {
        format!("{}...", trimmed.chars().take(300).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// Whether an archive message says the dataset licence was not accepted.
pub(crate) fn is_licence_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    (lower.contains("licence") || lower.contains("license") || lower.contains("terms"))
        && (lower.contains("accept") || lower.contains("agree"))
}

/// Stream a response body to `path`, returning the number of bytes written.
pub(crate) async fn stream_to_file(response: Response, path: &Path) -> anyhow::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create download directory")?;
    }
    let mut file = File::create(path)
        .await
        .context("Failed to open output file")?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = chunk.context("Error reading response chunk")?;
        file.write_all(&chunk)
            .await
            .context("Error writing to file")?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    debug!(path = %path.display(), bytes = written, "Wrote response body");
    Ok(written)
}
