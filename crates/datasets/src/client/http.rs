//! Plain HTTP file downloads.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument};

use zampy_common::{ArchiveClient, ArchiveRequest, Result, ZampyError};

use super::{build_http_client, status_error, stream_to_file, transport_error};

/// Downloads `ArchiveRequest::Url` requests with a streaming GET.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl ArchiveClient for HttpClient {
    #[instrument(skip(self, target), fields(request = %request))]
    async fn retrieve(&self, request: &ArchiveRequest, target: &Path) -> Result<u64> {
        let url = match request {
            ArchiveRequest::Url { url } => url,
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "HTTP client cannot serve {}",
                    other
                )))
            }
        };

        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, url));
        }

        let bytes = stream_to_file(response, target)
            .await
            .map_err(|e| ZampyError::RemoteUnavailable(format!("{:#}", e)))?;
        info!(url = %url, bytes = bytes, "Downloaded file");
        Ok(bytes)
    }
}
