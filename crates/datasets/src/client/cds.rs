//! Copernicus Data Store retrieval client.
//!
//! The Atmosphere Data Store speaks the same API, so one client type serves
//! both portals. A retrieval is a three-step exchange:
//! 1. `POST {url}/resources/{product}` with the request body
//! 2. `GET {url}/tasks/{request_id}` until the task is `completed`
//! 3. `GET {location}` to stream the result

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use zampy_common::{ArchiveClient, ArchiveCredentials, ArchiveRequest, Result, ZampyError};

use super::{
    build_http_client, is_licence_message, status_error, stream_to_file, transport_error,
};

const INITIAL_POLL_DELAY: Duration = Duration::from_secs(1);
const MAX_POLL_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TaskReply {
    #[serde(default)]
    state: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    error: Option<TaskError>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
}

/// A Copernicus data portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Portal {
    /// Climate Data Store.
    Cds,
    /// Atmosphere Data Store.
    Ads,
}

impl Portal {
    /// Key of the credentials entry in `zampy_config.yml`.
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Cds => "cds",
            Self::Ads => "ads",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Cds => "CDS",
            Self::Ads => "ADS",
        }
    }

    fn site(&self) -> &'static str {
        match self {
            Self::Cds => "https://cds.climate.copernicus.eu",
            Self::Ads => "https://ads.atmosphere.copernicus.eu",
        }
    }
}

/// Client for the CDS (or ADS) retrieval API.
pub struct CdsClient {
    client: Client,
    portal: Portal,
    url: Option<String>,
    key: Option<String>,
}

impl CdsClient {
    /// Build a CDS client. Missing credentials are reported on first use, so
    /// a recipe that needs no CDS data runs without them.
    pub fn new(credentials: Option<&ArchiveCredentials>, timeout: Duration) -> Result<Self> {
        Self::for_portal(Portal::Cds, credentials, timeout)
    }

    pub fn for_portal(
        portal: Portal,
        credentials: Option<&ArchiveCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            portal,
            url: credentials.map(|c| c.url.trim_end_matches('/').to_string()),
            key: credentials.and_then(|c| c.key.clone()),
        })
    }

    fn base_url(&self) -> Result<&str> {
        self.url.as_deref().ok_or_else(|| {
            ZampyError::AuthorizationRequired(format!(
                "no {} credentials configured; add a `{}: {{url, key}}` entry to zampy_config.yml",
                self.portal.label(),
                self.portal.config_key()
            ))
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let key = self.key.as_deref().ok_or_else(|| {
            ZampyError::AuthorizationRequired(format!(
                "no {} API key configured",
                self.portal.label()
            ))
        })?;
        Ok(match key.split_once(':') {
            Some((uid, secret)) => builder.basic_auth(uid, Some(secret)),
            None => builder.header("PRIVATE-TOKEN", key),
        })
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<TaskReply> {
        let response = self.authorize(builder)?.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body, context));
        }
        serde_json::from_str(&body).map_err(|e| {
            ZampyError::RemoteUnavailable(format!("{}: unreadable task reply: {}", context, e))
        })
    }

    fn task_failure(&self, product: &str, error: Option<TaskError>) -> ZampyError {
        let (message, reason) = error
            .map(|e| (e.message, e.reason))
            .unwrap_or_else(|| ("task failed".to_string(), String::new()));
        let text = if reason.is_empty() {
            message
        } else {
            format!("{} ({})", message, reason)
        };
        if is_licence_message(&text) {
            ZampyError::AuthorizationRequired(format!(
                "{}: {}. Accept the licence at {}/datasets/{}?tab=download",
                product,
                text,
                self.portal.site(),
                product
            ))
        } else {
            ZampyError::UnsupportedRequest(format!("{}: {}", product, text))
        }
    }

    fn resolve_location(&self, base: &str, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", base, location.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl ArchiveClient for CdsClient {
    #[instrument(skip(self, target), fields(request = %request))]
    async fn retrieve(&self, request: &ArchiveRequest, target: &Path) -> Result<u64> {
        let (product, body) = match request {
            ArchiveRequest::Cds { dataset, body } => (dataset.as_str(), body),
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "{} client cannot serve {}",
                    self.portal.label(),
                    other
                )))
            }
        };
        let base = self.base_url()?.to_string();

        let submit = self
            .client
            .post(format!("{}/resources/{}", base, product))
            .json(body);
        let mut reply = self.send(submit, product).await?;
        info!(portal = self.portal.label(), product = %product, state = %reply.state, "Submitted retrieval request");

        let mut delay = INITIAL_POLL_DELAY;
        loop {
            match reply.state.as_str() {
                "completed" => break,
                "failed" => return Err(self.task_failure(product, reply.error)),
                "queued" | "running" | "accepted" => {}
                other => {
                    warn!(state = %other, "Unexpected task state, continuing to poll");
                }
            }

            let request_id = reply.request_id.clone().ok_or_else(|| {
                ZampyError::RemoteUnavailable(format!("{}: task reply without request_id", product))
            })?;
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay.mul_f64(1.5), MAX_POLL_DELAY);

            let poll = self.client.get(format!("{}/tasks/{}", base, request_id));
            reply = self.send(poll, product).await?;
            debug!(request_id = %request_id, state = %reply.state, "Polled retrieval task");
        }

        let location = reply.location.ok_or_else(|| {
            ZampyError::RemoteUnavailable(format!("{}: completed task without location", product))
        })?;
        let url = self.resolve_location(&base, &location);

        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, &url));
        }
        let bytes = stream_to_file(response, target)
            .await
            .map_err(|e| ZampyError::RemoteUnavailable(format!("{:#}", e)))?;

        info!(portal = self.portal.label(), product = %product, bytes = bytes, "Downloaded retrieval result");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credentials_is_authorization_error() {
        let client = CdsClient::new(None, Duration::from_secs(5)).unwrap();
        let request = ArchiveRequest::cds("reanalysis-era5-single-levels", serde_json::json!({}));
        let dir = tempfile::tempdir().unwrap();
        let err = client
            .retrieve(&request, &dir.path().join("out.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ZampyError::AuthorizationRequired(_)));
    }

    #[test]
    fn test_licence_failure_is_fatal_with_url() {
        let client = CdsClient::new(None, Duration::from_secs(5)).unwrap();
        let err = client.task_failure(
            "satellite-land-cover",
            Some(TaskError {
                message: "required licences not accepted".to_string(),
                reason: String::new(),
            }),
        );
        match err {
            ZampyError::AuthorizationRequired(msg) => {
                assert!(msg.contains(
                    "https://cds.climate.copernicus.eu/datasets/satellite-land-cover?tab=download"
                ))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ads_errors_name_the_ads_portal() {
        let client = CdsClient::for_portal(Portal::Ads, None, Duration::from_secs(5)).unwrap();
        let request = ArchiveRequest::cds("cams-global-ghg-reanalysis-egg4", serde_json::json!({}));
        let dir = tempfile::tempdir().unwrap();
        match client.retrieve(&request, &dir.path().join("out.json")).await {
            Err(ZampyError::AuthorizationRequired(msg)) => {
                assert!(msg.contains("no ADS credentials"));
                assert!(msg.contains("`ads: {url, key}`"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = client.task_failure(
            "cams-global-ghg-reanalysis-egg4",
            Some(TaskError {
                message: "required licences not accepted".to_string(),
                reason: String::new(),
            }),
        );
        match err {
            ZampyError::AuthorizationRequired(msg) => assert!(msg.contains(
                "https://ads.atmosphere.copernicus.eu/datasets/cams-global-ghg-reanalysis-egg4?tab=download"
            )),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_relative_location() {
        let client = CdsClient::new(
            Some(&ArchiveCredentials {
                url: "https://cds.example.org/api/v2/".to_string(),
                key: Some("1:abc".to_string()),
            }),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.resolve_location("https://cds.example.org/api/v2", "/download/x.nc"),
            "https://cds.example.org/api/v2/download/x.nc"
        );
        assert_eq!(
            client.resolve_location("https://cds.example.org/api/v2", "https://dl.example.org/x.nc"),
            "https://dl.example.org/x.nc"
        );
    }
}
