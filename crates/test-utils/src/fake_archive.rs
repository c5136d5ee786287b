//! Scripted in-memory archive client.
//!
//! [`FakeArchiveClient`] stands in for the CDS and HTTP clients. Each call
//! first pops a queued failure (if any), then writes whatever the responder
//! produces for the request to the target path.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use zampy_common::{ArchiveClient, ArchiveRequest, Result, ZampyError};

/// Produces the raw bytes for a request.
pub type Responder = Arc<dyn Fn(&ArchiveRequest) -> Result<Vec<u8>> + Send + Sync>;

pub struct FakeArchiveClient {
    responder: Responder,
    failures: Mutex<VecDeque<ZampyError>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ArchiveRequest>>,
    delay: Option<Duration>,
}

impl FakeArchiveClient {
    /// A client that answers every request with an empty JSON object.
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(b"{}".to_vec()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&ArchiveRequest) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next call with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: ZampyError) {
        self.failures
            .lock()
            .expect("failure queue poisoned")
            .push_back(error);
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_times(&self, n: usize) {
        for i in 0..n {
            self.fail_next(ZampyError::RemoteUnavailable(format!(
                "scripted outage {}",
                i + 1
            )));
        }
    }

    /// Number of `retrieve` calls seen, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ArchiveRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

impl Default for FakeArchiveClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveClient for FakeArchiveClient {
    async fn retrieve(&self, request: &ArchiveRequest, target: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .expect("failure queue poisoned")
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let bytes = (self.responder)(request)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}
