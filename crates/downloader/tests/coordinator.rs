//! Download coordinator behaviour against a scripted archive.

use std::sync::Arc;
use std::time::Duration;

use datasets::{CdsReanalysis, DatasetAdapter};
use downloader::{ArtifactIndex, DownloadCoordinator, RequestMode};
use test_utils::{cds_responder, FakeArchiveClient};
use zampy_common::{
    ArtifactKey, ArtifactLayout, ArtifactStatus, DownloadSettings, KeyLocks, SpatialBounds,
    TimeBounds, VariableRegistry, ZampyError,
};

struct Harness {
    _dir: tempfile::TempDir,
    client: Arc<FakeArchiveClient>,
    adapter: Arc<dyn DatasetAdapter>,
    coordinator: DownloadCoordinator,
}

async fn harness(client: FakeArchiveClient) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(client);
    let registry = VariableRegistry::builtin().unwrap();
    let adapter: Arc<dyn DatasetAdapter> =
        Arc::new(CdsReanalysis::era5(&registry, client.clone()).unwrap());
    let settings = DownloadSettings {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        ..Default::default()
    };
    let coordinator = DownloadCoordinator::new(
        ArtifactIndex::open_memory().await.unwrap(),
        ArtifactLayout::new(dir.path()),
        Arc::new(KeyLocks::new()),
        &settings,
    );
    Harness {
        _dir: dir,
        client,
        adapter,
        coordinator,
    }
}

fn era5_client() -> FakeArchiveClient {
    FakeArchiveClient::with_responder(cds_responder(|_, _, _, _| 280.0))
}

fn keys(adapter: &dyn DatasetAdapter, start: &str, end: &str) -> Vec<ArtifactKey> {
    adapter
        .plan_downloads(
            "air_temperature",
            &TimeBounds::from_strings(start, end).unwrap(),
            &SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap(),
        )
        .unwrap()
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let h = harness(era5_client()).await;
    h.client.fail_times(2);
    let key = &keys(h.adapter.as_ref(), "2020-01-01", "2020-01-02")[0];

    let artifact = h
        .coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap();

    assert!(artifact.path.exists());
    assert!(!artifact.path.with_extension("json.partial").exists());
    assert_eq!(h.client.call_count(), 3);

    let record = h.coordinator.index().get(key).await.unwrap().unwrap();
    assert_eq!(record.status, ArtifactStatus::Complete);
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn test_complete_artifact_is_not_refetched() {
    let h = harness(era5_client()).await;
    let key = &keys(h.adapter.as_ref(), "2020-01-01", "2020-01-02")[0];

    let first = h
        .coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 1);

    let second = h
        .coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let h = harness(era5_client()).await;
    h.client.fail_next(ZampyError::AuthorizationRequired(
        "required licences not accepted".to_string(),
    ));
    let key = &keys(h.adapter.as_ref(), "2020-01-01", "2020-01-02")[0];

    let err = h
        .coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap_err();
    assert!(matches!(err, ZampyError::AuthorizationRequired(_)));
    assert_eq!(h.client.call_count(), 1);

    let record = h.coordinator.index().get(key).await.unwrap().unwrap();
    assert_eq!(record.status, ArtifactStatus::Failed);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_exhausted_retries_then_later_success() {
    let h = harness(era5_client()).await;
    h.client.fail_times(3);
    let key = &keys(h.adapter.as_ref(), "2020-01-01", "2020-01-02")[0];

    let err = h
        .coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap_err();
    match err {
        ZampyError::DownloadFailed {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, ZampyError::RemoteUnavailable(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(h.coordinator.stats().await.unwrap().failed, 1);

    // a failed artifact is retried by a later call
    h.coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 4);
    let stats = h.coordinator.stats().await.unwrap();
    assert_eq!((stats.complete, stats.failed), (1, 0));
}

#[tokio::test]
async fn test_cached_only_never_contacts_remote() {
    let h = harness(era5_client()).await;
    let key = &keys(h.adapter.as_ref(), "2020-01-01", "2020-01-02")[0];

    let err = h
        .coordinator
        .request(h.adapter.as_ref(), key, RequestMode::CachedOnly)
        .await
        .unwrap_err();
    assert!(matches!(err, ZampyError::ArtifactMissing(_)));
    assert_eq!(h.client.call_count(), 0);

    h.coordinator
        .request(h.adapter.as_ref(), key, RequestMode::Download)
        .await
        .unwrap();
    h.coordinator
        .request(h.adapter.as_ref(), key, RequestMode::CachedOnly)
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_for_one_key_fetch_once() {
    let h = harness(era5_client().with_delay(Duration::from_millis(20))).await;
    let key = &keys(h.adapter.as_ref(), "2020-01-01", "2020-01-02")[0];

    let (a, b) = tokio::join!(
        h.coordinator
            .request(h.adapter.as_ref(), key, RequestMode::Download),
        h.coordinator
            .request(h.adapter.as_ref(), key, RequestMode::Download),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(h.client.call_count(), 1);
}

#[tokio::test]
async fn test_request_all_keeps_key_order() {
    let h = harness(era5_client()).await;
    let keys = keys(h.adapter.as_ref(), "2020-01-15", "2020-04-10");
    assert_eq!(keys.len(), 4);

    let artifacts = h
        .coordinator
        .request_all(h.adapter.clone(), &keys, RequestMode::Download)
        .await
        .unwrap();
    let got: Vec<_> = artifacts.iter().map(|a| a.key.clone()).collect();
    assert_eq!(got, keys);
    assert_eq!(h.client.call_count(), 4);
    assert_eq!(h.coordinator.stats().await.unwrap().complete, 4);
}
