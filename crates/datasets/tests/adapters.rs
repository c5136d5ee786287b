//! Adapter round trips through the fake archive: plan, download, parse.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use datasets::{CdsReanalysis, DatasetAdapter, DemGrade, LandCover, PrismDem};
use test_utils::bbox::{FOUR_TILES, NETHERLANDS_TILE};
use test_utils::{
    assert_approx_eq, cds_responder, dem_responder, land_cover_responder, FakeArchiveClient,
};
use zampy_common::{ArchiveRequest, SpatialBounds, TimeBounds, VariableRegistry, ZampyError};

fn registry() -> VariableRegistry {
    VariableRegistry::builtin().unwrap()
}

fn bounds((north, east, south, west): (f64, f64, f64, f64)) -> SpatialBounds {
    SpatialBounds::new(north, east, south, west).unwrap()
}

#[tokio::test]
async fn test_era5_download_and_parse() {
    let client = Arc::new(FakeArchiveClient::with_responder(cds_responder(
        |name, time, lat, _| {
            assert_eq!(name, "t2m");
            270.0 + lat - 50.0 + f64::from(chrono::Timelike::hour(&time))
        },
    )));
    let adapter = CdsReanalysis::era5(&registry(), client.clone()).unwrap();

    let time = TimeBounds::from_strings("2020-01-01", "2020-01-02").unwrap();
    let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
    let keys = adapter
        .plan_downloads("air_temperature", &time, &bounds)
        .unwrap();
    assert_eq!(keys.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("era5.json");
    let artifact = adapter.download(&keys[0], &target).await.unwrap();
    assert_eq!(client.call_count(), 1);

    match &client.requests()[0] {
        ArchiveRequest::Cds { dataset, body } => {
            assert_eq!(dataset, "reanalysis-era5-single-levels");
            assert_eq!(body["variable"][0], "2m_temperature");
            assert_eq!(body["day"].as_array().unwrap().len(), 2);
            assert_eq!(body["time"].as_array().unwrap().len(), 24);
        }
        other => panic!("unexpected request {:?}", other),
    }

    let field = adapter.ingest(&artifact).unwrap();
    assert_eq!(field.name, "t2m");
    assert_eq!(field.units.as_deref(), Some("K"));
    assert_eq!(field.shape(), vec![48, 5, 5]);
    let lat = field.axis("latitude").unwrap();
    assert_eq!(lat.values.first(), Some(&51.0));
    // first value: hour 0, northernmost row
    assert_approx_eq!(field.values[0], 271.0, 1e-9);
}

#[tokio::test]
async fn test_era5_land_uses_its_product() {
    let client = Arc::new(FakeArchiveClient::with_responder(cds_responder(|_, _, _, _| {
        101_325.0
    })));
    let adapter = CdsReanalysis::era5_land(&registry(), client.clone()).unwrap();
    let time = TimeBounds::from_strings("2021-03-31T22:00", "2021-04-01T01:00").unwrap();
    let bounds = SpatialBounds::new(51.0, 4.0, 50.5, 3.5).unwrap();
    let keys = adapter
        .plan_downloads("surface_pressure", &time, &bounds)
        .unwrap();
    assert_eq!(keys.len(), 2);

    let dir = tempfile::tempdir().unwrap();
    for (i, key) in keys.iter().enumerate() {
        let artifact = adapter
            .download(key, &dir.path().join(format!("{}.json", i)))
            .await
            .unwrap();
        let field = adapter.ingest(&artifact).unwrap();
        assert_eq!(field.name, "sp");
        assert_eq!(field.shape()[1..], [6, 6]);
    }
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_dem_tiles_download_and_parse() {
    let client = Arc::new(FakeArchiveClient::with_responder(dem_responder(
        4,
        |lat, lon| lat + lon,
    )));
    let adapter = PrismDem::new(DemGrade::Glo90, &registry(), client.clone(), None).unwrap();

    let time = TimeBounds::from_strings("2020-01-01", "2020-01-01").unwrap();
    let keys = adapter
        .plan_downloads("elevation", &time, &bounds(FOUR_TILES))
        .unwrap();
    assert_eq!(keys.len(), 4);

    let dir = tempfile::tempdir().unwrap();
    let artifact = adapter
        .download(&keys[0], &dir.path().join("tile.asc.gz"))
        .await
        .unwrap();
    let field = adapter.ingest(&artifact).unwrap();
    assert_eq!(field.shape(), vec![4, 4]);

    let y = &field.axis("y").unwrap().values;
    let x = &field.axis("x").unwrap().values;
    assert_approx_eq!(y[0], 50.875, 1e-9);
    assert_approx_eq!(x[0], 3.125, 1e-9);
    assert_approx_eq!(field.values[0], 50.875 + 3.125, 1e-9);
}

#[tokio::test]
async fn test_missing_dem_tile_is_fatal() {
    let client = Arc::new(FakeArchiveClient::new());
    client.fail_next(ZampyError::UnsupportedRequest("404 Not Found".to_string()));
    let adapter = PrismDem::new(DemGrade::Glo30, &registry(), client, None).unwrap();

    let time = TimeBounds::from_strings("2020-01-01", "2020-01-01").unwrap();
    let bounds = SpatialBounds::new(1.0, -150.0, 0.0, -151.0).unwrap();
    let keys = adapter.plan_downloads("elevation", &time, &bounds).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let err = adapter
        .download(&keys[0], &dir.path().join("tile.asc.gz"))
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_land_cover_yearly_map() {
    let client = Arc::new(FakeArchiveClient::with_responder(land_cover_responder(
        51.0,
        4.0,
        50.0,
        3.0,
        0.25,
        |lat, _| if lat > 50.5 { 10.0 } else { 60.0 },
    )));
    let adapter = LandCover::new(&registry(), client.clone()).unwrap();

    let time = TimeBounds::new(
        Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2011, 12, 31, 23, 59, 59).unwrap(),
    )
    .unwrap();
    let keys = adapter
        .plan_downloads("land_cover", &time, &bounds(NETHERLANDS_TILE))
        .unwrap();
    assert_eq!(keys.len(), 2);

    let dir = tempfile::tempdir().unwrap();
    let artifact = adapter
        .download(&keys[0], &dir.path().join("lc.json"))
        .await
        .unwrap();
    let field = adapter.ingest(&artifact).unwrap();
    assert_eq!(field.name, "lccs_class");
    assert_eq!(field.shape(), vec![1, 4, 4]);
    assert_eq!(field.values[0], 10.0);
    assert_eq!(field.values[15], 60.0);
}
