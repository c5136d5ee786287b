//! End-to-end recipe runs against a fake archive.

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use datasets::ArchiveClients;
use recipe::{Orchestrator, Recipe, RunOptions};
use test_utils::bbox::ANTIMERIDIAN;
use test_utils::recipes::{
    CAMS_RECIPE, ERA5_RECIPE, LAND_COVER_YEARS_RECIPE, MIXED_RECIPE, UNKNOWN_VARIABLE_RECIPE,
};
use test_utils::{
    ads_responder, assert_approx_eq, cds_responder, dem_responder, land_cover_responder,
    test_config, FakeArchiveClient,
};
use zampy_common::{ArchiveRequest, OutputDocument, ZampyError};

fn era5_client() -> Arc<FakeArchiveClient> {
    Arc::new(FakeArchiveClient::with_responder(cds_responder(
        |name, _, lat, _| match name {
            "t2m" => 270.0 + lat,
            "sp" => 100_000.0,
            "u10" => 3.0,
            _ => 0.0,
        },
    )))
}

/// Serves CDS requests like `era5_client` and DEM tiles with an elevation
/// of `100 * (lat - 50)`.
fn mixed_client() -> Arc<FakeArchiveClient> {
    let cds = cds_responder(|_, _, _, _| 3.0);
    let dem = dem_responder(8, |lat, _| 100.0 * (lat - 50.0));
    Arc::new(FakeArchiveClient::with_responder(move |request| match request {
        ArchiveRequest::Cds { .. } => cds(request),
        ArchiveRequest::Url { .. } => dem(request),
    }))
}

async fn orchestrator(dir: &Path, client: Arc<FakeArchiveClient>, options: RunOptions) -> Orchestrator {
    Orchestrator::new(&test_config(dir), ArchiveClients::uniform(client))
        .await
        .unwrap()
        .with_options(options)
}

fn read_output(path: &Path) -> OutputDocument {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_era5_recipe_produces_alma_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let client = era5_client();
    let orchestrator = orchestrator(dir.path(), client.clone(), RunOptions::default()).await;
    let recipe = Recipe::from_yaml_str(ERA5_RECIPE).unwrap();

    let report = orchestrator.run(&recipe).await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(client.call_count(), 2);
    assert_eq!(report.index.complete, 2);

    let outputs: Vec<_> = report.outputs().collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].output_variable, "Tair");
    assert_eq!(outputs[1].output_variable, "Psurf");

    let tair = read_output(&outputs[0].path);
    assert_eq!(tair.units, "kelvin");
    assert_eq!(tair.cube.time.len(), 8);
    assert_eq!(tair.cube.latitude, vec![50.0, 50.5, 51.0]);
    assert_eq!(tair.cube.time[1], Utc.with_ymd_and_hms(2020, 1, 1, 6, 0, 0).unwrap());
    // the southern bin only holds the 50.0 row
    assert_approx_eq!(tair.cube.get(0, 0, 0).unwrap(), 320.0, 1e-9);

    let psurf = read_output(&outputs[1].path);
    assert_eq!(psurf.units, "pascal");
    assert_eq!(psurf.cube.time.len(), 8);
    assert!(psurf.cube.values.iter().all(|v| (v - 100_000.0).abs() < 1e-6));
}

#[tokio::test]
async fn test_rerun_reuses_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let client = era5_client();
    let recipe = Recipe::from_yaml_str(ERA5_RECIPE).unwrap();

    let first = orchestrator(dir.path(), client.clone(), RunOptions::default())
        .await
        .run(&recipe)
        .await
        .unwrap();
    let path = first.outputs().next().unwrap().path.clone();
    let bytes = std::fs::read(&path).unwrap();

    let second = orchestrator(dir.path(), client.clone(), RunOptions::default())
        .await
        .run(&recipe)
        .await
        .unwrap();
    assert!(second.is_success());
    assert_eq!(client.call_count(), 2);
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[tokio::test]
async fn test_unknown_variable_never_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let client = era5_client();
    let orchestrator = orchestrator(dir.path(), client.clone(), RunOptions::default()).await;
    let recipe = Recipe::from_yaml_str(UNKNOWN_VARIABLE_RECIPE).unwrap();

    let err = orchestrator.run(&recipe).await.unwrap_err();
    assert!(matches!(err, ZampyError::UnknownVariable(ref v) if v == "not_a_variable"));
    assert_eq!(client.call_count(), 0);
    assert_eq!(orchestrator.index_stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_plan_rejects_bad_convert_and_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), era5_client(), RunOptions::default()).await;
    let check = |yaml: String| Recipe::from_yaml_str(&yaml).and_then(|r| orchestrator.plan(&r));

    let (n, e, s, w) = ANTIMERIDIAN;
    let wrapped = format!("bbox: [{}, {}, {}, {}]", n, e, s, w);
    let err = check(ERA5_RECIPE.replace("bbox: [51, 4, 50, 3]", &wrapped)).unwrap_err();
    assert!(matches!(err, ZampyError::InvalidBounds(_)));
    let err = check(ERA5_RECIPE.replace("frequency: 6h", "frequency: 6x")).unwrap_err();
    assert!(matches!(err, ZampyError::InvalidFrequency(_)));
    let err = check(ERA5_RECIPE.replace("resolution: 0.5", "resolution: -1")).unwrap_err();
    assert!(matches!(err, ZampyError::InvalidResolution(_)));
    let err = check(ERA5_RECIPE.replace("convention: ALMA", "convention: CMIP9")).unwrap_err();
    assert!(matches!(err, ZampyError::UnknownConvention(_)));
    let err = check(ERA5_RECIPE.replace("    era5:", "    merra2:")).unwrap_err();
    assert!(matches!(err, ZampyError::UnknownDataset(_)));
    let err = check(ERA5_RECIPE.replace("\"2020-01-02\"", "\"2090-01-02\"")).unwrap_err();
    assert!(matches!(err, ZampyError::TimeOutOfCoverage { .. }));
}

#[tokio::test]
async fn test_plan_keeps_recipe_order() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), mixed_client(), RunOptions::default()).await;
    let plan = orchestrator
        .plan(&Recipe::from_yaml_str(MIXED_RECIPE).unwrap())
        .unwrap();
    let order: Vec<_> = plan.datasets.iter().map(|d| d.dataset.as_str()).collect();
    assert_eq!(order, vec!["prism_dem_90", "era5"]);
    assert_eq!(plan.datasets[1].variables[0].arguments["height"], "10m");
    assert!(plan.key_count() >= 2);
}

#[tokio::test]
async fn test_skip_download_uses_cache_only() {
    let dir = tempfile::tempdir().unwrap();
    let client = era5_client();
    let recipe = Recipe::from_yaml_str(ERA5_RECIPE).unwrap();
    let cached_only = RunOptions {
        skip_download: true,
        ..Default::default()
    };

    let report = orchestrator(dir.path(), client.clone(), cached_only)
        .await
        .run(&recipe)
        .await
        .unwrap();
    assert!(!report.is_success());
    assert!(matches!(
        report.outcome("era5").unwrap().result,
        Err(ZampyError::ArtifactMissing(_))
    ));
    assert_eq!(client.call_count(), 0);

    orchestrator(dir.path(), client.clone(), RunOptions::default())
        .await
        .run(&recipe)
        .await
        .unwrap();
    let report = orchestrator(dir.path(), client.clone(), cached_only)
        .await
        .run(&recipe)
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_mixed_recipe() {
    let dir = tempfile::tempdir().unwrap();
    let client = mixed_client();
    let orchestrator = orchestrator(dir.path(), client, RunOptions::default()).await;
    let report = orchestrator
        .run(&Recipe::from_yaml_str(MIXED_RECIPE).unwrap())
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report);

    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

    let dem = report.outcome("prism_dem_90").unwrap().result.as_ref().unwrap();
    assert!(dem[0].path.starts_with(dir.path().join("output/mixed_recipe_1")));
    let elevation = read_output(&dem[0].path);
    assert_eq!(elevation.variable, "elevation");
    assert_eq!(elevation.units, "meter");
    assert_eq!(elevation.cube.time, vec![start]);
    // cell centres 50.0625 and 50.1875 land in the southern bin
    assert_approx_eq!(elevation.cube.get(0, 0, 0).unwrap(), 12.5, 1e-9);

    let era5 = report.outcome("era5").unwrap().result.as_ref().unwrap();
    let wind = read_output(&era5[0].path);
    assert_eq!(wind.variable, "Wind_E");
    assert_eq!(wind.cube.time, vec![start]);
    assert_eq!(wind.attributes["height"], "10m");
    assert!(wind.cube.values.iter().all(|v| (v - 3.0).abs() < 1e-9));
}

#[tokio::test]
async fn test_failing_dataset_does_not_abort_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let cds = cds_responder(|_, _, _, _| 3.0);
    let client = Arc::new(FakeArchiveClient::with_responder(move |request| match request {
        ArchiveRequest::Cds { .. } => cds(request),
        ArchiveRequest::Url { url } => Err(ZampyError::UnsupportedRequest(format!("{} not found", url))),
    }));
    let orchestrator = orchestrator(dir.path(), client, RunOptions::default()).await;

    let report = orchestrator
        .run(&Recipe::from_yaml_str(MIXED_RECIPE).unwrap())
        .await
        .unwrap();
    assert!(!report.is_success());
    assert!(report.outcome("era5").unwrap().is_success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "prism_dem_90");
    assert!(matches!(failures[0].1, ZampyError::UnsupportedRequest(_)));
    assert!(report.index.failed >= 1);
}

#[tokio::test]
async fn test_cancelled_run_reports_every_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let client = mixed_client();
    let orchestrator = orchestrator(dir.path(), client.clone(), RunOptions::default()).await;
    orchestrator.cancellation_token().cancel();

    let report = orchestrator
        .run(&Recipe::from_yaml_str(MIXED_RECIPE).unwrap())
        .await
        .unwrap();
    assert_eq!(report.failures().count(), 2);
    assert!(report
        .failures()
        .all(|(_, e)| matches!(e, ZampyError::Cancelled(stage) if stage == "download")));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_two_year_land_cover_at_year_start() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeArchiveClient::with_responder(land_cover_responder(
        51.0,
        4.0,
        50.0,
        3.0,
        0.25,
        |lat, _| if lat > 50.5 { 10.0 } else { 60.0 },
    )));
    let orchestrator = orchestrator(dir.path(), client.clone(), RunOptions::default()).await;

    let report = orchestrator
        .run(&Recipe::from_yaml_str(LAND_COVER_YEARS_RECIPE).unwrap())
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(client.call_count(), 2);

    let outputs: Vec<_> = report.outputs().collect();
    assert_eq!(outputs.len(), 1);
    let maps = read_output(&outputs[0].path);
    assert_eq!(maps.variable, "land_cover");
    assert_eq!(maps.frequency, "1YS");
    assert_eq!(
        maps.cube.time,
        vec![
            Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        ]
    );
    for t in 0..2 {
        assert_eq!(maps.cube.get(t, 0, 0), Some(60.0));
        assert_eq!(maps.cube.get(t, 2, 0), Some(10.0));
    }
}

#[tokio::test]
async fn test_cams_co2_in_ppm() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeArchiveClient::with_responder(ads_responder(|_, _, _| 6.0e-4)));
    let orchestrator = orchestrator(dir.path(), client.clone(), RunOptions::default()).await;

    let report = orchestrator
        .run(&Recipe::from_yaml_str(CAMS_RECIPE).unwrap())
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(client.call_count(), 1);
    match &client.requests()[0] {
        ArchiveRequest::Cds { dataset, body } => {
            assert_eq!(dataset, "cams-global-ghg-reanalysis-egg4");
            assert_eq!(body["date"], "2003-01-01/2003-01-02");
        }
        other => panic!("unexpected request {:?}", other),
    }

    let outputs: Vec<_> = report.outputs().collect();
    let co2 = read_output(&outputs[0].path);
    assert_eq!(co2.variable, "CO2air");
    assert_eq!(co2.units, "ppm");
    assert_eq!(co2.cube.time.len(), 2);
    assert_eq!(co2.cube.latitude, vec![51.0, 51.75, 52.5]);
    assert!(co2.cube.values.iter().all(|v| (v - 600.0).abs() < 1e-6));
}
