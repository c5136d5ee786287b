//! ERA5 and ERA5-Land reanalysis from the Copernicus Data Store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde_json::json;
use tracing::{debug, instrument};

use zampy_common::time::parse_timestamp;
use zampy_common::{
    ArchiveClient, ArchiveRequest, ArtifactKey, DownloadArtifact, Frequency, Result,
    SpatialBounds, TimeBounds, VariableRegistry,
};

use crate::adapter::{AccessMethod, DatasetAdapter, DatasetDescriptor, NativeField, RawFormat};
use crate::formats::read_cf_document;

/// ERA5 lags real time by about five days.
const ERA5_LATENCY_DAYS: i64 = 5;

/// Hourly single-level reanalysis, requested one calendar month at a time.
pub struct CdsReanalysis {
    descriptor: DatasetDescriptor,
    client: Arc<dyn ArchiveClient>,
}

impl CdsReanalysis {
    /// `reanalysis-era5-single-levels`, 0.25°.
    pub fn era5(registry: &VariableRegistry, client: Arc<dyn ArchiveClient>) -> Result<Self> {
        Self::build(
            "era5",
            "ERA5 hourly data on single levels",
            "reanalysis-era5-single-levels",
            0.25,
            parse_timestamp("1940-01-01", false)?,
            registry,
            client,
        )
    }

    /// `reanalysis-era5-land`, 0.1°.
    pub fn era5_land(registry: &VariableRegistry, client: Arc<dyn ArchiveClient>) -> Result<Self> {
        Self::build(
            "era5_land",
            "ERA5-Land hourly data",
            "reanalysis-era5-land",
            0.1,
            parse_timestamp("1950-01-01", false)?,
            registry,
            client,
        )
    }

    fn build(
        id: &str,
        name: &str,
        product: &str,
        resolution: f64,
        coverage_start: DateTime<Utc>,
        registry: &VariableRegistry,
        client: Arc<dyn ArchiveClient>,
    ) -> Result<Self> {
        let native = DatasetDescriptor::native_table(registry, id);
        let coverage_end = Utc::now() - Duration::days(ERA5_LATENCY_DAYS);
        let descriptor = DatasetDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            variables: native.keys().cloned().collect(),
            native,
            spatial_resolution: resolution,
            temporal_resolution: Some(Frequency::Fixed(3600)),
            time_coverage: TimeBounds::new(coverage_start, coverage_end)?,
            spatial_coverage: SpatialBounds::global(),
            access: AccessMethod::Cds {
                product: product.to_string(),
            },
            raw_format: RawFormat::CfJson,
            license: "Licence to use Copernicus Products".to_string(),
            data_url: format!(
                "https://cds.climate.copernicus.eu/datasets/{}?tab=overview",
                product
            ),
        };
        Ok(Self { descriptor, client })
    }

    fn product(&self) -> &str {
        match &self.descriptor.access {
            AccessMethod::Cds { product } | AccessMethod::Ads { product } => product,
            AccessMethod::Http { base_url } => base_url,
        }
    }

    /// The CDS request body for one monthly artifact.
    pub fn request_for(&self, key: &ArtifactKey) -> Result<ArchiveRequest> {
        let native = self.descriptor.native_variable(&key.variable)?;
        let start = key.time.start;
        let end = key.time.end;

        let days: Vec<String> = (start.day()..=end.day())
            .map(|d| format!("{:02}", d))
            .collect();
        let hours: Vec<String> = if start.date_naive() == end.date_naive() {
            (start.hour()..=end.hour()).map(|h| format!("{:02}:00", h)).collect()
        } else {
            (0..24).map(|h| format!("{:02}:00", h)).collect()
        };

        let body = json!({
            "product_type": "reanalysis",
            "variable": [native.request_name()],
            "year": format!("{}", start.year()),
            "month": format!("{:02}", start.month()),
            "day": days,
            "time": hours,
            "area": key.bounds.to_cds_area(),
            "format": "netcdf",
        });
        Ok(ArchiveRequest::cds(self.product(), body))
    }
}

#[async_trait]
impl DatasetAdapter for CdsReanalysis {
    fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    fn plan_downloads(
        &self,
        variable: &str,
        time: &TimeBounds,
        bounds: &SpatialBounds,
    ) -> Result<Vec<ArtifactKey>> {
        self.descriptor.check_request(variable, time, bounds)?;
        Ok(time
            .monthly_chunks()
            .into_iter()
            .map(|chunk| ArtifactKey::new(&self.descriptor.id, variable, chunk, *bounds))
            .collect())
    }

    #[instrument(skip(self, target), fields(dataset = %self.descriptor.id, key = %key))]
    async fn download(&self, key: &ArtifactKey, target: &Path) -> Result<DownloadArtifact> {
        let request = self.request_for(key)?;
        let bytes = self.client.retrieve(&request, target).await?;
        debug!(bytes = bytes, path = %target.display(), "Retrieved CDS artifact");
        Ok(DownloadArtifact {
            key: key.clone(),
            path: target.to_path_buf(),
        })
    }

    fn ingest(&self, artifact: &DownloadArtifact) -> Result<NativeField> {
        let native = self.descriptor.native_variable(&artifact.key.variable)?;
        let doc = read_cf_document(&artifact.path)?;
        doc.field(&native.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::FakeArchiveClient;

    fn adapter() -> CdsReanalysis {
        let registry = VariableRegistry::builtin().unwrap();
        CdsReanalysis::era5(&registry, Arc::new(FakeArchiveClient::new())).unwrap()
    }

    #[test]
    fn test_monthly_plan() {
        let a = adapter();
        let time = TimeBounds::from_strings("2020-01-30", "2020-02-02").unwrap();
        let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        let keys = a.plan_downloads("air_temperature", &time, &bounds).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].time.start, time.start);
        assert_eq!(keys[1].time.end, time.end);
    }

    #[test]
    fn test_request_body() {
        let a = adapter();
        let time = TimeBounds::from_strings("2020-01-01", "2020-01-02").unwrap();
        let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        let key = ArtifactKey::new("era5", "surface_pressure", time, bounds);
        match a.request_for(&key).unwrap() {
            ArchiveRequest::Cds { dataset, body } => {
                assert_eq!(dataset, "reanalysis-era5-single-levels");
                assert_eq!(body["variable"][0], "surface_pressure");
                assert_eq!(body["month"], "01");
                assert_eq!(body["day"].as_array().unwrap().len(), 2);
                assert_eq!(body["time"].as_array().unwrap().len(), 24);
                assert_eq!(body["area"], json!([51.0, 3.0, 50.0, 4.0]));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_variable() {
        let a = adapter();
        let time = TimeBounds::from_strings("2020-01-01", "2020-01-02").unwrap();
        let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        assert!(a.plan_downloads("elevation", &time, &bounds).is_err());
    }

    #[test]
    fn test_out_of_coverage() {
        let a = adapter();
        let time = TimeBounds::from_strings("1900-01-01", "1900-01-02").unwrap();
        let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        assert!(matches!(
            a.plan_downloads("air_temperature", &time, &bounds),
            Err(zampy_common::ZampyError::TimeOutOfCoverage { .. })
        ));
    }
}
