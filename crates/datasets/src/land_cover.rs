//! ESA CCI land cover classification maps (`satellite-land-cover`).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use serde_json::json;
use tracing::{debug, instrument};

use zampy_common::{
    ArchiveClient, ArchiveRequest, ArtifactKey, DownloadArtifact, Frequency, Result,
    SpatialBounds, TimeBounds, VariableRegistry,
};

use crate::adapter::{AccessMethod, DatasetAdapter, DatasetDescriptor, NativeField, RawFormat};
use crate::formats::read_cf_document;

const PRODUCT: &str = "satellite-land-cover";

/// Last year produced with the v2.0.7 processing chain.
const LAST_V207_YEAR: i32 = 2015;

/// Yearly 300 m land cover maps, one artifact per calendar year.
pub struct LandCover {
    descriptor: DatasetDescriptor,
    client: Arc<dyn ArchiveClient>,
}

impl LandCover {
    pub fn new(registry: &VariableRegistry, client: Arc<dyn ArchiveClient>) -> Result<Self> {
        let id = "land_cover";
        let native = DatasetDescriptor::native_table(registry, id);
        let descriptor = DatasetDescriptor {
            id: id.to_string(),
            name: "Land cover classification gridded maps".to_string(),
            variables: native.keys().cloned().collect(),
            native,
            spatial_resolution: 1.0 / 360.0,
            temporal_resolution: Some(Frequency::Years(1)),
            time_coverage: TimeBounds::from_years(1992, 2022)?,
            spatial_coverage: SpatialBounds::global(),
            access: AccessMethod::Cds {
                product: PRODUCT.to_string(),
            },
            raw_format: RawFormat::CfJson,
            license: "ESA CCI licence; licence-to-use-copernicus-products; VITO licence"
                .to_string(),
            data_url: format!("https://cds.climate.copernicus.eu/datasets/{}", PRODUCT),
        };
        Ok(Self { descriptor, client })
    }

    /// The CDS request body for one yearly map.
    pub fn request_for(&self, key: &ArtifactKey) -> Result<ArchiveRequest> {
        let native = self.descriptor.native_variable(&key.variable)?;
        let year = key.time.start.year();
        let version = if year <= LAST_V207_YEAR {
            "v2_0_7cds"
        } else {
            "v2_1_1"
        };
        let body = json!({
            "variable": native.request_name(),
            "year": [year.to_string()],
            "version": [version],
            "format": "netcdf",
            "download_format": "unarchived",
        });
        Ok(ArchiveRequest::cds(PRODUCT, body))
    }
}

#[async_trait]
impl DatasetAdapter for LandCover {
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
            .yearly_chunks()
            .into_iter()
            .map(|chunk| ArtifactKey::new(&self.descriptor.id, variable, chunk, *bounds))
            .collect())
    }

    #[instrument(skip(self, target), fields(dataset = %self.descriptor.id, key = %key))]
    async fn download(&self, key: &ArtifactKey, target: &Path) -> Result<DownloadArtifact> {
        let request = self.request_for(key)?;
        let bytes = self.client.retrieve(&request, target).await?;
        debug!(bytes = bytes, "Retrieved land cover map");
        Ok(DownloadArtifact {
            key: key.clone(),
            path: target.to_path_buf(),
        })
    }

    fn ingest(&self, artifact: &DownloadArtifact) -> Result<NativeField> {
        let native = self.descriptor.native_variable(&artifact.key.variable)?;
        read_cf_document(&artifact.path)?.field(&native.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::FakeArchiveClient;

    fn adapter() -> LandCover {
        let registry = VariableRegistry::builtin().unwrap();
        LandCover::new(&registry, Arc::new(FakeArchiveClient::new())).unwrap()
    }

    #[test]
    fn test_yearly_plan() {
        let a = adapter();
        let time = TimeBounds::from_years(2010, 2012).unwrap();
        let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        let keys = a.plan_downloads("land_cover", &time, &bounds).unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_version_by_year() {
        let a = adapter();
        let bounds = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        let old = ArtifactKey::new("land_cover", "land_cover", TimeBounds::from_years(2010, 2010).unwrap(), bounds);
        let new = ArtifactKey::new("land_cover", "land_cover", TimeBounds::from_years(2018, 2018).unwrap(), bounds);
        let version = |key: &ArtifactKey| match a.request_for(key).unwrap() {
            ArchiveRequest::Cds { body, .. } => body["version"][0].as_str().unwrap().to_string(),
            _ => unreachable!(),
        };
        assert_eq!(version(&old), "v2_0_7cds");
        assert_eq!(version(&new), "v2_1_1");
    }
}
