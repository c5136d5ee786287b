//! CAMS global greenhouse gas reanalysis (EGG4) from the Atmosphere Data
//! Store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use zampy_common::time::parse_timestamp;
use zampy_common::{
    ArchiveClient, ArchiveRequest, ArtifactKey, DownloadArtifact, Frequency, Result,
    SpatialBounds, TimeBounds, VariableRegistry,
};

use crate::adapter::{AccessMethod, DatasetAdapter, DatasetDescriptor, NativeField, RawFormat};
use crate::formats::read_cf_document;

const PRODUCT: &str = "cams-global-ghg-reanalysis-egg4";

/// Model level 60 is the lowest level of the 60-level EGG4 grid.
const SURFACE_MODEL_LEVEL: &str = "60";

/// Forecast steps (hours) of the 3-hourly analysis cycle.
const STEPS: [&str; 8] = ["0", "3", "6", "9", "12", "15", "18", "21"];

/// 3-hourly near-surface CO2, requested one calendar month at a time.
pub struct CamsReanalysis {
    descriptor: DatasetDescriptor,
    client: Arc<dyn ArchiveClient>,
}

impl CamsReanalysis {
    pub fn new(registry: &VariableRegistry, client: Arc<dyn ArchiveClient>) -> Result<Self> {
        let id = "cams_co2";
        let native = DatasetDescriptor::native_table(registry, id);
        let descriptor = DatasetDescriptor {
            id: id.to_string(),
            name: "CAMS global greenhouse gas reanalysis (EGG4)".to_string(),
            variables: native.keys().cloned().collect(),
            native,
            spatial_resolution: 0.75,
            temporal_resolution: Some(Frequency::Fixed(3 * 3600)),
            time_coverage: TimeBounds::new(
                parse_timestamp("2003-01-01", false)?,
                parse_timestamp("2020-12-31", true)?,
            )?,
            spatial_coverage: SpatialBounds::global(),
            access: AccessMethod::Ads {
                product: PRODUCT.to_string(),
            },
            raw_format: RawFormat::CfJson,
            license: "Licence to use Copernicus Products".to_string(),
            data_url: format!(
                "https://ads.atmosphere.copernicus.eu/datasets/{}?tab=overview",
                PRODUCT
            ),
        };
        Ok(Self { descriptor, client })
    }

    /// The ADS request body for one monthly artifact. The archive serves
    /// whole days, every 3-hourly step.
    pub fn request_for(&self, key: &ArtifactKey) -> Result<ArchiveRequest> {
        let native = self.descriptor.native_variable(&key.variable)?;
        let body = json!({
            "model_level": SURFACE_MODEL_LEVEL,
            "variable": [native.request_name()],
            "date": format!(
                "{}/{}",
                key.time.start.format("%Y-%m-%d"),
                key.time.end.format("%Y-%m-%d")
            ),
            "step": STEPS,
            "area": key.bounds.to_cds_area(),
            "format": "netcdf",
        });
        Ok(ArchiveRequest::cds(PRODUCT, body))
    }
}

#[async_trait]
impl DatasetAdapter for CamsReanalysis {
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
        debug!(bytes = bytes, path = %target.display(), "Retrieved ADS artifact");
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
