//! Copernicus Prism DEM (GLO-30 / GLO-90) 1°×1° elevation tiles.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use zampy_common::time::parse_timestamp;
use zampy_common::{
    ArchiveClient, ArchiveRequest, ArtifactKey, DownloadArtifact, Result, SpatialBounds,
    TimeBounds, VariableRegistry, ZampyError,
};

use crate::adapter::{AccessMethod, DatasetAdapter, DatasetDescriptor, NativeField, RawFormat};
use crate::formats::read_esri_ascii;

pub const GLO30_URL: &str =
    "https://prism-dem-open.copernicus.eu/pd-desk-open-access/prismDownload/COP-DEM_GLO-30-DGED__2021_1/";
pub const GLO90_URL: &str =
    "https://prism-dem-open.copernicus.eu/pd-desk-open-access/prismDownload/COP-DEM_GLO-90-DGED__2021_1/";

/// Which product line of the DEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemGrade {
    Glo30,
    Glo90,
}

impl DemGrade {
    /// Resolution code used in tile names (arc seconds).
    fn file_code(&self) -> u32 {
        match self {
            Self::Glo30 => 10,
            Self::Glo90 => 30,
        }
    }

    fn resolution_degrees(&self) -> f64 {
        match self {
            Self::Glo30 => 1.0 / 3600.0,
            Self::Glo90 => 3.0 / 3600.0,
        }
    }
}

/// Static elevation. Time bounds are accepted but do not select data.
pub struct PrismDem {
    descriptor: DatasetDescriptor,
    grade: DemGrade,
    client: Arc<dyn ArchiveClient>,
}

impl PrismDem {
    pub fn new(
        grade: DemGrade,
        registry: &VariableRegistry,
        client: Arc<dyn ArchiveClient>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let (id, name, default_url) = match grade {
            DemGrade::Glo30 => ("prism_dem_30", "Copernicus Prism DEM GLO-30", GLO30_URL),
            DemGrade::Glo90 => ("prism_dem_90", "Copernicus Prism DEM GLO-90", GLO90_URL),
        };
        let base_url = base_url.unwrap_or_else(|| default_url.to_string());
        let native = DatasetDescriptor::native_table(registry, id);
        let descriptor = DatasetDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            variables: native.keys().cloned().collect(),
            native,
            spatial_resolution: grade.resolution_degrees(),
            temporal_resolution: None,
            // The DEM barely changes; accept any plausible recipe window.
            time_coverage: TimeBounds::new(
                parse_timestamp("1900-01-01", false)?,
                parse_timestamp("2100-12-31", true)?,
            )?,
            spatial_coverage: SpatialBounds::global(),
            access: AccessMethod::Http { base_url },
            raw_format: RawFormat::EsriAsciiGz,
            license: "free".to_string(),
            data_url: "https://spacedata.copernicus.eu/collections/copernicus-digital-elevation-model"
                .to_string(),
        };
        Ok(Self {
            descriptor,
            grade,
            client,
        })
    }

    /// Tile file name for the 1° cell with south-west corner `(lat, lon)`.
    pub fn tile_name(&self, lat: i32, lon: i32) -> String {
        let ns = if lat >= 0 { 'N' } else { 'S' };
        let ew = if lon >= 0 { 'E' } else { 'W' };
        format!(
            "Copernicus_DSM_{}_{}{:02}_00_{}{:03}_00_DEM.asc.gz",
            self.grade.file_code(),
            ns,
            lat.abs(),
            ew,
            lon.abs()
        )
    }

    fn base_url(&self) -> &str {
        match &self.descriptor.access {
            AccessMethod::Http { base_url } => base_url,
            AccessMethod::Cds { product } | AccessMethod::Ads { product } => product,
        }
    }

    pub fn request_for(&self, key: &ArtifactKey) -> ArchiveRequest {
        let lat = key.bounds.south.floor() as i32;
        let lon = key.bounds.west.floor() as i32;
        ArchiveRequest::url(format!(
            "{}/{}",
            self.base_url().trim_end_matches('/'),
            self.tile_name(lat, lon)
        ))
    }
}

#[async_trait]
impl DatasetAdapter for PrismDem {
    fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    /// One key per whole-degree tile; the key's bounds are the tile itself so
    /// that overlapping recipes share downloads.
    fn plan_downloads(
        &self,
        variable: &str,
        time: &TimeBounds,
        bounds: &SpatialBounds,
    ) -> Result<Vec<ArtifactKey>> {
        self.descriptor.check_request(variable, time, bounds)?;
        let static_window = self.descriptor.time_coverage;
        bounds
            .degree_tiles()
            .into_iter()
            .map(|(lat, lon)| {
                let tile = SpatialBounds::new(
                    f64::from(lat + 1),
                    f64::from(lon + 1),
                    f64::from(lat),
                    f64::from(lon),
                )?;
                Ok(ArtifactKey::new(&self.descriptor.id, variable, static_window, tile))
            })
            .collect()
    }

    #[instrument(skip(self, target), fields(dataset = %self.descriptor.id, key = %key))]
    async fn download(&self, key: &ArtifactKey, target: &Path) -> Result<DownloadArtifact> {
        let request = self.request_for(key);
        let bytes = self.client.retrieve(&request, target).await?;
        debug!(bytes = bytes, url = %request, "Retrieved DEM tile");
        Ok(DownloadArtifact {
            key: key.clone(),
            path: target.to_path_buf(),
        })
    }

    fn ingest(&self, artifact: &DownloadArtifact) -> Result<NativeField> {
        let native = self.descriptor.native_variable(&artifact.key.variable)?;
        let grid = read_esri_ascii(&artifact.path)?;
        if grid.values.iter().all(|v| v.is_nan()) {
            return Err(ZampyError::malformed(&artifact.path, "tile contains no data"));
        }
        Ok(grid.into_field(&native.name))
    }
}
