//! The dataset abstraction: one adapter per archive family.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use zampy_common::{
    ArtifactKey, DownloadArtifact, Frequency, NativeVariable, Result, SpatialBounds, TimeBounds,
    VariableRegistry, ZampyError,
};

/// How a dataset is fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessMethod {
    /// Copernicus Data Store product.
    Cds { product: String },
    /// Copernicus Atmosphere Data Store product (same retrieval API).
    Ads { product: String },
    /// Plain HTTP files under a base URL.
    Http { base_url: String },
}

/// File format of raw artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    /// CF/NetCDF dumped as JSON (`ncks --json` layout). Binary NetCDF is
    /// converted on read.
    CfJson,
    /// gzip-compressed ESRI ASCII grid.
    EsriAsciiGz,
}

impl RawFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::CfJson => "json",
            Self::EsriAsciiGz => "asc.gz",
        }
    }
}

/// Static facts about a dataset.
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    pub id: String,
    pub name: String,
    /// Canonical variables this dataset serves, sorted.
    pub variables: Vec<String>,
    /// Native encoding per canonical variable.
    pub native: BTreeMap<String, NativeVariable>,
    /// Native grid spacing in degrees.
    pub spatial_resolution: f64,
    /// Native time step; `None` for static datasets.
    pub temporal_resolution: Option<Frequency>,
    pub time_coverage: TimeBounds,
    pub spatial_coverage: SpatialBounds,
    pub access: AccessMethod,
    pub raw_format: RawFormat,
    pub license: String,
    pub data_url: String,
}

impl DatasetDescriptor {
    /// Collect the native encodings the registry declares for `id`.
    pub(crate) fn native_table(
        registry: &VariableRegistry,
        id: &str,
    ) -> BTreeMap<String, NativeVariable> {
        registry
            .for_dataset(id)
            .filter_map(|var| var.native_for(id).map(|n| (var.name.clone(), n.clone())))
            .collect()
    }

    pub fn supports(&self, variable: &str) -> bool {
        self.native.contains_key(variable)
    }

    pub fn native_variable(&self, variable: &str) -> Result<&NativeVariable> {
        self.native
            .get(variable)
            .ok_or_else(|| ZampyError::UnsupportedVariable {
                dataset: self.id.clone(),
                variable: variable.to_string(),
            })
    }

    /// Check that a request lies within what this dataset can deliver.
    pub fn check_request(
        &self,
        variable: &str,
        time: &TimeBounds,
        bounds: &SpatialBounds,
    ) -> Result<()> {
        self.native_variable(variable)?;
        if !self.time_coverage.covers(time) {
            return Err(ZampyError::TimeOutOfCoverage {
                dataset: self.id.clone(),
                detail: format!(
                    "requested {} to {}, available {} to {}",
                    time.start, time.end, self.time_coverage.start, self.time_coverage.end
                ),
            });
        }
        if self.spatial_coverage.intersection(bounds).is_none() {
            return Err(ZampyError::InvalidBounds(format!(
                "bounding box does not overlap the coverage of '{}'",
                self.id
            )));
        }
        Ok(())
    }
}

/// One axis of a native field.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeAxis {
    pub name: String,
    pub values: Vec<f64>,
    pub units: Option<String>,
}

/// A variable as read from a raw artifact, before any canonicalization.
///
/// `values` are unpacked (scale/offset applied, fill values as NaN) and laid
/// out row-major in `axes` order.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeField {
    pub name: String,
    /// The file's `units` attribute, if any.
    pub units: Option<String>,
    pub axes: Vec<NativeAxis>,
    pub values: Vec<f64>,
    pub attributes: BTreeMap<String, String>,
}

impl NativeField {
    pub fn axis(&self, name: &str) -> Option<&NativeAxis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.values.len()).collect()
    }
}

/// A remote dataset.
#[async_trait]
pub trait DatasetAdapter: Send + Sync {
    fn descriptor(&self) -> &DatasetDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn list_supported_variables(&self) -> Vec<String> {
        self.descriptor().variables.clone()
    }

    /// Split a request into the raw artifacts that cover it.
    fn plan_downloads(
        &self,
        variable: &str,
        time: &TimeBounds,
        bounds: &SpatialBounds,
    ) -> Result<Vec<ArtifactKey>>;

    /// Fetch one artifact and write it to `target`.
    async fn download(&self, key: &ArtifactKey, target: &Path) -> Result<DownloadArtifact>;

    /// Parse a raw artifact into its native field.
    fn ingest(&self, artifact: &DownloadArtifact) -> Result<NativeField>;
}
