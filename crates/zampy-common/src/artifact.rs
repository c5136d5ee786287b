//! Artifact keys, documents and the on-disk layout.
//!
//! This module is the single place that decides where artifacts live under
//! the working directory:
//!
//! ```text
//! {working_directory}/
//! ├── zampy_index.db
//! ├── download/{dataset}/{variable}/{dataset}_{variable}_{time}_{bbox}.{ext}
//! ├── ingest/{dataset}/{variable}/{dataset}_{variable}_{time}_{bbox}.json
//! └── output/{recipe}/{dataset}_{variable}_{time}_{res}deg_{freq}.json
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bounds::SpatialBounds;
use crate::error::Result;
use crate::grid::GridCube;
use crate::time::TimeBounds;
use crate::variables::{AggregationKind, Direction};

/// Identity of one raw download: (dataset, variable, time window, spatial
/// window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub dataset: String,
    pub variable: String,
    pub time: TimeBounds,
    pub bounds: SpatialBounds,
}

impl ArtifactKey {
    pub fn new(
        dataset: impl Into<String>,
        variable: impl Into<String>,
        time: TimeBounds,
        bounds: SpatialBounds,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            variable: variable.into(),
            time,
            bounds,
        }
    }

    /// Stable string id, used as the artifact index primary key.
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.dataset,
            self.variable,
            self.time.path_component(),
            self.bounds.path_component()
        )
    }

    fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.dataset,
            self.variable,
            self.time.path_component(),
            self.bounds.path_component()
        )
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Lifecycle of a raw download in the artifact index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Complete,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A raw file fetched from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadArtifact {
    pub key: ArtifactKey,
    pub path: PathBuf,
}

/// A canonical-form file produced by the Ingestion Engine.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedArtifact {
    pub key: ArtifactKey,
    pub path: PathBuf,
}

/// A final-convention file produced by the Conversion Engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub dataset: String,
    pub variable: String,
    pub output_variable: String,
    pub path: PathBuf,
}

/// Content of an ingested artifact.
///
/// Contains no timestamps, so re-ingesting the same raw file produces the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocument {
    pub dataset: String,
    pub variable: String,
    pub units: String,
    pub kind: AggregationKind,
    pub native_variable: String,
    pub native_units: String,
    pub time_window: TimeBounds,
    pub bounds: SpatialBounds,
    /// Native time step in seconds; `None` for static fields.
    pub native_step_seconds: Option<i64>,
    pub attributes: BTreeMap<String, String>,
    pub cube: GridCube,
}

/// Content of an output artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub recipe: String,
    pub dataset: String,
    pub convention: String,
    pub variable: String,
    pub canonical_variable: String,
    pub units: String,
    pub positive: Option<Direction>,
    pub frequency: String,
    pub resolution: f64,
    pub time_window: TimeBounds,
    pub bounds: SpatialBounds,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub cube: GridCube,
}

/// Deterministic paths for every artifact stage.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            root: working_directory.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.join("download")
    }

    pub fn ingest_dir(&self) -> PathBuf {
        self.root.join("ingest")
    }

    pub fn output_dir(&self, recipe: &str) -> PathBuf {
        self.root.join("output").join(sanitize_name(recipe))
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("zampy_index.db")
    }

    pub fn raw_path(&self, key: &ArtifactKey, extension: &str) -> PathBuf {
        self.download_dir()
            .join(&key.dataset)
            .join(&key.variable)
            .join(format!("{}.{}", key.file_stem(), extension))
    }

    pub fn ingested_path(&self, key: &ArtifactKey) -> PathBuf {
        self.ingest_dir()
            .join(&key.dataset)
            .join(&key.variable)
            .join(format!("{}.json", key.file_stem()))
    }

    pub fn output_path(
        &self,
        recipe: &str,
        dataset: &str,
        variable: &str,
        time: &TimeBounds,
        resolution: f64,
        frequency: &str,
    ) -> PathBuf {
        let res = format!("{}", resolution).replace('.', "p");
        self.output_dir(recipe).join(format!(
            "{}_{}_{}_{}deg_{}.json",
            dataset,
            variable,
            time.path_component(),
            res,
            frequency
        ))
    }
}

/// Restrict a recipe name to `[A-Za-z0-9_-]` so it is safe as a directory.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "recipe".to_string()
    } else {
        cleaned
    }
}

/// Sibling temporary path used while an artifact is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `bytes` to `path` via a `.partial` sibling and a rename, so readers
/// never observe a half-written artifact.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = partial_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
