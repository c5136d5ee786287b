//! Common types shared by every zampy crate.

pub mod archive;
pub mod artifact;
pub mod bounds;
pub mod config;
pub mod convention;
pub mod error;
pub mod grid;
pub mod locks;
pub mod time;
pub mod units;
pub mod variables;

pub use archive::{ArchiveClient, ArchiveRequest};
pub use artifact::{
    ArtifactKey, ArtifactLayout, ArtifactStatus, DownloadArtifact, IngestedArtifact,
    IngestedDocument, OutputArtifact, OutputDocument,
};
pub use bounds::SpatialBounds;
pub use config::{ArchiveCredentials, DownloadSettings, ZampyConfig};
pub use convention::{ConventionCatalog, ConventionEntry, ConventionTable};
pub use error::{ErrorCategory, Result, ZampyError};
pub use grid::GridCube;
pub use locks::KeyLocks;
pub use time::{Frequency, TimeBounds};
pub use units::LinearTransform;
pub use variables::{
    normalize_dataset_id, AggregationKind, CanonicalVariable, Direction, NativeVariable,
    VariableRegistry,
};
