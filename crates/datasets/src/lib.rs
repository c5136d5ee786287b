//! Dataset adapters for zampy.
//!
//! Each remote archive family is one [`DatasetAdapter`] implementation. The
//! adapters plan artifact keys, build native archive requests and parse raw
//! files; the rest of the pipeline only sees the trait.

pub mod adapter;
pub mod cams;
pub mod catalog;
pub mod cds;
pub mod client;
pub mod formats;
pub mod land_cover;
pub mod prism_dem;

pub use adapter::{
    AccessMethod, DatasetAdapter, DatasetDescriptor, NativeAxis, NativeField, RawFormat,
};
pub use cams::CamsReanalysis;
pub use catalog::DatasetCatalog;
pub use cds::CdsReanalysis;
pub use client::{ArchiveClients, CdsClient, HttpClient, Portal};
pub use land_cover::LandCover;
pub use prism_dem::{DemGrade, PrismDem};
