//! Ingestion of raw dataset artifacts.
//!
//! The [`IngestionEngine`] turns whatever an adapter parsed out of a raw
//! file into an [`zampy_common::IngestedDocument`]: canonical variable name
//! and unit, `[time][lat][lon]` layout, clipped to the artifact window.
//! Output is written atomically and contains no timestamps, so repeated
//! ingestion of the same raw file yields identical bytes.

mod ingester;
pub mod normalize;

pub use ingester::{read_ingested, IngestionEngine};
pub use normalize::{axis_role, to_cube, wrap_longitude, AxisRole};
