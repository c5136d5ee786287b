//! Conversion of canonical grids into recipe outputs.
//!
//! Three independent transforms run on the ingested documents of one
//! (dataset, variable) pair, and the result is written only after all of
//! them succeed:
//!
//! ```text
//! IngestedDocument*  (native grid, native step, canonical units)
//!      │
//!      ├─► spatial::regrid      target grid, rule per aggregation kind
//!      │
//!      ├─► temporal::resample   frequency buckets labelled by start
//!      │
//!      └─► remap::remap         convention name, unit and sign
//!               │
//!               ▼
//!          OutputDocument (written atomically)
//! ```

pub mod engine;
pub mod remap;
pub mod spatial;
pub mod temporal;

pub use engine::{ConversionEngine, ConversionRequest};
pub use remap::{remap, Remapping};
pub use spatial::{check_upsampling, regrid, AggregationMethod, TargetGrid};
pub use temporal::resample;
