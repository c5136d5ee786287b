//! Recipe parsing and orchestration.
//!
//! A [`Recipe`] names datasets, variables, a time range, a bounding box and
//! an output convention. The [`Orchestrator`] validates it into an
//! [`ExecutionPlan`] and runs one pipeline per dataset:
//!
//! ```text
//! Recipe ─► plan ─┬─► dataset A: download ─► ingest ─► convert ─► outputs
//!                 └─► dataset B: download ─► ingest ─► convert ─► outputs
//! ```
//!
//! Dataset pipelines run concurrently and fail independently; the
//! [`RunReport`] lists every dataset's outcome.

mod document;
mod orchestrator;
mod plan;
mod report;

pub use document::{ConvertSpec, DatasetRequest, Recipe, VariableRequest};
pub use orchestrator::{Orchestrator, RunOptions};
pub use plan::{DatasetPlan, ExecutionPlan, VariablePlan};
pub use report::{DatasetOutcome, RunReport};
