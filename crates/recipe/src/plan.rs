//! Validated, fully resolved execution plans.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use datasets::DatasetAdapter;
use zampy_common::{ArtifactKey, Frequency, SpatialBounds, TimeBounds};

/// One variable of one dataset, with the raw artifacts that cover it.
#[derive(Debug, Clone)]
pub struct VariablePlan {
    pub variable: String,
    pub arguments: BTreeMap<String, Value>,
    pub keys: Vec<ArtifactKey>,
}

/// Everything one dataset pipeline needs.
#[derive(Clone)]
pub struct DatasetPlan {
    pub dataset: String,
    pub adapter: Arc<dyn DatasetAdapter>,
    pub variables: Vec<VariablePlan>,
}

impl fmt::Debug for DatasetPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetPlan")
            .field("dataset", &self.dataset)
            .field("variables", &self.variables)
            .finish()
    }
}

impl DatasetPlan {
    pub fn key_count(&self) -> usize {
        self.variables.iter().map(|v| v.keys.len()).sum()
    }
}

/// A recipe with every reference resolved. Datasets and variables keep
/// recipe order.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub recipe: String,
    pub time: TimeBounds,
    pub bounds: SpatialBounds,
    pub convention: String,
    pub frequency: Frequency,
    pub resolution: f64,
    pub datasets: Vec<DatasetPlan>,
}

impl ExecutionPlan {
    pub fn key_count(&self) -> usize {
        self.datasets.iter().map(DatasetPlan::key_count).sum()
    }
}
