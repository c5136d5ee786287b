//! Variable Registry: canonical variables, their units, aggregation kinds and
//! native names per dataset.
//!
//! The registry is plain data loaded from YAML (`config/variables.yaml` is
//! compiled in as the default). It is immutable once built and shared behind
//! an `Arc`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ZampyError};
use crate::units::LinearTransform;

const BUILTIN_VARIABLES: &str = include_str!("../../../config/variables.yaml");

/// How a quantity must be aggregated when resampled in space or time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Point-in-time state (temperature, pressure, wind). Averaged.
    Instantaneous,
    /// Flux accumulated over the native step, stored as a rate. Summed over
    /// time, area-weighted in space.
    Accumulated,
    /// Quantity already averaged over its cell (elevation, LAI). Averaged.
    IntensiveAverage,
    /// Class codes (land cover). Mode in space, never interpolated.
    Categorical,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instantaneous => "instantaneous",
            Self::Accumulated => "accumulated",
            Self::IntensiveAverage => "intensive_average",
            Self::Categorical => "categorical",
        }
    }
}

/// Sign convention of a directional flux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// How one dataset names and encodes a canonical variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeVariable {
    /// Variable name inside the raw artifact (e.g. `t2m`).
    pub name: String,
    /// Effective native unit. Used when the file declares no units, declares
    /// this same unit, or declares one of `file_units`.
    #[serde(default)]
    pub unit: Option<String>,
    /// `units` attributes the archive writes for this variable that are
    /// ambiguous on their own (ERA5 writes `J m**-2` for hourly
    /// accumulations) and mean `unit`.
    #[serde(default)]
    pub file_units: Vec<String>,
    /// Name used when requesting the variable from the archive.
    #[serde(default)]
    pub request: Option<String>,
}

impl NativeVariable {
    pub fn request_name(&self) -> &str {
        self.request.as_deref().unwrap_or(&self.name)
    }

    /// Whether a file `units` attribute stands for the declared native unit.
    pub fn is_alias(&self, file_unit: &str) -> bool {
        let file_unit = file_unit.trim();
        self.unit.as_deref().map(str::trim) == Some(file_unit)
            || self.file_units.iter().any(|u| u.trim() == file_unit)
    }
}

/// A canonical zampy variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVariable {
    #[serde(skip_deserializing, default)]
    pub name: String,
    pub unit: String,
    pub kind: AggregationKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub positive: Option<Direction>,
    /// Units this variable may arrive in, with the transform into `unit`.
    #[serde(default)]
    pub accepted_units: BTreeMap<String, LinearTransform>,
    /// Native encodings keyed by dataset id.
    #[serde(default)]
    pub native: BTreeMap<String, NativeVariable>,
}

impl CanonicalVariable {
    /// Transform from `unit` into the canonical unit.
    pub fn to_canonical(&self, unit: &str) -> Result<LinearTransform> {
        let unit = unit.trim();
        if unit == self.unit {
            return Ok(LinearTransform::IDENTITY);
        }
        self.accepted_units
            .get(unit)
            .copied()
            .ok_or_else(|| ZampyError::UnsupportedUnitConversion {
                variable: self.name.clone(),
                from: unit.to_string(),
                to: self.unit.clone(),
            })
    }

    /// Transform from the canonical unit into `unit`.
    pub fn from_canonical(&self, unit: &str) -> Result<LinearTransform> {
        let forward = self.to_canonical(unit).map_err(|_| {
            ZampyError::UnsupportedUnitConversion {
                variable: self.name.clone(),
                from: self.unit.clone(),
                to: unit.to_string(),
            }
        })?;
        forward
            .inverse()
            .ok_or_else(|| ZampyError::UnsupportedUnitConversion {
                variable: self.name.clone(),
                from: self.unit.clone(),
                to: unit.to_string(),
            })
    }

    pub fn native_for(&self, dataset: &str) -> Option<&NativeVariable> {
        self.native.get(&normalize_dataset_id(dataset))
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    variables: BTreeMap<String, CanonicalVariable>,
}

/// Immutable lookup of canonical variables.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: BTreeMap<String, CanonicalVariable>,
}

impl VariableRegistry {
    /// The registry shipped with zampy.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_VARIABLES)
    }

    /// Load a registry file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: RegistryFile = serde_yaml::from_str(text)?;
        let mut variables = BTreeMap::new();

        for (name, mut var) in file.variables {
            var.name = name.clone();
            var.native = var
                .native
                .into_iter()
                .map(|(dataset, native)| (normalize_dataset_id(&dataset), native))
                .collect();

            for (unit, transform) in &var.accepted_units {
                if transform.inverse().is_none() {
                    return Err(ZampyError::InvalidConfig(format!(
                        "variable '{}': conversion from '{}' has zero scale",
                        name, unit
                    )));
                }
            }
            for (dataset, native) in &var.native {
                if let Some(unit) = &native.unit {
                    var.to_canonical(unit).map_err(|_| {
                        ZampyError::InvalidConfig(format!(
                            "variable '{}': native unit '{}' of dataset '{}' is not an accepted unit",
                            name, unit, dataset
                        ))
                    })?;
                }
            }
            variables.insert(name, var);
        }

        debug!(count = variables.len(), "Loaded variable registry");
        Ok(Self { variables })
    }

    pub fn get(&self, name: &str) -> Option<&CanonicalVariable> {
        self.variables.get(name)
    }

    /// Look up a variable, failing with `UnknownVariable`.
    pub fn require(&self, name: &str) -> Result<&CanonicalVariable> {
        self.get(name)
            .ok_or_else(|| ZampyError::UnknownVariable(name.to_string()))
    }

    /// Canonical variables with a native encoding in `dataset`.
    pub fn for_dataset<'a>(
        &'a self,
        dataset: &'a str,
    ) -> impl Iterator<Item = &'a CanonicalVariable> + 'a {
        let dataset = normalize_dataset_id(dataset);
        self.variables
            .values()
            .filter(move |v| v.native.contains_key(&dataset))
    }

    /// Find the canonical variable a dataset's native name maps to.
    pub fn canonical_for_native(&self, dataset: &str, native_name: &str) -> Option<&CanonicalVariable> {
        let dataset = normalize_dataset_id(dataset);
        self.variables.values().find(|v| {
            v.native
                .get(&dataset)
                .map(|n| n.name == native_name)
                .unwrap_or(false)
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Dataset ids are case-insensitive and treat `-` and `_` alike.
pub fn normalize_dataset_id(id: &str) -> String {
    id.trim().to_ascii_lowercase().replace('-', "_")
}
