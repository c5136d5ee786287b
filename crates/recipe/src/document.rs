//! The recipe YAML document.
//!
//! ```yaml
//! name: "era5_recipe"
//! download:
//!   time: ["2020-01-01", "2020-01-02"]   # or years: [2020, 2020]
//!   bbox: [51, 4, 50, 3]                  # N, E, S, W
//!   datasets:
//!     era5:
//!       variables:
//!         - air_temperature
//!         - eastward_component_of_wind: {height: "10m"}
//! convert:
//!   convention: ALMA
//!   frequency: 6h
//!   resolution: 0.5
//! ```
//!
//! Parsing checks structure and timestamps only. Everything that needs the
//! registries (variables, datasets, conventions, bounds, frequency) is
//! validated when the orchestrator plans the run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use zampy_common::{Result, TimeBounds, ZampyError};

/// One requested variable with its optional extra arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRequest {
    pub name: String,
    pub arguments: BTreeMap<String, Value>,
}

/// The variables requested from one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRequest {
    pub dataset: String,
    pub variables: Vec<VariableRequest>,
}

/// The `convert` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSpec {
    pub convention: String,
    pub frequency: String,
    pub resolution: f64,
}

/// A parsed recipe. Datasets keep document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub time: TimeBounds,
    /// `[N, E, S, W]` as written.
    pub bbox: Vec<f64>,
    pub datasets: Vec<DatasetRequest>,
    pub convert: ConvertSpec,
}

#[derive(Debug, Deserialize)]
struct RecipeFile {
    name: Option<String>,
    download: Option<DownloadSection>,
    convert: Option<ConvertSection>,
}

#[derive(Debug, Deserialize)]
struct DownloadSection {
    #[serde(default)]
    years: Option<Vec<i32>>,
    #[serde(default)]
    time: Option<Vec<String>>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    datasets: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Deserialize)]
struct ConvertSection {
    convention: Option<String>,
    frequency: Option<String>,
    resolution: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DatasetSection {
    #[serde(default)]
    variables: Vec<VariableEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VariableEntry {
    Name(String),
    WithArguments(BTreeMap<String, Option<BTreeMap<String, Value>>>),
}

fn invalid(message: impl Into<String>) -> ZampyError {
    ZampyError::InvalidRecipe(message.into())
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: RecipeFile = serde_yaml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let name = file
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| invalid("missing 'name'"))?;
        let download = file.download.ok_or_else(|| invalid("missing 'download' section"))?;
        let convert = file.convert.ok_or_else(|| invalid("missing 'convert' section"))?;

        let time = match (&download.years, &download.time) {
            (Some(years), None) => match years.as_slice() {
                [start, end] => TimeBounds::from_years(*start, *end)?,
                _ => return Err(invalid("'years' must be [start_year, end_year]")),
            },
            (None, Some(time)) => match time.as_slice() {
                [start, end] => TimeBounds::from_strings(start, end)?,
                _ => return Err(invalid("'time' must be [start, end]")),
            },
            (Some(_), Some(_)) => return Err(invalid("give either 'years' or 'time', not both")),
            (None, None) => return Err(invalid("missing 'download.years' or 'download.time'")),
        };

        let bbox = download
            .bbox
            .ok_or_else(|| invalid("missing 'download.bbox'"))?;
        let datasets = parse_datasets(
            download
                .datasets
                .ok_or_else(|| invalid("missing 'download.datasets'"))?,
        )?;

        let convert = ConvertSpec {
            convention: convert
                .convention
                .ok_or_else(|| invalid("missing 'convert.convention'"))?,
            frequency: convert
                .frequency
                .ok_or_else(|| invalid("missing 'convert.frequency'"))?,
            resolution: convert
                .resolution
                .ok_or_else(|| invalid("missing 'convert.resolution'"))?,
        };

        Ok(Recipe {
            name,
            time,
            bbox,
            datasets,
            convert,
        })
    }

    /// Total number of requested (dataset, variable) pairs.
    pub fn variable_count(&self) -> usize {
        self.datasets.iter().map(|d| d.variables.len()).sum()
    }
}

fn parse_datasets(mapping: serde_yaml::Mapping) -> Result<Vec<DatasetRequest>> {
    if mapping.is_empty() {
        return Err(invalid("'download.datasets' is empty"));
    }
    let mut datasets = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let dataset = key
            .as_str()
            .ok_or_else(|| invalid("dataset names must be strings"))?
            .to_string();
        let section: DatasetSection = serde_yaml::from_value(value)
            .map_err(|e| invalid(format!("dataset '{}': {}", dataset, e)))?;

        let mut variables = Vec::with_capacity(section.variables.len());
        for entry in section.variables {
            match entry {
                VariableEntry::Name(name) => variables.push(VariableRequest {
                    name,
                    arguments: BTreeMap::new(),
                }),
                VariableEntry::WithArguments(map) => {
                    for (name, arguments) in map {
                        variables.push(VariableRequest {
                            name,
                            arguments: arguments.unwrap_or_default(),
                        });
                    }
                }
            }
        }
        if variables.is_empty() {
            return Err(invalid(format!("dataset '{}' requests no variables", dataset)));
        }
        datasets.push(DatasetRequest { dataset, variables });
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::recipes::{ERA5_RECIPE, MIXED_RECIPE, UNKNOWN_VARIABLE_RECIPE};

    #[test]
    fn test_parse_era5_recipe() {
        let recipe = Recipe::from_yaml_str(ERA5_RECIPE).unwrap();
        assert_eq!(recipe.name, "era5_recipe");
        assert_eq!(recipe.bbox, vec![51.0, 4.0, 50.0, 3.0]);
        assert_eq!(recipe.datasets.len(), 1);
        let names: Vec<_> = recipe.datasets[0].variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["air_temperature", "surface_pressure"]);
        assert_eq!(recipe.convert.frequency, "6h");
        assert_eq!(recipe.convert.resolution, 0.5);
        assert_eq!(recipe.time.end.to_rfc3339(), "2020-01-02T23:59:59+00:00");
    }

    #[test]
    fn test_years_cover_whole_years() {
        let recipe = Recipe::from_yaml_str(UNKNOWN_VARIABLE_RECIPE).unwrap();
        assert_eq!(recipe.time.start.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert_eq!(recipe.time.end.to_rfc3339(), "2020-12-31T23:59:00+00:00");
        assert_eq!(recipe.variable_count(), 2);
    }

    #[test]
    fn test_dataset_order_and_arguments() {
        let recipe = Recipe::from_yaml_str(MIXED_RECIPE).unwrap();
        let order: Vec<_> = recipe.datasets.iter().map(|d| d.dataset.as_str()).collect();
        assert_eq!(order, vec!["prism_dem_90", "era5"]);
        let wind = &recipe.datasets[1].variables[0];
        assert_eq!(wind.name, "eastward_component_of_wind");
        assert_eq!(wind.arguments["height"], "10m");
    }

    #[test]
    fn test_missing_sections() {
        let err = Recipe::from_yaml_str("name: x\nconvert: {convention: ALMA, frequency: 1D, resolution: 1}\n")
            .unwrap_err();
        assert!(matches!(err, ZampyError::InvalidRecipe(m) if m.contains("download")));

        let no_resolution = ERA5_RECIPE.replace("  resolution: 0.5\n", "");
        let err = Recipe::from_yaml_str(&no_resolution).unwrap_err();
        assert!(matches!(err, ZampyError::InvalidRecipe(m) if m.contains("resolution")));
    }

    #[test]
    fn test_bad_timestamp_names_expected_format() {
        let bad = ERA5_RECIPE.replace("\"2020-01-01\"", "\"2020-1-01\"");
        let err = Recipe::from_yaml_str(&bad).unwrap_err();
        assert!(matches!(err, ZampyError::InvalidRecipe(m) if m.contains("YYYY-MM-DD")));
    }

    #[test]
    fn test_years_and_time_are_exclusive() {
        let both = ERA5_RECIPE.replace("  bbox:", "  years: [2020, 2020]\n  bbox:");
        assert!(Recipe::from_yaml_str(&both).is_err());
    }
}
