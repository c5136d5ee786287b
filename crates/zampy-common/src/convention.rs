//! Convention Tables: how canonical variables are named and united in an
//! output convention such as ALMA.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ZampyError};
use crate::variables::Direction;

const BUILTIN_ALMA: &str = include_str!("../../../config/conventions/ALMA.yaml");

/// Output name and unit of one canonical variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConventionEntry {
    pub variable: String,
    pub units: String,
    #[serde(default)]
    pub positive: Option<Direction>,
}

/// One convention, keyed by canonical variable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConventionTable {
    pub name: String,
    pub variables: BTreeMap<String, ConventionEntry>,
}

impl ConventionTable {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let table: ConventionTable = serde_yaml::from_str(text)?;
        if table.name.trim().is_empty() {
            return Err(ZampyError::InvalidConfig(
                "convention table without a name".to_string(),
            ));
        }
        Ok(table)
    }

    pub fn entry(&self, canonical: &str) -> Option<&ConventionEntry> {
        self.variables.get(canonical)
    }
}

/// All conventions known to a run. Names match case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ConventionCatalog {
    tables: BTreeMap<String, ConventionTable>,
}

impl ConventionCatalog {
    /// Catalog with the built-in ALMA convention.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::default();
        catalog.register(ConventionTable::from_yaml_str(BUILTIN_ALMA)?);
        Ok(catalog)
    }

    /// Add or replace a convention.
    pub fn register(&mut self, table: ConventionTable) {
        let key = table.name.to_ascii_uppercase();
        if self.tables.contains_key(&key) {
            warn!(convention = %table.name, "Replacing existing convention table");
        }
        self.tables.insert(key, table);
    }

    /// Load every `*.yaml`/`*.yml` file in `dir` into the catalog.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        entries.sort();

        for path in entries {
            let text = std::fs::read_to_string(&path)?;
            let table = ConventionTable::from_yaml_str(&text)?;
            debug!(convention = %table.name, path = %path.display(), "Loaded convention table");
            self.register(table);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Look up a convention, failing with `UnknownConvention`.
    pub fn get(&self, name: &str) -> Result<&ConventionTable> {
        self.tables
            .get(&name.trim().to_ascii_uppercase())
            .ok_or_else(|| ZampyError::UnknownConvention(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.values().map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alma_builtin() {
        let catalog = ConventionCatalog::builtin().unwrap();
        let alma = catalog.get("alma").unwrap();
        let tair = alma.entry("air_temperature").unwrap();
        assert_eq!(tair.variable, "Tair");
        assert_eq!(tair.units, "kelvin");
        assert_eq!(alma.entry("surface_pressure").unwrap().variable, "Psurf");
    }

    #[test]
    fn test_unknown_convention() {
        let catalog = ConventionCatalog::builtin().unwrap();
        assert!(matches!(
            catalog.get("CMIP9"),
            Err(ZampyError::UnknownConvention(_))
        ));
    }
}
