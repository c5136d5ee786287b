//! CF/NetCDF content in the `ncks --json` layout.
//!
//! ```json
//! {
//!   "dimensions": { "time": 2, "latitude": 3, "longitude": 4 },
//!   "variables": {
//!     "time": { "shape": ["time"], "attributes": { "units": "hours since 1900-01-01" }, "data": [...] },
//!     "t2m":  { "shape": ["time", "latitude", "longitude"],
//!               "attributes": { "units": "K", "scale_factor": 0.001, "add_offset": 270.0,
//!                               "_FillValue": -32767 },
//!               "data": [[[...]]] }
//!   }
//! }
//! ```
//!
//! Binary NetCDF files are dumped through `ncks --json` first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use zampy_common::{Result, ZampyError};

use crate::adapter::{NativeAxis, NativeField};

const PACKING_ATTRIBUTES: [&str; 4] = ["scale_factor", "add_offset", "_FillValue", "missing_value"];

#[derive(Debug, Deserialize)]
struct CfFile {
    #[serde(default)]
    dimensions: BTreeMap<String, usize>,
    #[serde(default)]
    variables: BTreeMap<String, CfVariable>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CfVariable {
    #[serde(default)]
    shape: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    data: Value,
}

/// A parsed CF-JSON document.
#[derive(Debug)]
pub struct CfDocument {
    path: PathBuf,
    file: CfFile,
}

/// Read a CF document from disk, converting binary NetCDF when needed.
pub fn read_cf_document(path: &Path) -> Result<CfDocument> {
    let bytes = std::fs::read(path)?;
    if is_binary_netcdf(&bytes) {
        let json = dump_netcdf_as_json(path)?;
        return parse_cf_json(&json, path);
    }
    parse_cf_json(&bytes, path)
}

pub fn parse_cf_json(bytes: &[u8], path: &Path) -> Result<CfDocument> {
    let file: CfFile = serde_json::from_slice(bytes)
        .map_err(|e| ZampyError::malformed(path, format!("invalid CF-JSON: {}", e)))?;
    Ok(CfDocument {
        path: path.to_path_buf(),
        file,
    })
}

fn is_binary_netcdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"CDF") || bytes.starts_with(b"\x89HDF")
}

fn dump_netcdf_as_json(path: &Path) -> Result<Vec<u8>> {
    debug!(path = %path.display(), "Dumping NetCDF with ncks");
    let output = Command::new("ncks")
        .arg("--json")
        .arg(path)
        .output()
        .map_err(|e| ZampyError::malformed(path, format!("failed to run ncks: {}", e)))?;

    if !output.status.success() {
        return Err(ZampyError::malformed(
            path,
            format!("ncks failed: {}", String::from_utf8_lossy(&output.stderr)),
        ));
    }
    Ok(output.stdout)
}

impl CfDocument {
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.file.variables.keys().map(String::as_str)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.file.variables.contains_key(name)
    }

    /// A global attribute rendered as text.
    pub fn global_attribute(&self, name: &str) -> Option<String> {
        self.file.attributes.get(name).and_then(attr_string)
    }

    /// Extract one data variable with its coordinate axes.
    pub fn field(&self, name: &str) -> Result<NativeField> {
        let var = self.file.variables.get(name).ok_or_else(|| {
            ZampyError::malformed(&self.path, format!("variable '{}' not found", name))
        })?;

        let mut axes = Vec::with_capacity(var.shape.len());
        for dim in &var.shape {
            axes.push(self.axis(dim)?);
        }

        let expected: usize = axes.iter().map(|a| a.values.len()).product();
        let values = unpack(&self.path, name, var)?;
        if values.len() != expected {
            return Err(ZampyError::malformed(
                &self.path,
                format!(
                    "variable '{}' has {} values, dimensions {:?} need {}",
                    name,
                    values.len(),
                    var.shape,
                    expected
                ),
            ));
        }

        let attributes = var
            .attributes
            .iter()
            .filter(|(k, _)| !PACKING_ATTRIBUTES.contains(&k.as_str()) && k.as_str() != "units")
            .filter_map(|(k, v)| attr_string(v).map(|s| (k.clone(), s)))
            .collect();

        Ok(NativeField {
            name: name.to_string(),
            units: var.attributes.get("units").and_then(attr_string),
            axes,
            values,
            attributes,
        })
    }

    fn axis(&self, dim: &str) -> Result<NativeAxis> {
        match self.file.variables.get(dim) {
            Some(coord) => Ok(NativeAxis {
                name: dim.to_string(),
                values: unpack(&self.path, dim, coord)?,
                units: coord.attributes.get("units").and_then(attr_string),
            }),
            None => {
                let len = self.file.dimensions.get(dim).copied().ok_or_else(|| {
                    ZampyError::malformed(&self.path, format!("unknown dimension '{}'", dim))
                })?;
                Ok(NativeAxis {
                    name: dim.to_string(),
                    values: (0..len).map(|i| i as f64).collect(),
                    units: None,
                })
            }
        }
    }
}

/// Flatten the data array and apply CF packing attributes.
fn unpack(path: &Path, name: &str, var: &CfVariable) -> Result<Vec<f64>> {
    let scale = var.attributes.get("scale_factor").and_then(attr_f64).unwrap_or(1.0);
    let offset = var.attributes.get("add_offset").and_then(attr_f64).unwrap_or(0.0);
    let fill = var.attributes.get("_FillValue").and_then(attr_f64);
    let missing = var.attributes.get("missing_value").and_then(attr_f64);

    let mut raw = Vec::new();
    flatten(&var.data, &mut raw).map_err(|msg| {
        ZampyError::malformed(path, format!("variable '{}': {}", name, msg))
    })?;

    Ok(raw
        .into_iter()
        .map(|v| match v {
            None => f64::NAN,
            Some(v) if Some(v) == fill || Some(v) == missing || v.is_nan() => f64::NAN,
            Some(v) => v * scale + offset,
        })
        .collect())
}

fn flatten(value: &Value, out: &mut Vec<Option<f64>>) -> std::result::Result<(), String> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(item, out)?;
            }
            Ok(())
        }
        Value::Number(n) => {
            out.push(n.as_f64());
            Ok(())
        }
        Value::Null => {
            out.push(None);
            Ok(())
        }
        other => Err(format!("non-numeric data value {}", other)),
    }
}

fn attr_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => items.first().and_then(attr_f64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn attr_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) if items.len() == 1 => attr_string(&items[0]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(attr_string)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}
