//! ESRI ASCII grids, optionally gzip-compressed.
//!
//! ```text
//! ncols        4
//! nrows        3
//! xllcorner    3.0
//! yllcorner    50.0
//! cellsize     0.25
//! NODATA_value -9999
//! 1 2 3 4
//! ...
//! ```
//!
//! The first data row is the northernmost.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;

use zampy_common::{Result, ZampyError};

use crate::adapter::{NativeAxis, NativeField};

/// A decoded ASCII grid. Coordinates are cell centres.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiGrid {
    pub ncols: usize,
    pub nrows: usize,
    /// Centre longitude of the first column.
    pub x_first: f64,
    /// Centre latitude of the last (southernmost) row.
    pub y_last: f64,
    pub cellsize: f64,
    /// Row-major, north to south, NODATA as NaN.
    pub values: Vec<f64>,
}

impl AsciiGrid {
    /// Convert into a native field with `y` (descending) and `x` axes.
    pub fn into_field(self, name: &str) -> NativeField {
        let y: Vec<f64> = (0..self.nrows)
            .map(|i| self.y_last + (self.nrows - 1 - i) as f64 * self.cellsize)
            .collect();
        let x: Vec<f64> = (0..self.ncols)
            .map(|j| self.x_first + j as f64 * self.cellsize)
            .collect();

        NativeField {
            name: name.to_string(),
            units: None,
            axes: vec![
                NativeAxis {
                    name: "y".to_string(),
                    values: y,
                    units: Some("degrees_north".to_string()),
                },
                NativeAxis {
                    name: "x".to_string(),
                    values: x,
                    units: Some("degrees_east".to_string()),
                },
            ],
            values: self.values,
            attributes: Default::default(),
        }
    }
}

/// Read a `.asc` or `.asc.gz` file.
pub fn read_esri_ascii(path: &Path) -> Result<AsciiGrid> {
    let bytes = std::fs::read(path)?;
    let text = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| ZampyError::malformed(path, format!("gzip decode failed: {}", e)))?;
        text
    } else {
        String::from_utf8(bytes)
            .map_err(|e| ZampyError::malformed(path, format!("not UTF-8 text: {}", e)))?
    };
    parse_esri_ascii(&text, path)
}

pub fn parse_esri_ascii(text: &str, path: &Path) -> Result<AsciiGrid> {
    let bad = |msg: String| ZampyError::malformed(path, msg);

    let mut ncols = None;
    let mut nrows = None;
    let mut xll: Option<(f64, bool)> = None;
    let mut yll: Option<(f64, bool)> = None;
    let mut cellsize = None;
    let mut nodata = None;

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.peek() {
        let mut parts = line.split_whitespace();
        let key = match parts.next() {
            Some(k) if k.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) => {
                k.to_ascii_lowercase()
            }
            Some(_) => break,
            None => {
                lines.next();
                continue;
            }
        };
        let value = parts
            .next()
            .ok_or_else(|| bad(format!("header '{}' without a value", key)))?;
        let number: f64 = value
            .parse()
            .map_err(|_| bad(format!("header '{}' has non-numeric value '{}'", key, value)))?;

        match key.as_str() {
            "ncols" => ncols = Some(number as usize),
            "nrows" => nrows = Some(number as usize),
            "xllcorner" => xll = Some((number, true)),
            "xllcenter" => xll = Some((number, false)),
            "yllcorner" => yll = Some((number, true)),
            "yllcenter" => yll = Some((number, false)),
            "cellsize" => cellsize = Some(number),
            "nodata_value" => nodata = Some(number),
            other => return Err(bad(format!("unknown header '{}'", other))),
        }
        lines.next();
    }

    let ncols = ncols.ok_or_else(|| bad("missing ncols".to_string()))?;
    let nrows = nrows.ok_or_else(|| bad("missing nrows".to_string()))?;
    let cellsize = cellsize.ok_or_else(|| bad("missing cellsize".to_string()))?;
    if cellsize <= 0.0 || ncols == 0 || nrows == 0 {
        return Err(bad("empty grid or non-positive cellsize".to_string()));
    }
    let half = cellsize / 2.0;
    let x_first = match xll.ok_or_else(|| bad("missing xllcorner/xllcenter".to_string()))? {
        (v, true) => v + half,
        (v, false) => v,
    };
    let y_last = match yll.ok_or_else(|| bad("missing yllcorner/yllcenter".to_string()))? {
        (v, true) => v + half,
        (v, false) => v,
    };

    let mut values = Vec::with_capacity(ncols * nrows);
    for token in lines.flat_map(|l| l.split_whitespace()) {
        let v: f64 = token
            .parse()
            .map_err(|_| bad(format!("non-numeric cell value '{}'", token)))?;
        values.push(if Some(v) == nodata { f64::NAN } else { v });
    }
    if values.len() != ncols * nrows {
        return Err(bad(format!(
            "expected {} cells ({}x{}), found {}",
            ncols * nrows,
            nrows,
            ncols,
            values.len()
        )));
    }

    Ok(AsciiGrid {
        ncols,
        nrows,
        x_first,
        y_last,
        cellsize,
        values,
    })
}
