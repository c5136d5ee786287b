//! Spatial bounding boxes in geographic (EPSG:4326) coordinates.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZampyError};

/// An inclusive latitude/longitude box, stored in recipe order (N, E, S, W).
///
/// Boxes crossing the antimeridian are not representable: `east` must be
/// greater than `west`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialBounds {
    pub north: f64,
    pub east: f64,
    pub south: f64,
    pub west: f64,
}

impl SpatialBounds {
    /// Create validated bounds.
    pub fn new(north: f64, east: f64, south: f64, west: f64) -> Result<Self> {
        let bounds = Self {
            north,
            east,
            south,
            west,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Global coverage.
    pub fn global() -> Self {
        Self {
            north: 90.0,
            east: 180.0,
            south: -90.0,
            west: -180.0,
        }
    }

    /// Parse the recipe `bbox: [N, E, S, W]` list.
    pub fn from_recipe(values: &[f64]) -> Result<Self> {
        match values {
            [n, e, s, w] => Self::new(*n, *e, *s, *w),
            _ => Err(ZampyError::InvalidBounds(format!(
                "expected 4 values [N, E, S, W], got {}",
                values.len()
            ))),
        }
    }

    fn validate(&self) -> Result<()> {
        let all = [self.north, self.east, self.south, self.west];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(ZampyError::InvalidBounds(format!(
                "non-finite coordinate in {:?}",
                self
            )));
        }
        if self.north > 90.0 || self.south < -90.0 {
            return Err(ZampyError::InvalidBounds(format!(
                "latitude outside [-90, 90]: north={}, south={}",
                self.north, self.south
            )));
        }
        if self.east > 180.0 || self.west < -180.0 {
            return Err(ZampyError::InvalidBounds(format!(
                "longitude outside [-180, 180]: east={}, west={}",
                self.east, self.west
            )));
        }
        if self.south >= self.north {
            return Err(ZampyError::InvalidBounds(format!(
                "southern bound {} is not below northern bound {}",
                self.south, self.north
            )));
        }
        if self.west >= self.east {
            return Err(ZampyError::InvalidBounds(format!(
                "western bound {} is not west of eastern bound {} (antimeridian wrap is not supported)",
                self.west, self.east
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Inclusive containment test.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// Check if this box touches or overlaps another (edges count).
    pub fn intersects(&self, other: &SpatialBounds) -> bool {
        self.west <= other.east
            && self.east >= other.west
            && self.south <= other.north
            && self.north >= other.south
    }

    /// Compute the overlapping region of two boxes.
    pub fn intersection(&self, other: &SpatialBounds) -> Option<SpatialBounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(SpatialBounds {
            north: self.north.min(other.north),
            east: self.east.min(other.east),
            south: self.south.max(other.south),
            west: self.west.max(other.west),
        })
    }

    /// The CDS `area` parameter: `[N, W, S, E]`.
    pub fn to_cds_area(&self) -> [f64; 4] {
        [self.north, self.west, self.south, self.east]
    }

    /// Whole-degree tiles (south-west corners) covering this box.
    ///
    /// A box edge lying exactly on a whole degree does not pull in the
    /// neighbouring tile.
    pub fn degree_tiles(&self) -> Vec<(i32, i32)> {
        let lat_start = self.south.floor() as i32;
        let lat_end = (self.north.ceil() as i32).max(lat_start + 1);
        let lon_start = self.west.floor() as i32;
        let lon_end = (self.east.ceil() as i32).max(lon_start + 1);

        let mut tiles = Vec::new();
        for lat in lat_start..lat_end {
            for lon in lon_start..lon_end {
                tiles.push((lat, lon));
            }
        }
        tiles
    }

    /// Compact, filesystem-safe rendering used in artifact names.
    pub fn path_component(&self) -> String {
        format!(
            "n{}_e{}_s{}_w{}",
            fmt_coord(self.north),
            fmt_coord(self.east),
            fmt_coord(self.south),
            fmt_coord(self.west)
        )
    }
}

fn fmt_coord(v: f64) -> String {
    // 1e-4 degree precision is well below any supported grid spacing.
    let s = format!("{:.4}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    let s = if s == "-0" { "0" } else { s };
    s.replace('-', "m").replace('.', "p")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_component() {
        let b = SpatialBounds::new(51.0, 4.25, 50.0, -3.5).unwrap();
        assert_eq!(b.path_component(), "n51_e4p25_s50_wm3p5");
    }

    #[test]
    fn test_degree_tiles_on_edges() {
        let b = SpatialBounds::new(51.0, 4.0, 50.0, 3.0).unwrap();
        assert_eq!(b.degree_tiles(), vec![(50, 3)]);

        let b = SpatialBounds::new(51.5, 4.0, 50.0, 3.0).unwrap();
        assert_eq!(b.degree_tiles(), vec![(50, 3), (51, 3)]);
    }
}
