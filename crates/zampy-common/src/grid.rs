//! In-memory gridded data: a `(time, latitude, longitude)` cube.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bounds::SpatialBounds;
use crate::error::{Result, ZampyError};
use crate::time::TimeBounds;

/// A regular-or-not lat/lon grid over a time axis.
///
/// Invariants (checked by [`GridCube::new`]):
/// - latitude and longitude are strictly ascending
/// - `values.len() == time.len() * latitude.len() * longitude.len()`
/// - values are stored row-major: `[time][lat][lon]`, missing = NaN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCube {
    pub time: Vec<DateTime<Utc>>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub values: Vec<f64>,
}

impl GridCube {
    pub fn new(
        time: Vec<DateTime<Utc>>,
        latitude: Vec<f64>,
        longitude: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self> {
        let expected = time.len() * latitude.len() * longitude.len();
        if values.len() != expected {
            return Err(ZampyError::Serialization(format!(
                "grid shape ({}, {}, {}) needs {} values, got {}",
                time.len(),
                latitude.len(),
                longitude.len(),
                expected,
                values.len()
            )));
        }
        if !is_strictly_ascending(&latitude) || !is_strictly_ascending(&longitude) {
            return Err(ZampyError::Serialization(
                "grid axes must be strictly ascending".to_string(),
            ));
        }
        if time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ZampyError::Serialization(
                "time axis must be strictly increasing".to_string(),
            ));
        }
        Ok(Self {
            time,
            latitude,
            longitude,
            values,
        })
    }

    /// Cells per time step.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }

    #[inline]
    pub fn index(&self, t: usize, lat: usize, lon: usize) -> usize {
        t * self.plane_len() + lat * self.longitude.len() + lon
    }

    pub fn get(&self, t: usize, lat: usize, lon: usize) -> Option<f64> {
        if t >= self.time.len() || lat >= self.latitude.len() || lon >= self.longitude.len() {
            return None;
        }
        self.values.get(self.index(t, lat, lon)).copied()
    }

    /// The values of one time step.
    pub fn plane(&self, t: usize) -> &[f64] {
        let n = self.plane_len();
        &self.values[t * n..(t + 1) * n]
    }

    /// Median spacing of the latitude and longitude axes.
    pub fn resolution(&self) -> (Option<f64>, Option<f64>) {
        (median_spacing(&self.latitude), median_spacing(&self.longitude))
    }

    /// Keep only points inside the (inclusive) spatial and time windows.
    pub fn clip(&self, bounds: &SpatialBounds, window: Option<&TimeBounds>) -> GridCube {
        let lat_idx: Vec<usize> = (0..self.latitude.len())
            .filter(|&i| self.latitude[i] >= bounds.south && self.latitude[i] <= bounds.north)
            .collect();
        let lon_idx: Vec<usize> = (0..self.longitude.len())
            .filter(|&j| self.longitude[j] >= bounds.west && self.longitude[j] <= bounds.east)
            .collect();
        let t_idx: Vec<usize> = (0..self.time.len())
            .filter(|&t| window.map(|w| w.contains(&self.time[t])).unwrap_or(true))
            .collect();

        let mut values = Vec::with_capacity(t_idx.len() * lat_idx.len() * lon_idx.len());
        for &t in &t_idx {
            for &i in &lat_idx {
                for &j in &lon_idx {
                    values.push(self.values[self.index(t, i, j)]);
                }
            }
        }

        GridCube {
            time: t_idx.iter().map(|&t| self.time[t]).collect(),
            latitude: lat_idx.iter().map(|&i| self.latitude[i]).collect(),
            longitude: lon_idx.iter().map(|&j| self.longitude[j]).collect(),
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of non-NaN values.
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}

fn is_strictly_ascending(axis: &[f64]) -> bool {
    axis.windows(2).all(|w| w[1] > w[0])
}

/// Median of consecutive differences, or `None` for fewer than two points.
pub fn median_spacing(axis: &[f64]) -> Option<f64> {
    if axis.len() < 2 {
        return None;
    }
    let mut diffs: Vec<f64> = axis.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    diffs.sort_by(|a, b| a.total_cmp(b));
    Some(diffs[diffs.len() / 2])
}

/// JSON has no NaN; missing values travel as `null`.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            values
                .iter()
                .map(|v| if v.is_finite() { Some(*v) } else { None }),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cube() -> GridCube {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        GridCube::new(
            vec![t0],
            vec![50.0, 50.5, 51.0],
            vec![3.0, 3.5],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(GridCube::new(vec![t0], vec![0.0, 1.0], vec![0.0], vec![1.0]).is_err());
    }

    #[test]
    fn test_descending_axis_rejected() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(GridCube::new(vec![t0], vec![1.0, 0.0], vec![0.0], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_clip_inclusive() {
        let c = cube();
        let b = SpatialBounds::new(50.5, 3.0, 50.0, 2.0).unwrap();
        let clipped = c.clip(&b, None);
        assert_eq!(clipped.latitude, vec![50.0, 50.5]);
        assert_eq!(clipped.longitude, vec![3.0]);
        assert_eq!(clipped.values, vec![1.0, 3.0]);
    }

    #[test]
    fn test_nan_survives_json() {
        let mut c = cube();
        c.values[2] = f64::NAN;
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("null"));
        let back: GridCube = serde_json::from_str(&json).unwrap();
        assert!(back.values[2].is_nan());
        assert_eq!(back.values[3], 4.0);
    }

    #[test]
    fn test_resolution() {
        assert_eq!(cube().resolution(), (Some(0.5), Some(0.5)));
    }
}
