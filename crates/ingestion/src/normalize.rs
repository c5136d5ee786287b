//! Native field → `[time][lat][lon]` grid cube.
//!
//! Raw files disagree on axis names, axis order, latitude direction and
//! longitude convention. Everything downstream of ingestion sees one layout:
//! ascending latitude, ascending longitude in −180..180, increasing time.

use std::path::Path;

use chrono::{DateTime, Utc};

use datasets::{NativeAxis, NativeField};
use zampy_common::time::decode_cf_time;
use zampy_common::{GridCube, Result, ZampyError};

/// What a native axis represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    Time,
    Latitude,
    Longitude,
}

/// Recognize an axis by name.
pub fn axis_role(name: &str) -> Option<AxisRole> {
    match name.to_ascii_lowercase().as_str() {
        "time" | "valid_time" => Some(AxisRole::Time),
        "lat" | "latitude" | "y" => Some(AxisRole::Latitude),
        "lon" | "longitude" | "x" => Some(AxisRole::Longitude),
        _ => None,
    }
}

/// Wrap a longitude from 0..360 into −180..180.
pub fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Indices that visit `values` in ascending order, dropping exact duplicates
/// (e.g. both 0° and 360° present).
fn ascending_order<T: PartialOrd + Copy>(values: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.dedup_by(|b, a| values[*a] == values[*b]);
    order
}

struct Located<'a> {
    axis: &'a NativeAxis,
    stride: usize,
}

/// Build a cube from a native field.
///
/// `static_time` labels the single step of fields without a time axis.
/// Axes of length one that are not recognized (ensemble member, experiment
/// version) are squeezed out; any other unrecognized axis is an error.
pub fn to_cube(field: &NativeField, static_time: DateTime<Utc>, path: &Path) -> Result<GridCube> {
    let shape = field.shape();
    let expected: usize = shape.iter().product();
    if field.values.len() != expected {
        return Err(ZampyError::malformed(
            path,
            format!(
                "variable '{}' has {} values for shape {:?}",
                field.name,
                field.values.len(),
                shape
            ),
        ));
    }

    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }

    let mut time: Option<Located> = None;
    let mut lat: Option<Located> = None;
    let mut lon: Option<Located> = None;
    for (i, axis) in field.axes.iter().enumerate() {
        let located = Located {
            axis,
            stride: strides[i],
        };
        let slot = match axis_role(&axis.name) {
            Some(AxisRole::Time) => &mut time,
            Some(AxisRole::Latitude) => &mut lat,
            Some(AxisRole::Longitude) => &mut lon,
            None if axis.values.len() == 1 => continue,
            None => {
                return Err(ZampyError::malformed(
                    path,
                    format!("unrecognized dimension '{}' on '{}'", axis.name, field.name),
                ))
            }
        };
        if slot.is_some() {
            return Err(ZampyError::malformed(
                path,
                format!("duplicate {:?} dimension '{}'", axis_role(&axis.name), axis.name),
            ));
        }
        *slot = Some(located);
    }

    let lat = lat.ok_or_else(|| {
        ZampyError::malformed(path, format!("'{}' has no latitude dimension", field.name))
    })?;
    let lon = lon.ok_or_else(|| {
        ZampyError::malformed(path, format!("'{}' has no longitude dimension", field.name))
    })?;

    let (times, time_stride) = match &time {
        Some(t) => {
            let units = t.axis.units.as_deref().ok_or_else(|| {
                ZampyError::malformed(path, format!("time axis '{}' has no units", t.axis.name))
            })?;
            let decoded = decode_cf_time(&t.axis.values, units)
                .map_err(|e| ZampyError::malformed(path, e.to_string()))?;
            (decoded, t.stride)
        }
        None => (vec![static_time], 0),
    };

    let lons: Vec<f64> = lon.axis.values.iter().map(|&v| wrap_longitude(v)).collect();
    let t_order = ascending_order(&times);
    let lat_order = ascending_order(&lat.axis.values);
    let lon_order = ascending_order(&lons);

    let mut values = Vec::with_capacity(t_order.len() * lat_order.len() * lon_order.len());
    for &t in &t_order {
        for &i in &lat_order {
            let row = t * time_stride + i * lat.stride;
            for &j in &lon_order {
                values.push(field.values[row + j * lon.stride]);
            }
        }
    }

    GridCube::new(
        t_order.iter().map(|&t| times[t]).collect(),
        lat_order.iter().map(|&i| lat.axis.values[i]).collect(),
        lon_order.iter().map(|&j| lons[j]).collect(),
        values,
    )
    .map_err(|e| ZampyError::malformed(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn axis(name: &str, values: Vec<f64>, units: Option<&str>) -> NativeAxis {
        NativeAxis {
            name: name.to_string(),
            values,
            units: units.map(str::to_string),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_axis_roles() {
        assert_eq!(axis_role("valid_time"), Some(AxisRole::Time));
        assert_eq!(axis_role("Latitude"), Some(AxisRole::Latitude));
        assert_eq!(axis_role("x"), Some(AxisRole::Longitude));
        assert_eq!(axis_role("number"), None);
    }

    #[test]
    fn test_descending_latitude_is_flipped() {
        let field = NativeField {
            name: "t2m".to_string(),
            units: Some("K".to_string()),
            axes: vec![
                axis("latitude", vec![51.0, 50.0], None),
                axis("longitude", vec![3.0, 4.0], None),
            ],
            values: vec![1.0, 2.0, 3.0, 4.0],
            attributes: Default::default(),
        };
        let cube = to_cube(&field, t0(), Path::new("f")).unwrap();
        assert_eq!(cube.time, vec![t0()]);
        assert_eq!(cube.latitude, vec![50.0, 51.0]);
        assert_eq!(cube.values, vec![3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_transpose_and_wrap_longitude() {
        // [lon][time][lat] with 0..360 longitudes
        let field = NativeField {
            name: "sp".to_string(),
            units: None,
            axes: vec![
                axis("lon", vec![0.0, 359.0], None),
                axis("time", vec![0.0, 1.0], Some("hours since 2000-01-01")),
                axis("lat", vec![10.0], None),
            ],
            values: vec![1.0, 2.0, 3.0, 4.0],
            attributes: Default::default(),
        };
        let cube = to_cube(&field, t0(), Path::new("f")).unwrap();
        assert_eq!(cube.longitude, vec![-1.0, 0.0]);
        assert_eq!(cube.time.len(), 2);
        // t=0: lon -1 -> 3.0, lon 0 -> 1.0
        assert_eq!(cube.plane(0), &[3.0, 1.0]);
        assert_eq!(cube.plane(1), &[4.0, 2.0]);
    }

    #[test]
    fn test_singleton_unknown_axis_is_squeezed() {
        let field = NativeField {
            name: "t2m".to_string(),
            units: None,
            axes: vec![
                axis("expver", vec![1.0], None),
                axis("y", vec![0.0, 1.0], None),
                axis("x", vec![0.0], None),
            ],
            values: vec![5.0, 6.0],
            attributes: Default::default(),
        };
        let cube = to_cube(&field, t0(), Path::new("f")).unwrap();
        assert_eq!(cube.values, vec![5.0, 6.0]);
    }

    #[test]
    fn test_unknown_axis_is_malformed() {
        let field = NativeField {
            name: "t2m".to_string(),
            units: None,
            axes: vec![
                axis("level", vec![500.0, 850.0], None),
                axis("lat", vec![0.0], None),
                axis("lon", vec![0.0], None),
            ],
            values: vec![1.0, 2.0],
            attributes: Default::default(),
        };
        assert!(matches!(
            to_cube(&field, t0(), Path::new("f")),
            Err(ZampyError::MalformedArtifact { .. })
        ));
    }

    #[test]
    fn test_time_axis_requires_units() {
        let field = NativeField {
            name: "t2m".to_string(),
            units: None,
            axes: vec![
                axis("time", vec![0.0], None),
                axis("lat", vec![0.0], None),
                axis("lon", vec![0.0], None),
            ],
            values: vec![1.0],
            attributes: Default::default(),
        };
        assert!(to_cube(&field, t0(), Path::new("f")).is_err());
    }
}
