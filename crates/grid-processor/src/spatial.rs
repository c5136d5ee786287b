//! Spatial regridding onto a regular lat/lon target grid.
//!
//! Every source point falls into exactly one target bin
//! `[centre - res/2, centre + res/2)` and bins are finalized with a rule
//! matched to the variable's aggregation kind. Source points from several
//! cubes (DEM tiles, monthly chunks) are accumulated before any bin is
//! finalized, so tile edges do not produce seams. A coordinate shared by two
//! cubes (the common edge row of adjacent tiles) counts once, from the first
//! cube that carries it.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use zampy_common::{AggregationKind, GridCube, Result, SpatialBounds, ZampyError};

/// Tolerance when comparing a target resolution against source spacing.
const RESOLUTION_EPSILON: f64 = 1e-9;

/// Coordinates closer than 1e-9 degrees are the same source point.
const COORDINATE_SCALE: f64 = 1e9;

/// Method used to aggregate the source points of one target bin.
///
/// - **Mean**: point-in-time state and cell averages
/// - **AreaWeightedMean**: fluxes, weighted by `cos(latitude)`
/// - **Mode**: class codes, ties resolved to the smallest class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    Mean,
    AreaWeightedMean,
    Mode,
}

impl AggregationMethod {
    /// The method a variable's aggregation kind calls for.
    pub fn for_kind(kind: AggregationKind) -> Self {
        match kind {
            AggregationKind::Instantaneous | AggregationKind::IntensiveAverage => {
                AggregationMethod::Mean
            }
            AggregationKind::Accumulated => AggregationMethod::AreaWeightedMean,
            AggregationKind::Categorical => AggregationMethod::Mode,
        }
    }
}

/// A regular target grid, cell centres on `south + i * res`.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub resolution: f64,
}

impl TargetGrid {
    pub fn new(bounds: &SpatialBounds, resolution: f64) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ZampyError::InvalidResolution(resolution));
        }
        Ok(Self {
            latitude: centres(bounds.south, bounds.north, resolution),
            longitude: centres(bounds.west, bounds.east, resolution),
            resolution,
        })
    }

    /// Index of the bin containing `value` on `axis`, if any.
    fn bin(axis: &[f64], resolution: f64, value: f64) -> Option<usize> {
        let origin = *axis.first()?;
        let index = ((value - origin) / resolution + 0.5).floor();
        if index < 0.0 || index >= axis.len() as f64 {
            None
        } else {
            Some(index as usize)
        }
    }

    fn plane_len(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }
}

fn centres(start: f64, end: f64, resolution: f64) -> Vec<f64> {
    let steps = ((end - start) / resolution).round() as usize;
    (0..=steps).map(|i| start + i as f64 * resolution).collect()
}

/// Running state of one target bin.
#[derive(Debug, Default, Clone)]
struct Bin {
    total: usize,
    missing: usize,
    sum: f64,
    weight: f64,
    classes: BTreeMap<i64, usize>,
}

impl Bin {
    fn push(&mut self, value: f64, latitude: f64, method: AggregationMethod) {
        self.total += 1;
        if value.is_nan() {
            self.missing += 1;
            return;
        }
        match method {
            AggregationMethod::Mean => {
                self.sum += value;
                self.weight += 1.0;
            }
            AggregationMethod::AreaWeightedMean => {
                let w = latitude.to_radians().cos().max(0.0);
                self.sum += value * w;
                self.weight += w;
            }
            AggregationMethod::Mode => {
                *self.classes.entry(value.round() as i64).or_insert(0) += 1;
            }
        }
    }

    fn finish(&self, method: AggregationMethod, na_threshold: f64) -> f64 {
        if self.total == 0 || self.missing == self.total {
            return f64::NAN;
        }
        if self.missing as f64 / self.total as f64 > na_threshold {
            return f64::NAN;
        }
        match method {
            AggregationMethod::Mean | AggregationMethod::AreaWeightedMean => {
                if self.weight > 0.0 {
                    self.sum / self.weight
                } else {
                    f64::NAN
                }
            }
            AggregationMethod::Mode => {
                let mut best: Option<(i64, usize)> = None;
                // BTreeMap iterates ascending, so a strict `>` keeps the
                // smallest class on ties.
                for (&class, &count) in &self.classes {
                    if best.map(|(_, c)| count > c).unwrap_or(true) {
                        best = Some((class, count));
                    }
                }
                best.map(|(class, _)| class as f64).unwrap_or(f64::NAN)
            }
        }
    }
}

/// Reject a target grid finer than any source cube.
pub fn check_upsampling(sources: &[GridCube], resolution: f64) -> Result<()> {
    for cube in sources {
        let (lat, lon) = cube.resolution();
        for native in [lat, lon].into_iter().flatten() {
            if resolution + RESOLUTION_EPSILON < native {
                return Err(ZampyError::UnsupportedUpsampling {
                    requested: format!("{} deg", resolution),
                    native: format!("{} deg", native),
                });
            }
        }
    }
    Ok(())
}

/// Regrid `sources` onto `target`.
///
/// The output time axis is the sorted union of the source time axes. Time
/// steps are binned in parallel.
pub fn regrid(
    sources: &[GridCube],
    target: &TargetGrid,
    method: AggregationMethod,
    na_threshold: f64,
) -> Result<GridCube> {
    check_upsampling(sources, target.resolution)?;

    let mut times: Vec<DateTime<Utc>> = sources.iter().flat_map(|c| c.time.iter().copied()).collect();
    times.sort();
    times.dedup();

    let planes: Vec<Vec<f64>> = times
        .par_iter()
        .map(|t| regrid_step(sources, *t, target, method, na_threshold))
        .collect();

    let values: Vec<f64> = planes.into_iter().flatten().collect();
    GridCube::new(times, target.latitude.clone(), target.longitude.clone(), values)
}

fn regrid_step(
    sources: &[GridCube],
    time: DateTime<Utc>,
    target: &TargetGrid,
    method: AggregationMethod,
    na_threshold: f64,
) -> Vec<f64> {
    let mut bins = vec![Bin::default(); target.plane_len()];
    let width = target.longitude.len();
    let overlapping = sources.len() > 1;
    let mut seen: HashSet<(i64, i64)> = HashSet::new();

    for cube in sources {
        let Some(t) = cube.time.iter().position(|x| *x == time) else {
            continue;
        };
        let plane = cube.plane(t);
        let lon_bins: Vec<Option<usize>> = cube
            .longitude
            .iter()
            .map(|&lon| TargetGrid::bin(&target.longitude, target.resolution, lon))
            .collect();

        for (i, &lat) in cube.latitude.iter().enumerate() {
            let Some(bi) = TargetGrid::bin(&target.latitude, target.resolution, lat) else {
                continue;
            };
            let row = &plane[i * cube.longitude.len()..(i + 1) * cube.longitude.len()];
            for (j, &value) in row.iter().enumerate() {
                let Some(bj) = lon_bins[j] else {
                    continue;
                };
                if overlapping && !seen.insert(point_key(lat, cube.longitude[j])) {
                    continue;
                }
                bins[bi * width + bj].push(value, lat, method);
            }
        }
    }

    bins.iter().map(|b| b.finish(method, na_threshold)).collect()
}

fn point_key(lat: f64, lon: f64) -> (i64, i64) {
    (
        (lat * COORDINATE_SCALE).round() as i64,
        (lon * COORDINATE_SCALE).round() as i64,
    )
}
