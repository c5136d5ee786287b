//! Temporal resampling into frequency buckets.
//!
//! Buckets are labelled by their start. Accumulated variables are stored as
//! rates over the native step, so a bucket value is the total over the
//! covered part of the bucket divided by that covered length:
//! `Σ(rate · step) / (valid_steps · step)`. Missing steps therefore leave the
//! rate unchanged instead of counting as zero flux, and full buckets stay
//! additive over consecutive sub-intervals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::debug;

use zampy_common::time::median_step_seconds;
use zampy_common::{AggregationKind, Frequency, GridCube, Result, ZampyError};

/// Consecutive time indices sharing one bucket.
struct Bucket {
    start: DateTime<Utc>,
    seconds: i64,
    steps: Vec<usize>,
}

fn buckets(times: &[DateTime<Utc>], frequency: &Frequency) -> Vec<Bucket> {
    let mut out: Vec<Bucket> = Vec::new();
    for (t, time) in times.iter().enumerate() {
        let start = frequency.bucket_start(*time);
        match out.last_mut() {
            Some(bucket) if bucket.start == start => bucket.steps.push(t),
            _ => out.push(Bucket {
                start,
                seconds: frequency.bucket_seconds(start),
                steps: vec![t],
            }),
        }
    }
    out
}

/// Resample `cube` to `frequency`.
///
/// `native_step_seconds` is the source step; when `None` it is inferred from
/// the time axis. A frequency finer than the native step is always rejected,
/// even when only one step falls inside the window. A single-step cube with
/// no native step (a static field) passes through unchanged.
pub fn resample(
    cube: &GridCube,
    kind: AggregationKind,
    native_step_seconds: Option<i64>,
    frequency: &Frequency,
) -> Result<GridCube> {
    let native = native_step_seconds.or_else(|| median_step_seconds(&cube.time));
    if let Some(native) = native {
        if frequency.is_finer_than(native) {
            return Err(ZampyError::UnsupportedUpsampling {
                requested: frequency.code(),
                native: format!("{}s", native),
            });
        }
    }
    let Some(native) = native else {
        debug!("Single time step, skipping temporal resampling");
        return Ok(cube.clone());
    };

    let plane_len = cube.plane_len();
    let groups = buckets(&cube.time, frequency);
    let planes: Vec<Vec<f64>> = groups
        .par_iter()
        .map(|bucket| {
            (0..plane_len)
                .map(|cell| {
                    let samples = bucket.steps.iter().map(|&t| cube.values[t * plane_len + cell]);
                    aggregate(samples, kind, native, bucket.seconds)
                })
                .collect()
        })
        .collect();

    GridCube::new(
        groups.iter().map(|b| b.start).collect(),
        cube.latitude.clone(),
        cube.longitude.clone(),
        planes.into_iter().flatten().collect(),
    )
}

fn aggregate(
    samples: impl Iterator<Item = f64>,
    kind: AggregationKind,
    native_step: i64,
    bucket_seconds: i64,
) -> f64 {
    let valid: Vec<f64> = samples.filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    match kind {
        AggregationKind::Accumulated => {
            let total: f64 = valid.iter().map(|rate| rate * native_step as f64).sum();
            let covered = (valid.len() as i64 * native_step).min(bucket_seconds);
            if covered <= 0 {
                return f64::NAN;
            }
            total / covered as f64
        }
        AggregationKind::Categorical => {
            let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
            for v in &valid {
                *counts.entry(v.round() as i64).or_insert(0) += 1;
            }
            let mut best = (0i64, 0usize);
            for (class, count) in counts {
                if count > best.1 {
                    best = (class, count);
                }
            }
            best.0 as f64
        }
        AggregationKind::Instantaneous | AggregationKind::IntensiveAverage => {
            valid.iter().sum::<f64>() / valid.len() as f64
        }
    }
}
