//! Synthetic archive payloads.
//!
//! Builders for the two raw formats the adapters read (CF-JSON and gzipped
//! ESRI ASCII) plus ready-made responders for [`crate::FakeArchiveClient`]
//! that answer CDS, ADS and DEM tile requests the way the real archives would.

use std::io::Write;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};

use zampy_common::{ArchiveRequest, Result, VariableRegistry, ZampyError};

/// Reference instant for generated time axes.
pub const CF_TIME_UNITS: &str = "hours since 1900-01-01 00:00:00.0";

/// Inclusive axis from `start` towards `end` in steps of `step` (which may be
/// negative for descending axes).
pub fn axis(start: f64, end: f64, step: f64) -> Vec<f64> {
    let n = ((end - start) / step).round() as i64;
    (0..=n.max(0)).map(|i| start + i as f64 * step).collect()
}

/// Hourly instants from `start` (inclusive), `count` steps.
pub fn hourly(start: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    (0..count)
        .map(|i| start + chrono::Duration::hours(i as i64))
        .collect()
}

/// Builds a single-variable CF-JSON document in the `ncks --json` layout.
#[derive(Debug, Clone)]
pub struct CfJsonBuilder {
    name: String,
    units: String,
    lat_name: String,
    lon_name: String,
    time_name: String,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    times: Vec<DateTime<Utc>>,
    fill_value: Option<f64>,
    attributes: Map<String, Value>,
}

impl CfJsonBuilder {
    pub fn new(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            lat_name: "latitude".to_string(),
            lon_name: "longitude".to_string(),
            time_name: "time".to_string(),
            latitudes: Vec::new(),
            longitudes: Vec::new(),
            times: Vec::new(),
            fill_value: None,
            attributes: Map::new(),
        }
    }

    pub fn latitudes(mut self, values: Vec<f64>) -> Self {
        self.latitudes = values;
        self
    }

    pub fn longitudes(mut self, values: Vec<f64>) -> Self {
        self.longitudes = values;
        self
    }

    /// Without times the field is written as a 2-D `[lat][lon]` array.
    pub fn times(mut self, values: Vec<DateTime<Utc>>) -> Self {
        self.times = values;
        self
    }

    /// Rename the coordinate dimensions (e.g. `lat`, `lon`, `valid_time`).
    pub fn dimension_names(mut self, time: &str, lat: &str, lon: &str) -> Self {
        self.time_name = time.to_string();
        self.lat_name = lat.to_string();
        self.lon_name = lon.to_string();
        self
    }

    /// NaN values are written as this fill value instead of `null`.
    pub fn fill_value(mut self, value: f64) -> Self {
        self.fill_value = Some(value);
        self
    }

    pub fn attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Render the document, sampling `value(time_index, lat, lon)`.
    pub fn build<F>(&self, value: F) -> Value
    where
        F: Fn(usize, f64, f64) -> f64,
    {
        let cell = |t: usize, lat: f64, lon: f64| -> Value {
            let v = value(t, lat, lon);
            if v.is_nan() {
                self.fill_value.map(Value::from).unwrap_or(Value::Null)
            } else {
                Value::from(v)
            }
        };
        let plane = |t: usize| -> Value {
            Value::Array(
                self.latitudes
                    .iter()
                    .map(|&lat| {
                        Value::Array(self.longitudes.iter().map(|&lon| cell(t, lat, lon)).collect())
                    })
                    .collect(),
            )
        };

        let mut dimensions = Map::new();
        let mut variables = Map::new();
        let mut shape = Vec::new();

        let data = if self.times.is_empty() {
            plane(0)
        } else {
            dimensions.insert(self.time_name.clone(), json!(self.times.len()));
            let epoch = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap();
            let hours: Vec<f64> = self
                .times
                .iter()
                .map(|t| (*t - epoch).num_seconds() as f64 / 3600.0)
                .collect();
            variables.insert(
                self.time_name.clone(),
                json!({
                    "shape": [self.time_name],
                    "attributes": { "units": CF_TIME_UNITS, "calendar": "gregorian" },
                    "data": hours,
                }),
            );
            shape.push(self.time_name.clone());
            Value::Array((0..self.times.len()).map(plane).collect())
        };

        dimensions.insert(self.lat_name.clone(), json!(self.latitudes.len()));
        dimensions.insert(self.lon_name.clone(), json!(self.longitudes.len()));
        variables.insert(
            self.lat_name.clone(),
            json!({
                "shape": [self.lat_name],
                "attributes": { "units": "degrees_north" },
                "data": self.latitudes,
            }),
        );
        variables.insert(
            self.lon_name.clone(),
            json!({
                "shape": [self.lon_name],
                "attributes": { "units": "degrees_east" },
                "data": self.longitudes,
            }),
        );
        shape.push(self.lat_name.clone());
        shape.push(self.lon_name.clone());

        let mut attributes = self.attributes.clone();
        attributes.insert("units".to_string(), json!(self.units));
        if let Some(fill) = self.fill_value {
            attributes.insert("_FillValue".to_string(), json!(fill));
        }
        variables.insert(
            self.name.clone(),
            json!({ "shape": shape, "attributes": attributes, "data": data }),
        );

        json!({
            "dimensions": dimensions,
            "variables": variables,
            "attributes": { "Conventions": "CF-1.6" },
        })
    }

    pub fn to_bytes<F>(&self, value: F) -> Vec<u8>
    where
        F: Fn(usize, f64, f64) -> f64,
    {
        serde_json::to_vec(&self.build(value)).expect("CF-JSON serializes")
    }
}

/// Answers ERA5 / ERA5-Land CDS requests with a CF-JSON grid covering the
/// requested area, days and hours. `value` receives
/// `(native_name, time, lat, lon)`. Latitudes run north to south as the real
/// archive delivers them.
pub fn cds_responder<F>(value: F) -> impl Fn(&ArchiveRequest) -> Result<Vec<u8>> + Send + Sync
where
    F: Fn(&str, DateTime<Utc>, f64, f64) -> f64 + Send + Sync + 'static,
{
    let registry = VariableRegistry::builtin().expect("builtin registry loads");
    move |request: &ArchiveRequest| {
        let (product, body) = match request {
            ArchiveRequest::Cds { dataset, body } => (dataset.as_str(), body),
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "fake CDS cannot serve {}",
                    other
                )))
            }
        };
        let (dataset, resolution) = match product {
            "reanalysis-era5-single-levels" => ("era5", 0.25),
            "reanalysis-era5-land" => ("era5_land", 0.1),
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "fake CDS has no product {}",
                    other
                )))
            }
        };

        let request_name = body
            .pointer("/variable/0")
            .and_then(Value::as_str)
            .ok_or_else(|| ZampyError::UnsupportedRequest("missing variable".to_string()))?;
        let native = registry
            .names()
            .filter_map(|n| registry.get(n))
            .filter_map(|v| v.native_for(dataset))
            .find(|n| n.request_name() == request_name)
            .ok_or_else(|| {
                ZampyError::UnsupportedRequest(format!("unknown variable {}", request_name))
            })?;
        // the unit attribute the archive writes, not the registry's reading of it
        let units = native
            .file_units
            .first()
            .or(native.unit.as_ref())
            .cloned()
            .unwrap_or_else(|| "1".to_string());

        let area: Vec<f64> = body
            .get("area")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let [north, west, south, east] = <[f64; 4]>::try_from(area)
            .map_err(|_| ZampyError::UnsupportedRequest("missing area".to_string()))?;

        let times = request_times(body)?;
        let name = native.name.clone();
        let builder = CfJsonBuilder::new(&name, &units)
            .latitudes(axis(north, south, -resolution))
            .longitudes(axis(west, east, resolution))
            .times(times.clone());
        Ok(builder.to_bytes(|t, lat, lon| value(&name, times[t], lat, lon)))
    }
}

fn request_times(body: &Value) -> Result<Vec<DateTime<Utc>>> {
    let text = |v: &Value| v.as_str().map(str::to_string);
    let list = |key: &str| -> Vec<String> {
        body.get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(text).collect())
            .unwrap_or_default()
    };
    let bad = || ZampyError::UnsupportedRequest("bad date fields".to_string());
    let year: i32 = body
        .get("year")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(bad)?;
    let month: u32 = body
        .get("month")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(bad)?;

    let mut times = Vec::new();
    for day in list("day") {
        let day: u32 = day.parse().map_err(|_| bad())?;
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        for hour in list("time") {
            let hour: u32 = hour
                .split(':')
                .next()
                .and_then(|h| h.parse().ok())
                .ok_or_else(bad)?;
            let ndt = date.and_hms_opt(hour, 0, 0).ok_or_else(bad)?;
            times.push(Utc.from_utc_datetime(&ndt));
        }
    }
    Ok(times)
}

/// Answers CAMS EGG4 requests (`cams-global-ghg-reanalysis-egg4`) with a
/// 0.75° CF-JSON grid holding every requested step of every day in the
/// `date` range. `value` receives `(time, lat, lon)`.
pub fn ads_responder<F>(value: F) -> impl Fn(&ArchiveRequest) -> Result<Vec<u8>> + Send + Sync
where
    F: Fn(DateTime<Utc>, f64, f64) -> f64 + Send + Sync + 'static,
{
    move |request: &ArchiveRequest| {
        let body = match request {
            ArchiveRequest::Cds { dataset, body } if dataset == "cams-global-ghg-reanalysis-egg4" => {
                body
            }
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "fake ADS cannot serve {}",
                    other
                )))
            }
        };
        if body.pointer("/variable/0").and_then(Value::as_str) != Some("carbon_dioxide") {
            return Err(ZampyError::UnsupportedRequest("unknown variable".to_string()));
        }
        let bad = || ZampyError::UnsupportedRequest("bad date range".to_string());
        let (first, last) = body
            .get("date")
            .and_then(Value::as_str)
            .and_then(|d| d.split_once('/'))
            .ok_or_else(bad)?;
        let first = NaiveDate::parse_from_str(first, "%Y-%m-%d").map_err(|_| bad())?;
        let last = NaiveDate::parse_from_str(last, "%Y-%m-%d").map_err(|_| bad())?;
        let steps: Vec<u32> = body
            .get("step")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).filter_map(|s| s.parse().ok()).collect())
            .unwrap_or_default();

        let mut times = Vec::new();
        for date in first.iter_days().take_while(|d| *d <= last) {
            for &hour in &steps {
                let ndt = date.and_hms_opt(hour, 0, 0).ok_or_else(bad)?;
                times.push(Utc.from_utc_datetime(&ndt));
            }
        }

        let area: Vec<f64> = body
            .get("area")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let [north, west, south, east] = <[f64; 4]>::try_from(area)
            .map_err(|_| ZampyError::UnsupportedRequest("missing area".to_string()))?;

        let builder = CfJsonBuilder::new("co2", "kg kg**-1")
            .latitudes(axis(north, south, -0.75))
            .longitudes(axis(west, east, 0.75))
            .times(times.clone());
        Ok(builder.to_bytes(|t, lat, lon| value(times[t], lat, lon)))
    }
}

/// Answers `satellite-land-cover` requests with a class map on a regular grid
/// over `[south, north] x [west, east]`, one time step at January 1st.
pub fn land_cover_responder<F>(
    north: f64,
    east: f64,
    south: f64,
    west: f64,
    resolution: f64,
    class: F,
) -> impl Fn(&ArchiveRequest) -> Result<Vec<u8>> + Send + Sync
where
    F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
{
    move |request: &ArchiveRequest| {
        let body = match request {
            ArchiveRequest::Cds { dataset, body } if dataset == "satellite-land-cover" => body,
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "fake land cover cannot serve {}",
                    other
                )))
            }
        };
        let year: i32 = body
            .pointer("/year/0")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ZampyError::UnsupportedRequest("missing year".to_string()))?;
        let time = Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| ZampyError::UnsupportedRequest("bad year".to_string()))?;

        let half = resolution / 2.0;
        let builder = CfJsonBuilder::new("lccs_class", "1")
            .dimension_names("time", "lat", "lon")
            .latitudes(axis(north - half, south + half, -resolution))
            .longitudes(axis(west + half, east - half, resolution))
            .times(vec![time])
            .fill_value(0.0)
            .attribute("flag_meanings", json!("no_data cropland_rainfed tree_cover"));
        Ok(builder.to_bytes(|_, lat, lon| class(lat, lon)))
    }
}

/// Render an ESRI ASCII grid. `values` are row-major, north row first; NaN is
/// written as the NODATA value.
pub fn esri_ascii_text(
    ncols: usize,
    nrows: usize,
    xllcorner: f64,
    yllcorner: f64,
    cellsize: f64,
    values: &[f64],
) -> String {
    let nodata = -9999.0;
    let mut out = format!(
        "ncols {}\nnrows {}\nxllcorner {}\nyllcorner {}\ncellsize {}\nNODATA_value {}\n",
        ncols, nrows, xllcorner, yllcorner, cellsize, nodata
    );
    for row in values.chunks(ncols) {
        let line: Vec<String> = row
            .iter()
            .map(|v| if v.is_nan() { nodata.to_string() } else { v.to_string() })
            .collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).expect("gzip to memory");
    encoder.finish().expect("gzip to memory")
}

/// Parse `(lat, lon)` of the south-west corner from a Copernicus DSM tile
/// name or URL.
pub fn parse_dem_tile(url: &str) -> Option<(i32, i32)> {
    let name = url.rsplit('/').next()?;
    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() < 6 {
        return None;
    }
    let signed = |s: &str, pos: char| -> Option<i32> {
        if s.is_empty() {
            return None;
        }
        let (hemi, digits) = s.split_at(1);
        let v: i32 = digits.parse().ok()?;
        Some(if hemi.starts_with(pos) { v } else { -v })
    };
    Some((signed(parts[3], 'N')?, signed(parts[5], 'E')?))
}

/// Answers DEM tile URLs with a gzipped ESRI ASCII tile of
/// `cells_per_degree` cells a side, sampling `elevation(lat, lon)` at cell
/// centres.
pub fn dem_responder<F>(
    cells_per_degree: usize,
    elevation: F,
) -> impl Fn(&ArchiveRequest) -> Result<Vec<u8>> + Send + Sync
where
    F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
{
    move |request: &ArchiveRequest| {
        let url = match request {
            ArchiveRequest::Url { url } => url,
            other => {
                return Err(ZampyError::UnsupportedRequest(format!(
                    "fake DEM host cannot serve {}",
                    other
                )))
            }
        };
        let (lat0, lon0) = parse_dem_tile(url)
            .ok_or_else(|| ZampyError::UnsupportedRequest(format!("{} not found", url)))?;
        let n = cells_per_degree;
        let cell = 1.0 / n as f64;
        let mut values = Vec::with_capacity(n * n);
        for row in 0..n {
            let lat = f64::from(lat0) + 1.0 - (row as f64 + 0.5) * cell;
            for col in 0..n {
                let lon = f64::from(lon0) + (col as f64 + 0.5) * cell;
                values.push(elevation(lat, lon));
            }
        }
        let text = esri_ascii_text(n, n, f64::from(lon0), f64::from(lat0), cell, &values);
        Ok(gzip(text.as_bytes()))
    }
}
