//! Time handling: closed time windows, frequency codes and CF time axes.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZampyError};

/// A closed time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBounds {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(ZampyError::InvalidRecipe(format!(
                "time range end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Whole calendar years, `start-01-01T00:00` to `end-12-31T23:59`.
    pub fn from_years(start_year: i32, end_year: i32) -> Result<Self> {
        let start = ymd_hms(start_year, 1, 1, 0, 0, 0)?;
        let end = ymd_hms(end_year, 12, 31, 23, 59, 0)?;
        Self::new(start, end)
    }

    /// Parse recipe timestamps. A date-only end means the end of that day.
    pub fn from_strings(start: &str, end: &str) -> Result<Self> {
        let start = parse_timestamp(start, false)?;
        let end = parse_timestamp(end, true)?;
        Self::new(start, end)
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        t >= &self.start && t <= &self.end
    }

    /// Whether `other` lies entirely within this window.
    pub fn covers(&self, other: &TimeBounds) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    pub fn intersection(&self, other: &TimeBounds) -> Option<TimeBounds> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(TimeBounds { start, end })
    }

    /// Split into per-calendar-month windows, clipped to this window.
    pub fn monthly_chunks(&self) -> Vec<TimeBounds> {
        let mut chunks = Vec::new();
        let mut cursor = month_start(self.start);
        while cursor <= self.end {
            let next = add_months(cursor, 1);
            let chunk_end = next - Duration::seconds(1);
            let window = TimeBounds {
                start: cursor.max(self.start),
                end: chunk_end.min(self.end),
            };
            chunks.push(window);
            cursor = next;
        }
        chunks
    }

    /// Split into per-calendar-year windows, clipped to this window.
    pub fn yearly_chunks(&self) -> Vec<TimeBounds> {
        (self.start.year()..=self.end.year())
            .filter_map(|year| {
                let start = ymd_hms(year, 1, 1, 0, 0, 0).ok()?;
                let end = ymd_hms(year, 12, 31, 23, 59, 59).ok()?;
                TimeBounds { start, end }.intersection(self)
            })
            .collect()
    }

    /// Compact rendering used in artifact names, e.g. `20200101T0000`.
    pub fn path_component(&self) -> String {
        format!(
            "{}_{}",
            self.start.format("%Y%m%dT%H%M"),
            self.end.format("%Y%m%dT%H%M")
        )
    }
}

fn ymd_hms(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, min, s))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .ok_or_else(|| ZampyError::InvalidRecipe(format!("invalid date {}-{}-{}", y, m, d)))
}

fn month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}

fn add_months(t: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = t.year() * 12 + (t.month0() + months) as i32;
    let (year, month0) = (total.div_euclid(12), total.rem_euclid(12) as u32);
    Utc.with_ymd_and_hms(year, month0 + 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}

/// Parse a recipe timestamp: `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM` or
/// `YYYY-MM-DDTHH:MM:SS` (UTC). Other shapes, including non-padded fields
/// like `2020-1-01`, are rejected.
pub fn parse_timestamp(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let s = s.trim().trim_end_matches('Z');
    let invalid = || {
        ZampyError::InvalidRecipe(format!(
            "The input format of timestamp '{}' is not supported; expected \
             'YYYY-MM-DD', 'YYYY-MM-DDTHH:MM' or 'YYYY-MM-DDTHH:MM:SS'",
            s
        ))
    };

    let padded = |len: usize| s.len() == len;
    if padded(10) {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
        let ndt = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        }
        .ok_or_else(invalid)?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }
    if padded(16) {
        let ndt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }
    if padded(19) {
        let ndt =
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }
    Err(invalid())
}

/// A calendar-style resampling interval (pandas offset alias subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    /// A fixed-length interval, in seconds.
    Fixed(i64),
    /// Calendar months (`MS`/`M`), `n` months per bucket.
    Months(u32),
    /// Calendar years (`YS`/`Y`/`AS`/`A`), `n` years per bucket.
    Years(u32),
}

impl Frequency {
    /// Parse codes such as `1h`, `6H`, `D`, `30min`, `15T`, `W`, `MS`, `YS`.
    pub fn parse(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ZampyError::InvalidFrequency(code.to_string()))?;
        let (count, unit) = trimmed.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| ZampyError::InvalidFrequency(code.to_string()))?
        };
        if count <= 0 {
            return Err(ZampyError::InvalidFrequency(code.to_string()));
        }

        let seconds = match unit {
            "s" | "S" => 1,
            "min" | "T" => 60,
            "h" | "H" => 3600,
            "D" | "d" => 86_400,
            "W" | "w" => 7 * 86_400,
            "MS" | "M" => return Ok(Frequency::Months(count as u32)),
            "YS" | "Y" | "AS" | "A" => return Ok(Frequency::Years(count as u32)),
            _ => return Err(ZampyError::InvalidFrequency(code.to_string())),
        };
        Ok(Frequency::Fixed(count * seconds))
    }

    /// Length of the shortest bucket this frequency produces: 28-day months,
    /// 365-day years.
    pub fn shortest_seconds(&self) -> i64 {
        match self {
            Frequency::Fixed(s) => *s,
            Frequency::Months(n) => i64::from(*n) * 28 * 86_400,
            Frequency::Years(n) => i64::from(*n) * 365 * 86_400,
        }
    }

    /// Length of the longest bucket this frequency produces: 31-day months,
    /// 366-day years.
    pub fn longest_seconds(&self) -> i64 {
        match self {
            Frequency::Fixed(s) => *s,
            Frequency::Months(n) => i64::from(*n) * 31 * 86_400,
            Frequency::Years(n) => i64::from(*n) * 366 * 86_400,
        }
    }

    /// True if buckets of this frequency can be shorter than data sampled
    /// every `native_seconds`. Calendar codes are compared by their longest
    /// bucket, so `YS` accepts yearly data across leap years.
    pub fn is_finer_than(&self, native_seconds: i64) -> bool {
        self.longest_seconds() < native_seconds
    }

    /// Start of the bucket containing `t`. Fixed buckets are aligned to the
    /// Unix epoch, which for intervals dividing a day means midnight.
    pub fn bucket_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Fixed(s) => {
                let secs = t.timestamp().div_euclid(*s) * s;
                Utc.timestamp_opt(secs, 0).single().unwrap_or(t)
            }
            Frequency::Months(n) => {
                let index = t.year() * 12 + t.month0() as i32;
                let aligned = index - index.rem_euclid(*n as i32);
                Utc.with_ymd_and_hms(aligned.div_euclid(12), aligned.rem_euclid(12) as u32 + 1, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(t)
            }
            Frequency::Years(n) => {
                let year = t.year() - t.year().rem_euclid(*n as i32);
                Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single().unwrap_or(t)
            }
        }
    }

    /// Exact length in seconds of the bucket starting at `start`.
    pub fn bucket_seconds(&self, start: DateTime<Utc>) -> i64 {
        match self {
            Frequency::Fixed(s) => *s,
            Frequency::Months(n) => (add_months(start, *n) - start).num_seconds(),
            Frequency::Years(n) => (add_months(start, 12 * n) - start).num_seconds(),
        }
    }

    /// Canonical code, used in artifact names.
    pub fn code(&self) -> String {
        match self {
            Frequency::Fixed(s) if s % 86_400 == 0 => format!("{}D", s / 86_400),
            Frequency::Fixed(s) if s % 3600 == 0 => format!("{}h", s / 3600),
            Frequency::Fixed(s) if s % 60 == 0 => format!("{}min", s / 60),
            Frequency::Fixed(s) => format!("{}s", s),
            Frequency::Months(n) => format!("{}MS", n),
            Frequency::Years(n) => format!("{}YS", n),
        }
    }
}

/// Decode a CF time axis (`"<unit> since <reference>"`) into UTC instants.
pub fn decode_cf_time(values: &[f64], units: &str) -> Result<Vec<DateTime<Utc>>> {
    let bad = || ZampyError::Serialization(format!("unsupported CF time units '{}'", units));
    let (unit, reference) = units.split_once(" since ").ok_or_else(bad)?;

    let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "seconds" | "second" | "secs" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "h" => 3600.0,
        "days" | "day" | "d" => 86_400.0,
        _ => return Err(bad()),
    };
    let reference = parse_cf_reference(reference.trim()).ok_or_else(bad)?;

    values
        .iter()
        .map(|v| {
            if !v.is_finite() {
                return Err(bad());
            }
            let millis = (v * seconds_per_unit * 1000.0).round() as i64;
            Ok(reference + Duration::milliseconds(millis))
        })
        .collect()
}

fn parse_cf_reference(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let s = s.trim_end_matches(" UTC").trim_end_matches('Z');
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Median spacing of a time axis in seconds, or `None` for fewer than two
/// steps.
pub fn median_step_seconds(times: &[DateTime<Utc>]) -> Option<i64> {
    if times.len() < 2 {
        return None;
    }
    let mut steps: Vec<i64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .collect();
    steps.sort_unstable();
    Some(steps[steps.len() / 2])
}
