//! Temporal data types and time handling

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp representing a point in time with nanosecond precision.
///
/// Arithmetic saturates at the representable bounds (about 1677 to 2262).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch
    nanos: i64,
}

impl Timestamp {
    /// Create a timestamp from nanoseconds since Unix epoch
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from microseconds since Unix epoch
    pub fn from_micros(micros: i64) -> Self {
        Self {
            nanos: micros.saturating_mul(1_000),
        }
    }

    /// Create a timestamp from milliseconds since Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    /// Create a timestamp from seconds since Unix epoch
    pub fn from_secs(secs: i64) -> Self {
        Self {
            nanos: secs.saturating_mul(1_000_000_000),
        }
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Get nanoseconds since Unix epoch
    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    /// Get seconds since Unix epoch
    pub fn as_secs(&self) -> i64 {
        self.nanos.div_euclid(1_000_000_000)
    }

    /// Convert to chrono DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.as_secs(), self.nanos.rem_euclid(1_000_000_000) as u32)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Add duration in nanoseconds
    pub fn add_nanos(&self, nanos: i64) -> Self {
        Self {
            nanos: self.nanos.saturating_add(nanos),
        }
    }

    /// Subtract duration in nanoseconds
    pub fn sub_nanos(&self, nanos: i64) -> Self {
        Self {
            nanos: self.nanos.saturating_sub(nanos),
        }
    }

    /// Add whole seconds
    pub fn add_secs(&self, secs: i64) -> Self {
        self.add_nanos(secs.saturating_mul(1_000_000_000))
    }

    /// Subtract whole seconds
    pub fn sub_secs(&self, secs: i64) -> Self {
        self.sub_nanos(secs.saturating_mul(1_000_000_000))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            nanos: dt.timestamp_nanos_opt().unwrap_or(0),
        }
    }
}

/// Half-open interval `[start, end)`; `end == None` is the unbounded future.
///
/// Used for both application-time `validity` and transaction-time
/// `system_period`. A range is never empty: `start < end` whenever `end`
/// is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalRange {
    start: Timestamp,
    end: Option<Timestamp>,
}

impl TemporalRange {
    /// Create a range, rejecting empty or inverted bounds
    pub fn new(start: Timestamp, end: Option<Timestamp>) -> Result<Self> {
        match end {
            Some(end) if end <= start => Err(Error::Schema(format!(
                "range end {end} must be after start {start}"
            ))),
            _ => Ok(Self { start, end }),
        }
    }

    /// Create an open-ended range `[start, +inf)`
    pub fn from(start: Timestamp) -> Self {
        Self { start, end: None }
    }

    /// Create a bounded range
    pub fn between(start: Timestamp, end: Timestamp) -> Result<Self> {
        Self::new(start, Some(end))
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    /// Whether the range extends into the unbounded future
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Point-in-time membership: `start <= ts AND (end absent OR ts < end)`
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && self.end.map(|e| ts < e).unwrap_or(true)
    }

    /// Range overlap (`&&`)
    pub fn overlaps(&self, other: &TemporalRange) -> bool {
        let self_before_other_ends = other.end.map(|e| self.start < e).unwrap_or(true);
        let other_before_self_ends = self.end.map(|e| other.start < e).unwrap_or(true);
        self_before_other_ends && other_before_self_ends
    }

    /// Close the range at `end`, producing `[start, end)`
    pub fn close_at(&self, end: Timestamp) -> Result<Self> {
        Self::new(self.start, Some(end))
    }

    /// PostgreSQL `tstzrange` literal
    pub fn to_sql_literal(&self) -> String {
        match self.end {
            Some(end) => format!("'[\"{}\",\"{}\")'", self.start, end),
            None => format!("'[\"{}\",)'", self.start),
        }
    }
}

impl fmt::Display for TemporalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, )", self.start),
        }
    }
}
