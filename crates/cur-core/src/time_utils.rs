use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CostError, Result};

/// Naive layouts accepted for `lineItem/UsageStartDate`, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

// ── Timestamp parsing ─────────────────────────────────────────────────────────

/// Parse a CUR usage timestamp into a UTC [`DateTime`].
///
/// The CUR layout is `YYYY-MM-DDTHH:MM:SSZ`; any RFC 3339 offset and the
/// naive forms in [`NAIVE_FORMATS`] are accepted as well. Returns `None` for
/// empty or unrecognised strings.
pub fn parse_usage_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    debug!("could not parse usage timestamp \"{}\"", s);
    None
}

/// Parse a date-range bound given on the command line.
///
/// Accepts a bare `YYYY-MM-DD` date (midnight UTC) or anything
/// [`parse_usage_timestamp`] understands.
pub fn parse_date_bound(s: &str) -> Result<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    parse_usage_timestamp(trimmed).ok_or_else(|| CostError::TimestampParse(s.to_string()))
}

// ── DateRange ─────────────────────────────────────────────────────────────────

/// Half-open `[start, end)` window over usage start dates.
///
/// Either bound may be open. A record without a start date never falls
/// inside a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Build a range, rejecting `start >= end` when both are present.
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Err(CostError::InvalidDateRange(format!(
                    "start {} is not before end {}",
                    s.to_rfc3339(),
                    e.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// `true` when neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: Option<DateTime<Utc>>) -> bool {
        let Some(ts) = ts else {
            return false;
        };
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
