//! Time-of-day buckets
//!
//! Parses `name=startHour-endHour[,...]` into ordered hour ranges used to
//! label completion times ("morning", "night", ...). Ranges whose start is
//! greater than (or equal to) their end wrap around midnight.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Default bucket layout covering the whole day
pub const DEFAULT_TIME_BUCKETS: &str = "morning=5-11,afternoon=11-17,evening=17-22,night=22-5";

/// A single named hour range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeBucket {
    /// Normal ranges are half-open `[start, end)`; wrap-around ranges match
    /// `hour >= start || hour < end`.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Ordered list of time buckets; the first match wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucketSpec {
    buckets: Vec<TimeBucket>,
}

impl TimeBucketSpec {
    /// Parse a spec string, failing on the first malformed segment
    pub fn parse(spec: &str) -> Result<Self> {
        let mut buckets = Vec::new();

        for segment in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            buckets.push(parse_segment(segment)?);
        }

        Ok(Self { buckets })
    }

    /// Name of the first bucket containing `hour`, if any
    pub fn lookup(&self, hour: u32) -> Option<&str> {
        self.buckets
            .iter()
            .find(|b| b.contains(hour))
            .map(|b| b.name.as_str())
    }

    pub fn buckets(&self) -> &[TimeBucket] {
        &self.buckets
    }

    /// Bucket names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl FromStr for TimeBucketSpec {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeBucketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .buckets
            .iter()
            .map(|b| format!("{}={}-{}", b.name, b.start_hour, b.end_hour))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

fn parse_segment(segment: &str) -> Result<TimeBucket> {
    let malformed = || {
        EngineError::ConfigError(format!(
            "time bucket segment '{}' is not of the form name=start-end",
            segment
        ))
    };

    let (name, range) = segment.split_once('=').ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() || range.contains('=') {
        return Err(malformed());
    }

    let (start, end) = range.split_once('-').ok_or_else(malformed)?;
    let start_hour = parse_hour(start).ok_or_else(malformed)?;
    let end_hour = parse_hour(end).ok_or_else(malformed)?;

    Ok(TimeBucket {
        name: name.to_string(),
        start_hour,
        end_hour,
    })
}

fn parse_hour(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|h| *h < 24)
}
