use crate::domain::models::DomainError;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Half-open span of time `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        if end < start {
            return Err(DomainError::InvertedInterval {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Builds an interval from a pair of epoch milliseconds.
    pub fn from_millis(start_ms: i64, end_ms: i64) -> Result<Self, DomainError> {
        let start = millis_to_utc(start_ms)?;
        let end = millis_to_utc(end_ms)?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Overlapping part of both intervals, `None` when they are disjoint or only touch.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if self.end <= other.start || other.end <= self.start {
            return None;
        }
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end > start).then_some(Interval { start, end })
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.intersection(other).is_some()
    }
}

pub fn millis_to_utc(value: i64) -> Result<DateTime<Utc>, DomainError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or(DomainError::InvalidTimestamp(value))
}

pub fn sum_durations<I>(durations: I) -> TimeDelta
where
    I: IntoIterator<Item = TimeDelta>,
{
    durations
        .into_iter()
        .fold(TimeDelta::zero(), |total, duration| total + duration)
}
