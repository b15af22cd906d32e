use crate::domain::interval::{Interval, sum_durations};
use crate::domain::models::{DomainError, Task};
use chrono::TimeDelta;

impl Task {
    /// Pairs the raw `times` list into intervals, element `2i` being the start
    /// and `2i + 1` the stop of interval `i`.
    pub fn intervals(&self) -> Result<Vec<Interval>, DomainError> {
        if self.times.len() % 2 != 0 {
            return Err(DomainError::OddTimeList {
                task_id: self.id.clone(),
                len: self.times.len(),
            });
        }
        self.times
            .chunks_exact(2)
            .map(|pair| Interval::from_millis(pair[0], pair[1]))
            .collect()
    }

    /// Intervals touching `window`, returned whole.
    pub fn intervals_overlapping(&self, window: &Interval) -> Result<Vec<Interval>, DomainError> {
        Ok(self
            .intervals()?
            .into_iter()
            .filter(|interval| interval.overlaps(window))
            .collect())
    }

    /// Intervals touching `window`, each cut down to the part inside it.
    pub fn clipped_intervals_overlapping(
        &self,
        window: &Interval,
    ) -> Result<Vec<Interval>, DomainError> {
        Ok(self
            .intervals()?
            .iter()
            .filter_map(|interval| interval.intersection(window))
            .collect())
    }

    pub fn time_spent(&self, window: &Interval) -> Result<TimeDelta, DomainError> {
        let clipped = self.clipped_intervals_overlapping(window)?;
        Ok(sum_durations(clipped.iter().map(Interval::duration)))
    }

    pub fn has_time_in(&self, window: &Interval) -> Result<bool, DomainError> {
        Ok(self
            .intervals()?
            .iter()
            .any(|interval| interval.overlaps(window)))
    }
}
