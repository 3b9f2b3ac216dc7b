//! Fixed discretization of a day into equal slots.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// Minutes in one day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// A day split into `slots` slots of `slot_minutes` minutes each.
///
/// Slot `i` denotes the instant `i * slot_minutes` after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct TimeGrid {
    slots: usize,
    slot_minutes: u32,
}

/// Unchecked wire form of [`TimeGrid`].
#[derive(Deserialize)]
struct RawGrid {
    slots: usize,
    slot_minutes: u32,
}

impl TryFrom<RawGrid> for TimeGrid {
    type Error = ValidationError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        Self::new(raw.slots, raw.slot_minutes)
    }
}

impl TimeGrid {
    /// 48 half-hour slots.
    pub const DEFAULT: Self = Self {
        slots: 48,
        slot_minutes: 30,
    };

    /// Creates a grid, rejecting any that does not cover exactly one day.
    pub fn new(slots: usize, slot_minutes: u32) -> Result<Self, ValidationError> {
        let covers_day = u32::try_from(slots)
            .ok()
            .and_then(|n| n.checked_mul(slot_minutes))
            == Some(MINUTES_PER_DAY);
        if slots == 0 || slot_minutes == 0 || !covers_day {
            return Err(ValidationError::InvalidGrid {
                slots,
                slot_minutes,
            });
        }
        Ok(Self {
            slots,
            slot_minutes,
        })
    }

    /// Creates a grid from its slot duration alone.
    pub fn with_slot_minutes(slot_minutes: u32) -> Result<Self, ValidationError> {
        if slot_minutes == 0 || MINUTES_PER_DAY % slot_minutes != 0 {
            return Err(ValidationError::InvalidGrid {
                slots: 0,
                slot_minutes,
            });
        }
        Self::new((MINUTES_PER_DAY / slot_minutes) as usize, slot_minutes)
    }

    #[must_use]
    pub const fn slots(&self) -> usize {
        self.slots
    }

    #[must_use]
    pub const fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    /// Index of the final slot, `N - 1`.
    #[must_use]
    pub const fn last_slot(&self) -> usize {
        self.slots - 1
    }

    #[must_use]
    pub const fn contains(&self, slot: usize) -> bool {
        slot < self.slots
    }

    /// Minutes from midnight at which `slot` starts.
    ///
    /// `slot == N` yields the end of the day.
    #[must_use]
    pub fn minutes_at(&self, slot: usize) -> u32 {
        let slot = u32::try_from(slot.min(self.slots)).unwrap_or(u32::MAX);
        slot * self.slot_minutes
    }

    /// Wall-clock start of `slot`.
    #[must_use]
    pub fn time_at(&self, slot: usize) -> NaiveTime {
        let minutes = self.minutes_at(slot) % MINUTES_PER_DAY;
        NaiveTime::from_num_seconds_from_midnight_opt(minutes * 60, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Slot starting exactly at `minutes` after midnight, if any.
    #[must_use]
    pub fn slot_at_minutes(&self, minutes: u32) -> Option<usize> {
        if minutes % self.slot_minutes != 0 {
            return None;
        }
        let slot = (minutes / self.slot_minutes) as usize;
        self.contains(slot).then_some(slot)
    }

    /// Slot whose interval contains `time`.
    #[must_use]
    pub fn slot_containing(&self, time: NaiveTime) -> usize {
        let minutes = time.num_seconds_from_midnight() / 60;
        ((minutes / self.slot_minutes) as usize).min(self.last_slot())
    }

    /// Hours between the start of slot `from` and the start of slot `to`.
    #[must_use]
    pub fn hours_between(&self, from: usize, to: usize) -> f64 {
        let minutes = self.minutes_at(to).saturating_sub(self.minutes_at(from));
        f64::from(minutes) / 60.0
    }
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_is_half_hours() {
        let grid = TimeGrid::default();
        assert_eq!(grid.slots(), 48);
        assert_eq!(grid.slot_minutes(), 30);
        assert_eq!(grid.last_slot(), 47);
    }

    #[test]
    fn grid_must_cover_one_day() {
        assert!(TimeGrid::new(48, 30).is_ok());
        assert!(TimeGrid::new(24, 60).is_ok());
        assert!(TimeGrid::new(48, 20).is_err());
        assert!(TimeGrid::new(0, 30).is_err());
        assert!(TimeGrid::with_slot_minutes(7).is_err());
        assert_eq!(TimeGrid::with_slot_minutes(60).unwrap().slots(), 24);
    }

    #[test]
    fn deserializing_checks_day_coverage() {
        let grid: TimeGrid = serde_json::from_str(r#"{"slots":24,"slot_minutes":60}"#).unwrap();
        assert_eq!(grid.last_slot(), 23);

        let empty: Result<TimeGrid, _> = serde_json::from_str(r#"{"slots":0,"slot_minutes":30}"#);
        assert!(empty.is_err());
        let short: Result<TimeGrid, _> = serde_json::from_str(r#"{"slots":10,"slot_minutes":30}"#);
        assert!(short.is_err());
    }

    #[test]
    fn slot_times() {
        let grid = TimeGrid::default();
        assert_eq!(grid.minutes_at(4), 120);
        assert_eq!(grid.time_at(4), NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(grid.time_at(47), NaiveTime::from_hms_opt(23, 30, 0).unwrap());
        assert_eq!(grid.minutes_at(48), MINUTES_PER_DAY);
    }

    #[test]
    fn slot_lookup_by_minutes_requires_boundary() {
        let grid = TimeGrid::default();
        assert_eq!(grid.slot_at_minutes(0), Some(0));
        assert_eq!(grid.slot_at_minutes(90), Some(3));
        assert_eq!(grid.slot_at_minutes(95), None);
        assert_eq!(grid.slot_at_minutes(MINUTES_PER_DAY), None);
    }

    #[test]
    fn slot_containing_rounds_down() {
        let grid = TimeGrid::default();
        let time = NaiveTime::from_hms_opt(2, 59, 59).unwrap();
        assert_eq!(grid.slot_containing(time), 5);
    }

    #[test]
    fn hours_between_slots() {
        let grid = TimeGrid::default();
        assert!((grid.hours_between(0, 4) - 2.0).abs() < f64::EPSILON);
        assert!((grid.hours_between(4, 48) - 22.0).abs() < f64::EPSILON);
    }
}
