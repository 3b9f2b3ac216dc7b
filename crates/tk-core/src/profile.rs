//! Persisted, human-auditable schedule documents.
//!
//! ```json
//! {
//!   "kind": "basal",
//!   "entries": [
//!     { "start": "00:00:00", "minutes": 0, "rate": 1.0 },
//!     { "start": "02:00:00", "minutes": 120, "rate": 1.2 }
//!   ]
//! }
//! ```
//!
//! `start` is a UTC wall-clock time without a date and is informational
//! only. Slots are derived from `minutes`, which must start at 0 and
//! increase strictly.

use serde::{Deserialize, Serialize};

use crate::grid::TimeGrid;
use crate::schedule::{Schedule, ScheduleEntry, ScheduleKind, ScheduleValue};
use crate::types::ValidationError;
use crate::units::GlucoseUnit;

const START_FORMAT: &str = "%H:%M:%S";

/// One entry of a persisted schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry<V> {
    pub start: String,
    pub minutes: u32,
    #[serde(flatten)]
    pub value: V,
}

/// A persisted schedule of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument<V> {
    pub kind: ScheduleKind,
    /// Unit of glucose-valued entries; absent for basal schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<GlucoseUnit>,
    pub entries: Vec<ProfileEntry<V>>,
}

impl<V: ScheduleValue> Schedule<V> {
    /// Converts the schedule into its document form, expressed in `unit`.
    pub fn to_document(&self, unit: GlucoseUnit) -> ProfileDocument<V> {
        let grid = self.grid();
        let entries = self
            .entries()
            .iter()
            .map(|entry| ProfileEntry {
                start: grid.time_at(entry.slot).format(START_FORMAT).to_string(),
                minutes: grid.minutes_at(entry.slot),
                value: entry.value.to_unit(unit),
            })
            .collect();
        ProfileDocument {
            kind: V::KIND,
            units: V::KIND.is_glucose_valued().then_some(unit),
            entries,
        }
    }
}

impl<V: ScheduleValue> ProfileDocument<V> {
    /// Parses the document back into a schedule on `grid`.
    pub fn into_schedule(self, grid: TimeGrid) -> Result<Schedule<V>, ValidationError> {
        if self.kind != V::KIND {
            return Err(invalid(format!(
                "expected a {} profile, found {}",
                V::KIND,
                self.kind
            )));
        }
        let unit = self.units.unwrap_or_default();

        let mut entries = Vec::with_capacity(self.entries.len());
        let mut previous: Option<u32> = None;
        for entry in self.entries {
            match previous {
                None if entry.minutes != 0 => {
                    return Err(invalid(format!(
                        "first entry must start at minute 0, found {}",
                        entry.minutes
                    )));
                }
                Some(prev) if entry.minutes <= prev => {
                    return Err(invalid(format!(
                        "minutes must increase: {} follows {prev}",
                        entry.minutes
                    )));
                }
                _ => {}
            }
            let slot = grid.slot_at_minutes(entry.minutes).ok_or_else(|| {
                invalid(format!(
                    "minute {} is not a {}-minute slot boundary within the day",
                    entry.minutes,
                    grid.slot_minutes()
                ))
            })?;
            previous = Some(entry.minutes);
            entries.push(ScheduleEntry::new(slot, entry.value.from_unit(unit)));
        }
        Ok(Schedule::new(grid, entries))
    }
}

fn invalid(reason: String) -> ValidationError {
    ValidationError::InvalidProfile { reason }
}
