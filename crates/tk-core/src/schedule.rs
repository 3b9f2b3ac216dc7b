//! Time-indexed therapy schedules.
//!
//! A [`Schedule`] maps grid slots to values of one kind (basal rate,
//! insulin sensitivity or target range). Every constructor normalizes the
//! entries so that the following always hold:
//!
//! - slots are unique and ascending
//! - the first entry starts at slot 0, so the schedule covers from midnight
//! - an entry stays active until the next entry's slot, or the end of the day
//!
//! Normalization never rejects input. Duplicated slots resolve to the entry
//! that appears later in the input, out-of-grid slots are dropped and values
//! are snapped onto the kind's [`AllowedDomain`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::grid::TimeGrid;
use crate::types::ValidationError;
use crate::units::{GlucoseUnit, round_to};

/// The kinds of schedule a therapy profile consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Basal insulin rate in units per hour.
    Basal,
    /// Insulin sensitivity in mg/dL per unit.
    Sensitivity,
    /// Target glucose range in mg/dL.
    Target,
}

impl ScheduleKind {
    pub const ALL: [Self; 3] = [Self::Basal, Self::Sensitivity, Self::Target];

    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Basal => "basal",
            Self::Sensitivity => "sensitivity",
            Self::Target => "target",
        }
    }

    /// Whether values of this kind are glucose quantities.
    #[must_use]
    pub const fn is_glucose_valued(&self) -> bool {
        !matches!(self, Self::Basal)
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basal" => Ok(Self::Basal),
            "sensitivity" | "isf" => Ok(Self::Sensitivity),
            "target" | "targets" => Ok(Self::Target),
            _ => Err(ValidationError::InvalidScheduleKind {
                value: s.to_string(),
            }),
        }
    }
}

/// The discrete set of values a schedule kind accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllowedDomain {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    decimals: i32,
}

impl AllowedDomain {
    #[must_use]
    pub const fn new(min: f64, max: f64, step: f64, decimals: i32) -> Self {
        Self {
            min,
            max,
            step,
            decimals,
        }
    }

    /// Clamps `value` into range and rounds it to the nearest step.
    ///
    /// NaN becomes the minimum.
    #[must_use]
    pub fn snap(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        round_to(self.min + steps * self.step, self.decimals).min(self.max)
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.snap(value) - value).abs() < 1e-9
    }

    /// Every allowed value, ascending.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let count = ((self.max - self.min) / self.step).round() as usize;
        (0..=count).map(move |i| round_to(self.min + i as f64 * self.step, self.decimals))
    }
}

/// Basal rates from 0 to 30 U/h in 0.05 U/h steps.
pub const BASAL_DOMAIN: AllowedDomain = AllowedDomain::new(0.0, 30.0, 0.05, 2);
/// Sensitivities from 9 to 540 mg/dL/U.
pub const SENSITIVITY_DOMAIN: AllowedDomain = AllowedDomain::new(9.0, 540.0, 1.0, 0);
/// Target bounds from 72 to 180 mg/dL.
pub const TARGET_DOMAIN: AllowedDomain = AllowedDomain::new(72.0, 180.0, 1.0, 0);

/// A value that can populate a schedule of a specific kind.
///
/// Values are held in canonical units (U/h, mg/dL). The unit conversions are
/// only applied at presentation and export boundaries.
pub trait ScheduleValue:
    Copy + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ScheduleKind;

    /// Value given to the first entry of an empty schedule.
    fn default_value() -> Self;

    /// Snaps the value onto the kind's allowed domain.
    #[must_use]
    fn snapped(self) -> Self;

    /// Converts a canonical value into `unit`.
    #[must_use]
    fn to_unit(self, unit: GlucoseUnit) -> Self;

    /// Converts a value expressed in `unit` into canonical form.
    #[must_use]
    fn from_unit(self, unit: GlucoseUnit) -> Self;

    fn into_profile(schedule: Schedule<Self>) -> TherapyProfile;

    fn from_profile(profile: TherapyProfile) -> Option<Schedule<Self>>;
}

/// A basal insulin rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasalRate {
    /// Units per hour.
    pub rate: f64,
}

impl BasalRate {
    #[must_use]
    pub const fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl ScheduleValue for BasalRate {
    const KIND: ScheduleKind = ScheduleKind::Basal;

    fn default_value() -> Self {
        Self::new(1.0)
    }

    fn snapped(self) -> Self {
        Self::new(BASAL_DOMAIN.snap(self.rate))
    }

    fn to_unit(self, _unit: GlucoseUnit) -> Self {
        self
    }

    fn from_unit(self, _unit: GlucoseUnit) -> Self {
        self
    }

    fn into_profile(schedule: Schedule<Self>) -> TherapyProfile {
        TherapyProfile::Basal(schedule)
    }

    fn from_profile(profile: TherapyProfile) -> Option<Schedule<Self>> {
        match profile {
            TherapyProfile::Basal(schedule) => Some(schedule),
            _ => None,
        }
    }
}

/// Insulin sensitivity: glucose drop per unit of insulin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sensitivity {
    pub sensitivity: f64,
}

impl Sensitivity {
    #[must_use]
    pub const fn new(sensitivity: f64) -> Self {
        Self { sensitivity }
    }
}

impl ScheduleValue for Sensitivity {
    const KIND: ScheduleKind = ScheduleKind::Sensitivity;

    fn default_value() -> Self {
        Self::new(50.0)
    }

    fn snapped(self) -> Self {
        Self::new(SENSITIVITY_DOMAIN.snap(self.sensitivity))
    }

    fn to_unit(self, unit: GlucoseUnit) -> Self {
        Self::new(unit.from_mg_dl(self.sensitivity))
    }

    fn from_unit(self, unit: GlucoseUnit) -> Self {
        Self::new(unit.to_mg_dl(self.sensitivity))
    }

    fn into_profile(schedule: Schedule<Self>) -> TherapyProfile {
        TherapyProfile::Sensitivity(schedule)
    }

    fn from_profile(profile: TherapyProfile) -> Option<Schedule<Self>> {
        match profile {
            TherapyProfile::Sensitivity(schedule) => Some(schedule),
            _ => None,
        }
    }
}

/// A target glucose range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub low: f64,
    pub high: f64,
}

impl TargetRange {
    #[must_use]
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }
}

impl ScheduleValue for TargetRange {
    const KIND: ScheduleKind = ScheduleKind::Target;

    fn default_value() -> Self {
        Self::new(100.0, 100.0)
    }

    fn snapped(self) -> Self {
        let low = TARGET_DOMAIN.snap(self.low);
        let high = TARGET_DOMAIN.snap(self.high);
        if low > high {
            Self::new(high, low)
        } else {
            Self::new(low, high)
        }
    }

    fn to_unit(self, unit: GlucoseUnit) -> Self {
        Self::new(unit.from_mg_dl(self.low), unit.from_mg_dl(self.high))
    }

    fn from_unit(self, unit: GlucoseUnit) -> Self {
        Self::new(unit.to_mg_dl(self.low), unit.to_mg_dl(self.high))
    }

    fn into_profile(schedule: Schedule<Self>) -> TherapyProfile {
        TherapyProfile::Target(schedule)
    }

    fn from_profile(profile: TherapyProfile) -> Option<Schedule<Self>> {
        match profile {
            TherapyProfile::Target(schedule) => Some(schedule),
            _ => None,
        }
    }
}

/// One slot → value assignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry<V> {
    pub slot: usize,
    #[serde(flatten)]
    pub value: V,
}

impl<V> ScheduleEntry<V> {
    pub const fn new(slot: usize, value: V) -> Self {
        Self { slot, value }
    }
}

/// An ordered, deduplicated schedule over a [`TimeGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule<V> {
    grid: TimeGrid,
    entries: Vec<ScheduleEntry<V>>,
}

impl<V: ScheduleValue> Schedule<V> {
    /// Builds a schedule, normalizing the entries.
    pub fn new(grid: TimeGrid, entries: impl IntoIterator<Item = ScheduleEntry<V>>) -> Self {
        Self {
            grid,
            entries: normalize(grid, entries),
        }
    }

    #[must_use]
    pub const fn empty(grid: TimeGrid) -> Self {
        Self {
            grid,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub const fn grid(&self) -> TimeGrid {
        self.grid
    }

    pub fn entries(&self) -> &[ScheduleEntry<V>] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ScheduleEntry<V>> {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Each entry paired with how long it stays active, in hours.
    pub fn active_durations(&self) -> impl Iterator<Item = (&ScheduleEntry<V>, f64)> + '_ {
        active_durations(self.grid, &self.entries)
    }

    /// The value in effect at wall-clock `time`.
    pub fn value_at(&self, time: NaiveTime) -> Option<V> {
        let slot = self.grid.slot_containing(time);
        self.entries
            .iter()
            .take_while(|entry| entry.slot <= slot)
            .last()
            .map(|entry| entry.value)
    }

    /// Whether both schedules assign the same values to the same slots.
    pub fn same_entries(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Schedule<BasalRate> {
    /// Total daily basal in units.
    #[must_use]
    pub fn total_daily(&self) -> f64 {
        total_daily(self.grid, &self.entries)
    }
}

/// Pairs entries with their active duration in hours.
///
/// `entries` must already be sorted by slot.
pub fn active_durations<V>(
    grid: TimeGrid,
    entries: &[ScheduleEntry<V>],
) -> impl Iterator<Item = (&ScheduleEntry<V>, f64)> + '_ {
    entries.iter().enumerate().map(move |(index, entry)| {
        let end = entries
            .get(index + 1)
            .map_or(grid.slots(), |next| next.slot);
        (entry, grid.hours_between(entry.slot, end))
    })
}

/// Sum of rate × active hours over sorted basal entries.
#[must_use]
pub fn total_daily(grid: TimeGrid, entries: &[ScheduleEntry<BasalRate>]) -> f64 {
    let total: f64 = active_durations(grid, entries)
        .map(|(entry, hours)| entry.value.rate * hours)
        .sum();
    round_to(total, 3)
}

/// Restores schedule invariants on an arbitrary entry list.
///
/// Later entries win over earlier ones sharing a slot.
pub fn normalize<V: ScheduleValue>(
    grid: TimeGrid,
    entries: impl IntoIterator<Item = ScheduleEntry<V>>,
) -> Vec<ScheduleEntry<V>> {
    let mut by_slot = BTreeMap::new();
    for entry in entries {
        if !grid.contains(entry.slot) {
            tracing::warn!(
                slot = entry.slot,
                slots = grid.slots(),
                kind = %V::KIND,
                "dropping schedule entry outside the grid"
            );
            continue;
        }
        by_slot.insert(entry.slot, entry.value.snapped());
    }

    let mut normalized: Vec<_> = by_slot
        .into_iter()
        .map(|(slot, value)| ScheduleEntry::new(slot, value))
        .collect();
    if let Some(first) = normalized.first_mut() {
        first.slot = 0;
    }
    normalized
}

/// A schedule of any kind, as exchanged with the record store.
#[derive(Debug, Clone, PartialEq)]
pub enum TherapyProfile {
    Basal(Schedule<BasalRate>),
    Sensitivity(Schedule<Sensitivity>),
    Target(Schedule<TargetRange>),
}

impl TherapyProfile {
    #[must_use]
    pub const fn kind(&self) -> ScheduleKind {
        match self {
            Self::Basal(_) => ScheduleKind::Basal,
            Self::Sensitivity(_) => ScheduleKind::Sensitivity,
            Self::Target(_) => ScheduleKind::Target,
        }
    }

    #[must_use]
    pub const fn grid(&self) -> TimeGrid {
        match self {
            Self::Basal(schedule) => schedule.grid(),
            Self::Sensitivity(schedule) => schedule.grid(),
            Self::Target(schedule) => schedule.grid(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Basal(schedule) => schedule.len(),
            Self::Sensitivity(schedule) => schedule.len(),
            Self::Target(schedule) => schedule.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The human-auditable document form, as JSON.
    pub fn document_json(&self, unit: GlucoseUnit) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Basal(schedule) => serde_json::to_value(schedule.to_document(unit)),
            Self::Sensitivity(schedule) => serde_json::to_value(schedule.to_document(unit)),
            Self::Target(schedule) => serde_json::to_value(schedule.to_document(unit)),
        }
    }
}
