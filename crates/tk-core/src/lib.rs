//! Core domain model for therapy schedules and treatment records.
//!
//! This crate contains the fundamental types and logic for:
//! - Time grids: the fixed discretization of a day into slots
//! - Schedules: basal rate, sensitivity and target profiles over a grid
//! - Treatment records: glucose, carbohydrate and insulin events

pub mod grid;
pub mod profile;
pub mod schedule;
pub mod treatment;
pub mod types;
pub mod units;

pub use grid::TimeGrid;
pub use profile::{ProfileDocument, ProfileEntry};
pub use schedule::{
    AllowedDomain, BasalRate, Schedule, ScheduleEntry, ScheduleKind, ScheduleValue, Sensitivity,
    TargetRange, TherapyProfile,
};
pub use treatment::{TreatmentKind, TreatmentPayload, TreatmentRecord, assign_group};
pub use types::{GroupId, RecordId, SyncId, ValidationError};
pub use units::GlucoseUnit;
