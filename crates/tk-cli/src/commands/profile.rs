//! Profile commands: print and replace therapy schedules.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};
use tk_core::schedule::total_daily;
use tk_core::{
    BasalRate, GlucoseUnit, Schedule, ScheduleEntry, ScheduleKind, ScheduleValue, Sensitivity,
    TargetRange, TherapyProfile, TimeGrid,
};
use tk_sync::{RecordStore, SaveOutcome, ScheduleEditor, SqliteStore};

use super::format_glucose;
use crate::Config;

/// How schedule values are typed in and printed.
trait CliValue: ScheduleValue {
    /// Parses a value typed in `unit` into canonical form.
    fn parse(raw: &str, unit: GlucoseUnit) -> Result<Self>;

    /// Formats a value already converted to `unit`.
    fn render(&self, unit: GlucoseUnit) -> String;

    /// Extra line printed below the entries.
    fn summary(_grid: TimeGrid, _entries: &[ScheduleEntry<Self>]) -> Option<String> {
        None
    }
}

fn parse_number(raw: &str) -> Result<f64> {
    raw.trim()
        .parse()
        .with_context(|| format!("invalid number {raw:?}"))
}

impl CliValue for BasalRate {
    fn parse(raw: &str, _unit: GlucoseUnit) -> Result<Self> {
        Ok(Self::new(parse_number(raw)?))
    }

    fn render(&self, _unit: GlucoseUnit) -> String {
        format!("{:.2} U/h", self.rate)
    }

    fn summary(grid: TimeGrid, entries: &[ScheduleEntry<Self>]) -> Option<String> {
        Some(format!("Total: {:.2} U/day", total_daily(grid, entries)))
    }
}

impl CliValue for Sensitivity {
    fn parse(raw: &str, unit: GlucoseUnit) -> Result<Self> {
        Ok(Self::new(parse_number(raw)?).from_unit(unit))
    }

    fn render(&self, unit: GlucoseUnit) -> String {
        format!("{} {unit}/U", format_glucose(self.sensitivity, unit))
    }
}

impl CliValue for TargetRange {
    fn parse(raw: &str, unit: GlucoseUnit) -> Result<Self> {
        let (low, high) = raw
            .split_once('-')
            .with_context(|| format!("expected a target range low-high, got {raw:?}"))?;
        Ok(Self::new(parse_number(low)?, parse_number(high)?).from_unit(unit))
    }

    fn render(&self, unit: GlucoseUnit) -> String {
        format!(
            "{}-{} {unit}",
            format_glucose(self.low, unit),
            format_glucose(self.high, unit)
        )
    }
}

/// Prints the stored schedule of `kind`.
pub async fn show<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    config: &Config,
    kind: ScheduleKind,
    json: bool,
) -> Result<()> {
    let grid = config.grid()?;
    let unit = config.glucose_unit;
    let profile = store
        .fetch_profile(kind)
        .await
        .with_context(|| format!("failed to load {kind} schedule"))?;

    if json {
        return match profile.unwrap_or_else(|| empty_profile(kind, grid)) {
            TherapyProfile::Basal(schedule) => write_document(writer, &schedule, unit),
            TherapyProfile::Sensitivity(schedule) => write_document(writer, &schedule, unit),
            TherapyProfile::Target(schedule) => write_document(writer, &schedule, unit),
        };
    }

    let Some(profile) = profile else {
        writeln!(writer, "No {kind} schedule stored.")?;
        return Ok(());
    };
    match profile {
        TherapyProfile::Basal(schedule) => render(writer, &schedule, unit),
        TherapyProfile::Sensitivity(schedule) => render(writer, &schedule, unit),
        TherapyProfile::Target(schedule) => render(writer, &schedule, unit),
    }
}

/// Replaces the schedule of `kind` with `entries`.
pub async fn set<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    config: &Config,
    kind: ScheduleKind,
    entries: &[String],
) -> Result<()> {
    match kind {
        ScheduleKind::Basal => edit::<BasalRate, W>(writer, store, config, entries).await,
        ScheduleKind::Sensitivity => edit::<Sensitivity, W>(writer, store, config, entries).await,
        ScheduleKind::Target => edit::<TargetRange, W>(writer, store, config, entries).await,
    }
}

async fn edit<V: CliValue, W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    config: &Config,
    raw: &[String],
) -> Result<()> {
    let grid = config.grid()?;
    let unit = config.glucose_unit;
    let entries = parse_entries::<V>(raw, grid, unit)?;

    let mut editor =
        ScheduleEditor::<V>::open(Arc::new(store.clone()), None, grid, unit).await?;
    editor.set_entries(entries);
    match editor
        .save()
        .await
        .with_context(|| format!("failed to save {} schedule", V::KIND))?
    {
        SaveOutcome::Unchanged => writeln!(writer, "{} schedule unchanged.", V::KIND)?,
        SaveOutcome::Saved(upload) => {
            let status = upload.wait().await;
            tracing::debug!(?status, kind = %V::KIND, "profile upload finished");
            writeln!(writer, "Saved {} schedule.", V::KIND)?;
        }
    }

    render(writer, &Schedule::new(grid, editor.entries()), unit)
}

/// Parses `HH:MM=value` arguments into entries on `grid`.
fn parse_entries<V: CliValue>(
    raw: &[String],
    grid: TimeGrid,
    unit: GlucoseUnit,
) -> Result<Vec<ScheduleEntry<V>>> {
    raw.iter()
        .map(|arg| {
            let (time, value) = arg
                .split_once('=')
                .with_context(|| format!("expected HH:MM=value, got {arg:?}"))?;
            let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
                .with_context(|| format!("invalid time {time:?}"))?;
            let minutes = time.num_seconds_from_midnight() / 60;
            let slot = grid.slot_at_minutes(minutes).with_context(|| {
                format!(
                    "{} is not on a {}-minute slot boundary",
                    time.format("%H:%M"),
                    grid.slot_minutes()
                )
            })?;
            Ok(ScheduleEntry::new(slot, V::parse(value, unit)?))
        })
        .collect()
}

fn render<V: CliValue, W: Write>(
    writer: &mut W,
    schedule: &Schedule<V>,
    unit: GlucoseUnit,
) -> Result<()> {
    let grid = schedule.grid();
    writeln!(writer, "{} schedule:", V::KIND)?;
    for entry in schedule.entries() {
        writeln!(
            writer,
            "{}  {}",
            grid.time_at(entry.slot).format("%H:%M"),
            entry.value.to_unit(unit).render(unit)
        )?;
    }
    if let Some(summary) = V::summary(grid, schedule.entries()) {
        writeln!(writer, "{summary}")?;
    }
    Ok(())
}

fn write_document<V: ScheduleValue, W: Write>(
    writer: &mut W,
    schedule: &Schedule<V>,
    unit: GlucoseUnit,
) -> Result<()> {
    let document = schedule.to_document(unit);
    writeln!(writer, "{}", serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

const fn empty_profile(kind: ScheduleKind, grid: TimeGrid) -> TherapyProfile {
    match kind {
        ScheduleKind::Basal => TherapyProfile::Basal(Schedule::empty(grid)),
        ScheduleKind::Sensitivity => TherapyProfile::Sensitivity(Schedule::empty(grid)),
        ScheduleKind::Target => TherapyProfile::Target(Schedule::empty(grid)),
    }
}
