//! Records commands: add, list and delete treatment records.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tk_core::{
    GlucoseUnit, RecordId, TreatmentKind, TreatmentPayload, TreatmentRecord, assign_group,
};
use tk_sync::{DeletionOutcome, RecordStore, SqliteStore, SyncCoordinator, SyncError};

use super::format_glucose;
use crate::{Config, NewRecord};

/// Builds the records for `new`, timestamped `now` unless it says otherwise.
///
/// A carb entry with a bolus becomes a carb and an insulin record sharing a
/// group, so deleting either removes both.
pub fn build_records(new: &NewRecord, unit: GlucoseUnit, now: DateTime<Utc>) -> Vec<TreatmentRecord> {
    match *new {
        NewRecord::Glucose { value, at } => vec![TreatmentRecord::new(
            at.unwrap_or(now),
            TreatmentPayload::Glucose {
                mg_dl: unit.to_mg_dl(value),
            },
        )],
        NewRecord::Carb {
            grams,
            fat,
            protein,
            bolus,
            at,
        } => {
            let at = at.unwrap_or(now);
            let mut records = vec![TreatmentRecord::new(
                at,
                TreatmentPayload::Carb {
                    grams,
                    fat,
                    protein,
                },
            )];
            if let Some(units) = bolus {
                records.push(TreatmentRecord::new(
                    at,
                    TreatmentPayload::Insulin { units, bolus: true },
                ));
                assign_group(&mut records);
            }
            records
        }
        NewRecord::Insulin { units, basal, at } => vec![TreatmentRecord::new(
            at.unwrap_or(now),
            TreatmentPayload::Insulin {
                units,
                bolus: !basal,
            },
        )],
    }
}

pub async fn add<W: Write>(
    writer: &mut W,
    coordinator: &SyncCoordinator,
    config: &Config,
    new: &NewRecord,
) -> Result<()> {
    let records = build_records(new, config.glucose_unit, Utc::now());
    let report = coordinator
        .add_records(records)
        .await
        .context("failed to add records")?;

    if report.inserted.is_empty() {
        writeln!(writer, "Nothing added.")?;
    }
    for record in &report.inserted {
        writeln!(
            writer,
            "Added {} record {}: {}",
            record.kind(),
            record.id,
            describe(&record.payload, config.glucose_unit)
        )?;
    }
    for failure in &report.collaborator_failures {
        writeln!(writer, "Warning: {} not updated: {}", failure.collaborator, failure.error)?;
    }
    if report.recomputed {
        writeln!(writer, "Dosing recompute requested.")?;
    }
    Ok(())
}

pub async fn list<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    config: &Config,
    kind: Option<TreatmentKind>,
    json: bool,
) -> Result<()> {
    let records = store
        .list_records(kind)
        .await
        .context("failed to list records")?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&records)?)?;
        return Ok(());
    }

    if records.is_empty() {
        writeln!(writer, "No records.")?;
        return Ok(());
    }
    for record in &records {
        let grouped = if record.group_id.is_some() {
            " (grouped)"
        } else {
            ""
        };
        writeln!(
            writer,
            "{}  {:<7}  {:<14}  {}{grouped}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.kind().as_str(),
            describe(&record.payload, config.glucose_unit),
            record.id,
        )?;
    }
    Ok(())
}

pub async fn delete<W: Write>(
    writer: &mut W,
    coordinator: &SyncCoordinator,
    id: &str,
) -> Result<()> {
    let id = RecordId::new(id)?;
    let report = match coordinator.delete_record(&id).await {
        Ok(DeletionOutcome::Deleted(report)) => report,
        Ok(DeletionOutcome::NotFound) => {
            writeln!(writer, "No record {id}.")?;
            return Ok(());
        }
        Err(SyncError::AuthenticationFailed) => {
            bail!("deleting insulin records requires --yes")
        }
        Err(err) => return Err(err).context("failed to delete record"),
    };

    writeln!(writer, "Deleted {} record {id}.", report.record.kind())?;
    if report.siblings_removed > 0 {
        writeln!(
            writer,
            "Removed {} grouped record(s).",
            report.siblings_removed
        )?;
    }
    for failure in &report.collaborator_failures {
        writeln!(writer, "Warning: {} not updated: {}", failure.collaborator, failure.error)?;
    }
    if report.recomputed {
        writeln!(writer, "Dosing recompute requested.")?;
    }
    Ok(())
}

fn describe(payload: &TreatmentPayload, unit: GlucoseUnit) -> String {
    match *payload {
        TreatmentPayload::Glucose { mg_dl } => {
            format!("{} {unit}", format_glucose(unit.from_mg_dl(mg_dl), unit))
        }
        TreatmentPayload::Carb { grams, .. } => format!("{grams} g"),
        TreatmentPayload::Insulin { units, bolus } => {
            let kind = if bolus { "bolus" } else { "basal" };
            format!("{units} U {kind}")
        }
    }
}
