//! Status command: record counts, stored schedules and the last recompute.

use std::io::Write;

use anyhow::Result;
use tk_core::ScheduleKind;
use tk_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    writeln!(writer, "Therapy keeper status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Glucose unit: {}", config.glucose_unit)?;

    let counts = db.record_counts()?;
    if counts.is_empty() {
        writeln!(writer, "No records stored.")?;
    } else {
        writeln!(writer, "Records:")?;
        for (kind, count) in counts {
            writeln!(writer, "- {kind}: {count}")?;
        }
    }

    writeln!(writer, "Profiles:")?;
    for kind in ScheduleKind::ALL {
        match db.fetch_profile(kind)? {
            Some(profile) => writeln!(writer, "- {kind}: {} entries", profile.len())?,
            None => writeln!(writer, "- {kind}: not set")?,
        }
    }

    match db.last_recompute()? {
        Some(at) => writeln!(writer, "Last recompute: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?,
        None => writeln!(writer, "Last recompute: never")?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use tk_core::{
        BasalRate, GlucoseUnit, Schedule, ScheduleEntry, TherapyProfile, TimeGrid,
        TreatmentPayload, TreatmentRecord,
    };

    fn config(db_path: std::path::PathBuf) -> Config {
        Config {
            database_path: db_path,
            glucose_unit: GlucoseUnit::MgDl,
            slot_minutes: 30,
        }
    }

    #[test]
    fn status_on_empty_database() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("tk.db");
        let db = Database::open(&db_path).unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &config(db_path.clone())).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&db_path.display().to_string(), "[TEMP]/tk.db");
        assert_snapshot!(output, @r"
        Therapy keeper status
        Database: [TEMP]/tk.db
        Glucose unit: mg/dL
        No records stored.
        Profiles:
        - basal: not set
        - sensitivity: not set
        - target: not set
        Last recompute: never
        ");
    }

    #[test]
    fn status_counts_records_and_profiles() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("tk.db");
        let mut db = Database::open(&db_path).unwrap();

        let at = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        db.insert_records(&[
            TreatmentRecord::new(at, TreatmentPayload::Glucose { mg_dl: 110.0 }),
            TreatmentRecord::new(at, TreatmentPayload::Glucose { mg_dl: 95.0 }),
            TreatmentRecord::new(
                at,
                TreatmentPayload::Carb {
                    grams: 40.0,
                    fat: 0.0,
                    protein: 0.0,
                },
            ),
        ])
        .unwrap();
        db.save_profile(&TherapyProfile::Basal(Schedule::new(
            TimeGrid::DEFAULT,
            [
                ScheduleEntry::new(0, BasalRate::new(1.0)),
                ScheduleEntry::new(4, BasalRate::new(1.2)),
            ],
        )))
        .unwrap();
        db.mark_recompute(at).unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &config(db_path.clone())).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&db_path.display().to_string(), "[TEMP]/tk.db");
        assert_snapshot!(output, @r"
        Therapy keeper status
        Database: [TEMP]/tk.db
        Glucose unit: mg/dL
        Records:
        - carb: 1
        - glucose: 2
        Profiles:
        - basal: 2 entries
        - sensitivity: not set
        - target: not set
        Last recompute: 2025-03-14 12:00:00 UTC
        ");
    }
}
