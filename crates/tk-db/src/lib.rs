//! Storage layer for therapy profiles and treatment records.
//!
//! This is the authoritative local store. It persists schedules and the
//! treatment history using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization. The async layer wraps it
//! in a `Mutex` and only touches it from blocking worker threads.
//!
//! # Atomicity
//!
//! Every mutating call runs in a single transaction. A failed profile save
//! leaves the previously stored schedule intact; a failed group deletion
//! leaves every sibling in place.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format (e.g., `2024-01-15T10:30:00.000Z`),
//! so lexicographic ordering matches chronological ordering.
//!
//! ## Profile Storage
//!
//! `profile_entries.value` holds the kind-specific value fields as JSON, in
//! canonical units (U/h, mg/dL). Rows are keyed by minutes from midnight.
//!
//! ## Treatment Payload Storage
//!
//! `treatments.type` holds the treatment kind and `treatments.data` the JSON
//! payload.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;

use tk_core::{
    BasalRate, GlucoseUnit, GroupId, ProfileDocument, ProfileEntry, RecordId, Schedule,
    ScheduleKind, ScheduleValue, Sensitivity, SyncId, TargetRange, TherapyProfile, TimeGrid,
    TreatmentKind, TreatmentPayload, TreatmentRecord, ValidationError,
};

/// Key under which the last recompute request time is kept.
pub const LAST_RECOMPUTE_KEY: &str = "last_recompute_at";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a record timestamp.
    #[error("invalid timestamp for record {record_id}: {timestamp}")]
    TimestampParse {
        record_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// Failed to parse stored JSON.
    #[error("invalid stored data for {key}: {message}")]
    InvalidData { key: String, message: String },
    /// Stored data violates a domain invariant.
    #[error("invalid stored data: {0}")]
    Validation(#[from] ValidationError),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS profiles (
                kind TEXT PRIMARY KEY,
                slot_minutes INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- minutes: offset from midnight, unique per kind
            -- start: HH:MM:SS wall clock, informational
            -- value: JSON value fields in canonical units
            CREATE TABLE IF NOT EXISTS profile_entries (
                kind TEXT NOT NULL,
                minutes INTEGER NOT NULL,
                start TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (kind, minutes),
                FOREIGN KEY (kind) REFERENCES profiles(kind) ON DELETE CASCADE
            );

            -- Treatments table: canonical glucose, carb and insulin records
            -- timestamp: ISO 8601 format (e.g., '2024-01-15T10:30:00.000Z')
            -- type: treatment kind ('glucose', 'carb', 'insulin')
            -- data: JSON payload
            CREATE TABLE IF NOT EXISTS treatments (
                id TEXT PRIMARY KEY,
                sync_id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                group_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_treatments_timestamp ON treatments(timestamp);
            CREATE INDEX IF NOT EXISTS idx_treatments_type ON treatments(type);
            CREATE INDEX IF NOT EXISTS idx_treatments_group ON treatments(group_id);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ========== Profiles ==========

    /// Replaces the stored schedule of the profile's kind as one unit.
    pub fn save_profile(&mut self, profile: &TherapyProfile) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM profile_entries WHERE kind = ?",
            [profile.kind().as_str()],
        )?;
        tx.execute(
            "
            INSERT INTO profiles (kind, slot_minutes, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(kind) DO UPDATE SET
                slot_minutes = excluded.slot_minutes,
                updated_at = excluded.updated_at
            ",
            params![
                profile.kind().as_str(),
                profile.grid().slot_minutes(),
                format_timestamp(Utc::now()),
            ],
        )?;
        match profile {
            TherapyProfile::Basal(schedule) => write_entries(&tx, schedule)?,
            TherapyProfile::Sensitivity(schedule) => write_entries(&tx, schedule)?,
            TherapyProfile::Target(schedule) => write_entries(&tx, schedule)?,
        }
        tx.commit()?;
        tracing::debug!(kind = %profile.kind(), entries = profile.len(), "saved profile");
        Ok(())
    }

    /// Loads the stored schedule of `kind`, if one was ever saved.
    pub fn fetch_profile(&self, kind: ScheduleKind) -> Result<Option<TherapyProfile>, DbError> {
        let slot_minutes: Option<u32> = self
            .conn
            .query_row(
                "SELECT slot_minutes FROM profiles WHERE kind = ?",
                [kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(slot_minutes) = slot_minutes else {
            return Ok(None);
        };
        let grid = TimeGrid::with_slot_minutes(slot_minutes)?;

        let profile = match kind {
            ScheduleKind::Basal => TherapyProfile::Basal(self.read_schedule::<BasalRate>(grid)?),
            ScheduleKind::Sensitivity => {
                TherapyProfile::Sensitivity(self.read_schedule::<Sensitivity>(grid)?)
            }
            ScheduleKind::Target => {
                TherapyProfile::Target(self.read_schedule::<TargetRange>(grid)?)
            }
        };
        Ok(Some(profile))
    }

    fn read_schedule<V: ScheduleValue>(&self, grid: TimeGrid) -> Result<Schedule<V>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT minutes, start, value
            FROM profile_entries
            WHERE kind = ?
            ORDER BY minutes ASC
            ",
        )?;
        let rows = stmt.query_map([V::KIND.as_str()], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (minutes, start, value) = row?;
            let value: V = serde_json::from_str(&value).map_err(|err| DbError::InvalidData {
                key: format!("{}@{minutes}", V::KIND),
                message: err.to_string(),
            })?;
            entries.push(ProfileEntry {
                start,
                minutes,
                value,
            });
        }
        let document = ProfileDocument {
            kind: V::KIND,
            units: V::KIND.is_glucose_valued().then_some(GlucoseUnit::MgDl),
            entries,
        };
        Ok(document.into_schedule(grid)?)
    }

    // ========== Treatments ==========

    /// Inserts a batch of records, ignoring duplicates by ID.
    ///
    /// Returns the IDs of the records that were actually inserted.
    pub fn insert_records(
        &mut self,
        records: &[TreatmentRecord],
    ) -> Result<Vec<RecordId>, DbError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let tx = self.conn.transaction()?;
        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO treatments
                (id, sync_id, timestamp, type, data, group_id)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )?;
            for record in records {
                let data =
                    serde_json::to_string(&record.payload).map_err(|err| DbError::InvalidData {
                        key: record.id.to_string(),
                        message: err.to_string(),
                    })?;
                let changed = stmt.execute(params![
                    record.id.as_str(),
                    record.sync_id.as_str(),
                    format_timestamp(record.timestamp),
                    record.kind().as_str(),
                    data,
                    record.group_id.as_ref().map(GroupId::as_str),
                ])?;
                if changed > 0 {
                    inserted.push(record.id.clone());
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Looks up a record by its local ID.
    pub fn get_record(&self, id: &RecordId) -> Result<Option<TreatmentRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT id, sync_id, timestamp, type, data, group_id
                FROM treatments
                WHERE id = ?
                ",
                [id.as_str()],
                TreatmentRow::from_row,
            )
            .optional()?;
        row.map(TreatmentRow::into_record).transpose()
    }

    /// Lists the members of a group, oldest first.
    pub fn group_records(&self, group: &GroupId) -> Result<Vec<TreatmentRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, sync_id, timestamp, type, data, group_id
            FROM treatments
            WHERE group_id = ?
            ORDER BY timestamp ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([group.as_str()], TreatmentRow::from_row)?;
        collect_records(rows)
    }

    /// Deletes a record together with every member of its group.
    ///
    /// Runs in one transaction: either the whole group is gone or nothing
    /// changed. Returns the removed records, the requested one first, or an
    /// empty list if it did not exist.
    pub fn delete_record(&mut self, id: &RecordId) -> Result<Vec<TreatmentRecord>, DbError> {
        let tx = self.conn.transaction()?;
        let row = tx
            .query_row(
                "
                SELECT id, sync_id, timestamp, type, data, group_id
                FROM treatments
                WHERE id = ?
                ",
                [id.as_str()],
                TreatmentRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(Vec::new());
        };
        let record = row.into_record()?;

        let mut removed = Vec::new();
        if let Some(group) = &record.group_id {
            let siblings = {
                let mut stmt = tx.prepare(
                    "
                    SELECT id, sync_id, timestamp, type, data, group_id
                    FROM treatments
                    WHERE group_id = ? AND id != ?
                    ORDER BY timestamp ASC, id ASC
                    ",
                )?;
                let rows = stmt.query_map(
                    [group.as_str(), id.as_str()],
                    TreatmentRow::from_row,
                )?;
                collect_records(rows)?
            };
            tx.execute("DELETE FROM treatments WHERE group_id = ?", [group.as_str()])?;
            removed.push(record);
            removed.extend(siblings);
        } else {
            tx.execute("DELETE FROM treatments WHERE id = ?", [id.as_str()])?;
            removed.push(record);
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Lists records ordered by timestamp then ID, optionally of one kind.
    pub fn list_records(
        &self,
        kind: Option<TreatmentKind>,
    ) -> Result<Vec<TreatmentRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, sync_id, timestamp, type, data, group_id
            FROM treatments
            WHERE ?1 IS NULL OR type = ?1
            ORDER BY timestamp ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([kind.map(|kind| kind.as_str())], TreatmentRow::from_row)?;
        collect_records(rows)
    }

    /// Counts records per kind, omitting kinds without records.
    pub fn record_counts(&self) -> Result<Vec<(TreatmentKind, i64)>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT type, COUNT(*)
            FROM treatments
            GROUP BY type
            ORDER BY type ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            let (kind, count) = row?;
            counts.push((kind.parse::<TreatmentKind>()?, count));
        }
        Ok(counts)
    }

    // ========== Metadata ==========

    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Records that a recompute was requested at `at`.
    pub fn mark_recompute(&mut self, at: DateTime<Utc>) -> Result<(), DbError> {
        self.set_meta(LAST_RECOMPUTE_KEY, &format_timestamp(at))
    }

    pub fn last_recompute(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        self.get_meta(LAST_RECOMPUTE_KEY)?
            .map(|value| parse_timestamp(&value, LAST_RECOMPUTE_KEY))
            .transpose()
    }
}

fn write_entries<V: ScheduleValue>(
    tx: &Transaction<'_>,
    schedule: &Schedule<V>,
) -> Result<(), DbError> {
    let mut stmt = tx.prepare(
        "
        INSERT INTO profile_entries (kind, minutes, start, value)
        VALUES (?, ?, ?, ?)
        ",
    )?;
    for entry in schedule.to_document(GlucoseUnit::MgDl).entries {
        let value = serde_json::to_string(&entry.value).map_err(|err| DbError::InvalidData {
            key: format!("{}@{}", V::KIND, entry.minutes),
            message: err.to_string(),
        })?;
        stmt.execute(params![V::KIND.as_str(), entry.minutes, entry.start, value])?;
    }
    Ok(())
}

#[derive(Debug)]
struct TreatmentRow {
    id: String,
    sync_id: String,
    timestamp: String,
    kind: String,
    data: String,
    group_id: Option<String>,
}

impl TreatmentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sync_id: row.get(1)?,
            timestamp: row.get(2)?,
            kind: row.get(3)?,
            data: row.get(4)?,
            group_id: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<TreatmentRecord, DbError> {
        let timestamp = parse_timestamp(&self.timestamp, &self.id)?;
        let payload: TreatmentPayload =
            serde_json::from_str(&self.data).map_err(|err| DbError::InvalidData {
                key: self.id.clone(),
                message: err.to_string(),
            })?;
        let kind: TreatmentKind = self.kind.parse()?;
        if payload.kind() != kind {
            return Err(DbError::InvalidData {
                key: self.id,
                message: format!("type {kind} does not match payload {}", payload.kind()),
            });
        }
        Ok(TreatmentRecord {
            id: RecordId::new(self.id)?,
            sync_id: SyncId::new(self.sync_id)?,
            timestamp,
            payload,
            group_id: self.group_id.map(GroupId::new).transpose()?,
        })
    }
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<TreatmentRow>>,
) -> Result<Vec<TreatmentRecord>, DbError> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

fn parse_timestamp(timestamp: &str, record_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            record_id: record_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
