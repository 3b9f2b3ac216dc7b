//! The authoritative local record store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tk_core::{GroupId, RecordId, ScheduleKind, TherapyProfile, TreatmentKind, TreatmentRecord};
use tk_db::{Database, DbError};

use crate::error::StoreError;

/// Canonical storage for schedules and treatment records.
///
/// Every call is atomic on its own. Nothing is atomic across calls.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Replaces the stored schedule of the profile's kind.
    async fn save_profile(&self, profile: TherapyProfile) -> Result<(), StoreError>;

    async fn fetch_profile(&self, kind: ScheduleKind)
    -> Result<Option<TherapyProfile>, StoreError>;

    /// Inserts records, skipping IDs already present.
    ///
    /// Returns the IDs actually inserted.
    async fn insert_records(
        &self,
        records: Vec<TreatmentRecord>,
    ) -> Result<Vec<RecordId>, StoreError>;

    async fn existing_record(&self, id: &RecordId) -> Result<Option<TreatmentRecord>, StoreError>;

    /// The members of a group, oldest first.
    async fn group_records(&self, group: &GroupId) -> Result<Vec<TreatmentRecord>, StoreError>;

    /// Deletes a record and every other member of its group in one unit.
    ///
    /// Returns the removed records, the requested one first. Empty if the
    /// record was already gone.
    async fn delete_record(&self, id: &RecordId) -> Result<Vec<TreatmentRecord>, StoreError>;

    async fn list_records(
        &self,
        kind: Option<TreatmentKind>,
    ) -> Result<Vec<TreatmentRecord>, StoreError>;
}

/// [`RecordStore`] backed by the SQLite [`Database`].
///
/// All access goes through one mutex on blocking worker threads, so
/// read-modify-write sequences from concurrent callers never interleave.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Runs `op` against the database on a blocking worker.
    pub async fn with_database<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Database) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".to_string()))?;
            op(&mut guard).map_err(StoreError::from)
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn save_profile(&self, profile: TherapyProfile) -> Result<(), StoreError> {
        self.with_database(move |db| db.save_profile(&profile)).await
    }

    async fn fetch_profile(
        &self,
        kind: ScheduleKind,
    ) -> Result<Option<TherapyProfile>, StoreError> {
        self.with_database(move |db| db.fetch_profile(kind)).await
    }

    async fn insert_records(
        &self,
        records: Vec<TreatmentRecord>,
    ) -> Result<Vec<RecordId>, StoreError> {
        self.with_database(move |db| db.insert_records(&records))
            .await
    }

    async fn existing_record(&self, id: &RecordId) -> Result<Option<TreatmentRecord>, StoreError> {
        let id = id.clone();
        self.with_database(move |db| db.get_record(&id)).await
    }

    async fn group_records(&self, group: &GroupId) -> Result<Vec<TreatmentRecord>, StoreError> {
        let group = group.clone();
        self.with_database(move |db| db.group_records(&group)).await
    }

    async fn delete_record(&self, id: &RecordId) -> Result<Vec<TreatmentRecord>, StoreError> {
        let id = id.clone();
        self.with_database(move |db| db.delete_record(&id)).await
    }

    async fn list_records(
        &self,
        kind: Option<TreatmentKind>,
    ) -> Result<Vec<TreatmentRecord>, StoreError> {
        self.with_database(move |db| db.list_records(kind)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use tk_core::TreatmentPayload;

    #[tokio::test]
    async fn sqlite_store_roundtrips_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = TreatmentRecord::new(Utc::now(), TreatmentPayload::Glucose { mg_dl: 98.0 });

        let inserted = store.insert_records(vec![record.clone()]).await.unwrap();
        assert_eq!(inserted, vec![record.id.clone()]);
        assert_eq!(
            store.existing_record(&record.id).await.unwrap(),
            Some(record.clone())
        );
        assert_eq!(store.delete_record(&record.id).await.unwrap(), vec![record.clone()]);
        assert!(store.existing_record(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_clones_share_one_database() {
        let store = SqliteStore::open_in_memory().unwrap();
        let other = store.clone();
        let record = TreatmentRecord::new(
            Utc::now(),
            TreatmentPayload::Insulin {
                units: 0.5,
                bolus: false,
            },
        );
        store.insert_records(vec![record]).await.unwrap();
        assert_eq!(other.list_records(None).await.unwrap().len(), 1);
    }
}
