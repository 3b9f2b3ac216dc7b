//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tk_core::{
    GroupId, RecordId, ScheduleKind, SyncId, TherapyProfile, TreatmentKind, TreatmentPayload,
    TreatmentRecord,
};
use tk_sync::{
    AuthError, Authenticator, CollaboratorError, DosingEngine, EngineError, HealthStore,
    RecomputeTrigger, RecordStore, RemoteLog, SqliteStore, StoreError, SyncCoordinator,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    DeleteById(SyncId),
    DeleteByGroupId(GroupId),
    UploadRecords(Vec<RecordId>),
    UploadProfile(ScheduleKind, serde_json::Value),
}

#[derive(Default)]
pub struct FakeRemoteLog {
    pub calls: Mutex<Vec<RemoteCall>>,
    pub fail: AtomicBool,
}

impl FakeRemoteLog {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RemoteCall) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("remote log offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLog for FakeRemoteLog {
    async fn delete_by_id(&self, sync_id: &SyncId) -> Result<(), CollaboratorError> {
        self.record(RemoteCall::DeleteById(sync_id.clone()))
    }

    async fn delete_by_group_id(&self, group: &GroupId) -> Result<(), CollaboratorError> {
        self.record(RemoteCall::DeleteByGroupId(group.clone()))
    }

    async fn upload_records(&self, records: &[TreatmentRecord]) -> Result<(), CollaboratorError> {
        let ids = records.iter().map(|record| record.id.clone()).collect();
        self.record(RemoteCall::UploadRecords(ids))
    }

    async fn upload_profile(
        &self,
        kind: ScheduleKind,
        document: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        self.record(RemoteCall::UploadProfile(kind, document.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthCall {
    DeleteBySyncId(SyncId, TreatmentKind),
    SaveRecords(Vec<RecordId>),
}

/// Keeps the copies it was given, keyed the way a health store keys them.
#[derive(Default)]
pub struct FakeHealthStore {
    pub calls: Mutex<Vec<HealthCall>>,
    pub held: Mutex<HashMap<SyncId, TreatmentKind>>,
    pub fail: AtomicBool,
}

impl FakeHealthStore {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<HealthCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Sync IDs of the copies still held.
    pub fn held(&self) -> Vec<SyncId> {
        self.held.lock().unwrap().keys().cloned().collect()
    }

    fn record(&self, call: HealthCall) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Rejected("permission revoked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HealthStore for FakeHealthStore {
    async fn delete_by_sync_id(
        &self,
        sync_id: &SyncId,
        kind: TreatmentKind,
    ) -> Result<(), CollaboratorError> {
        self.record(HealthCall::DeleteBySyncId(sync_id.clone(), kind))?;
        let mut held = self.held.lock().unwrap();
        // Copies are stored per kind; a delete for another kind misses.
        if held.get(sync_id) == Some(&kind) {
            held.remove(sync_id);
        }
        Ok(())
    }

    async fn save_records(&self, records: &[TreatmentRecord]) -> Result<(), CollaboratorError> {
        let ids = records.iter().map(|record| record.id.clone()).collect();
        self.record(HealthCall::SaveRecords(ids))?;
        let mut held = self.held.lock().unwrap();
        for record in records {
            held.insert(record.sync_id.clone(), record.kind());
        }
        Ok(())
    }
}

pub struct FakeAuthenticator {
    pub allow: bool,
    pub calls: AtomicUsize,
}

impl FakeAuthenticator {
    pub const fn new(allow: bool) -> Self {
        Self {
            allow,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self, _reason: &str) -> Result<bool, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.allow)
    }
}

#[derive(Default)]
pub struct CountingEngine {
    pub calls: AtomicUsize,
}

impl CountingEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DosingEngine for CountingEngine {
    async fn recompute(&self) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps a [`SqliteStore`], failing selected writes on demand.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_saves: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Profile saves never complete.
    pub hang_saves: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            hang_saves: AtomicBool::new(false),
        }
    }
}

fn disk_full() -> StoreError {
    StoreError::Unavailable("disk full".to_string())
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn save_profile(&self, profile: TherapyProfile) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        if self.hang_saves.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.save_profile(profile).await
    }

    async fn fetch_profile(
        &self,
        kind: ScheduleKind,
    ) -> Result<Option<TherapyProfile>, StoreError> {
        self.inner.fetch_profile(kind).await
    }

    async fn insert_records(
        &self,
        records: Vec<TreatmentRecord>,
    ) -> Result<Vec<RecordId>, StoreError> {
        self.inner.insert_records(records).await
    }

    async fn existing_record(&self, id: &RecordId) -> Result<Option<TreatmentRecord>, StoreError> {
        self.inner.existing_record(id).await
    }

    async fn group_records(&self, group: &GroupId) -> Result<Vec<TreatmentRecord>, StoreError> {
        self.inner.group_records(group).await
    }

    async fn delete_record(&self, id: &RecordId) -> Result<Vec<TreatmentRecord>, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.delete_record(id).await
    }

    async fn list_records(
        &self,
        kind: Option<TreatmentKind>,
    ) -> Result<Vec<TreatmentRecord>, StoreError> {
        self.inner.list_records(kind).await
    }
}

/// A coordinator wired to fakes, with handles on every fake.
pub struct Harness {
    pub coordinator: SyncCoordinator,
    pub store: Arc<SqliteStore>,
    pub remote: Arc<FakeRemoteLog>,
    pub health: Arc<FakeHealthStore>,
    pub auth: Arc<FakeAuthenticator>,
    pub engine: Arc<CountingEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeRemoteLog::default(), FakeHealthStore::default(), true)
    }

    pub fn with(remote: FakeRemoteLog, health: FakeHealthStore, allow: bool) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let remote = Arc::new(remote);
        let health = Arc::new(health);
        let auth = Arc::new(FakeAuthenticator::new(allow));
        let engine = Arc::new(CountingEngine::default());
        let coordinator = SyncCoordinator::new(
            store.clone(),
            auth.clone(),
            Arc::new(RecomputeTrigger::new(engine.clone())),
        )
        .with_remote_log(remote.clone())
        .with_health_store(health.clone());
        Self {
            coordinator,
            store,
            remote,
            health,
            auth,
            engine,
        }
    }

    pub async fn seed(&self, records: &[TreatmentRecord]) {
        self.store.insert_records(records.to_vec()).await.unwrap();
    }

    pub async fn stored(&self, id: &RecordId) -> Option<TreatmentRecord> {
        self.store.existing_record(id).await.unwrap()
    }
}

pub fn record(payload: TreatmentPayload) -> TreatmentRecord {
    let timestamp = Utc.with_ymd_and_hms(2025, 3, 14, 12, 30, 0).unwrap();
    TreatmentRecord::new(timestamp, payload)
}

pub fn glucose(mg_dl: f64) -> TreatmentRecord {
    record(TreatmentPayload::Glucose { mg_dl })
}

pub fn carb(grams: f64) -> TreatmentRecord {
    record(TreatmentPayload::Carb {
        grams,
        fat: 0.0,
        protein: 0.0,
    })
}

pub fn insulin(units: f64) -> TreatmentRecord {
    record(TreatmentPayload::Insulin { units, bolus: true })
}
