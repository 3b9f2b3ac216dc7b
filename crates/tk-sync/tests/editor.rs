//! Schedule editing sessions over the SQLite store.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeRemoteLog, FlakyStore, RemoteCall};
use tk_core::{
    BasalRate, GlucoseUnit, Schedule, ScheduleEntry, ScheduleKind, Sensitivity, TargetRange,
    TherapyProfile, TimeGrid,
};
use tk_sync::{
    CollaboratorError, RecordStore, SaveOutcome, ScheduleEditor, SqliteStore, SyncError,
    UploadStatus,
};

fn basal(entries: &[(usize, f64)]) -> Vec<ScheduleEntry<BasalRate>> {
    entries
        .iter()
        .map(|&(slot, rate)| ScheduleEntry::new(slot, BasalRate::new(rate)))
        .collect()
}

async fn open_basal(store: Arc<dyn RecordStore>) -> ScheduleEditor<BasalRate> {
    ScheduleEditor::open(store, None, TimeGrid::DEFAULT, GlucoseUnit::MgDl)
        .await
        .unwrap()
}

fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

#[tokio::test]
async fn empty_schedule_starts_with_default_entry() {
    let mut editor = open_basal(memory_store()).await;
    assert!(editor.entries().is_empty());
    assert!(editor.can_add());
    assert!(editor.compute_total().abs() < f64::EPSILON);

    assert!(editor.add());

    assert_eq!(editor.entries(), basal(&[(0, 1.0)]));
    assert!(editor.has_changes());
}

#[tokio::test]
async fn add_copies_last_value_into_next_slot() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(0, 0.8), (10, 1.1)]));

    assert!(editor.add());

    assert_eq!(editor.entries(), basal(&[(0, 0.8), (10, 1.1), (11, 1.1)]));
}

#[tokio::test]
async fn add_is_noop_at_last_slot() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(0, 0.8), (47, 1.1)]));

    assert!(!editor.can_add());
    assert!(!editor.add());
    assert_eq!(editor.entries().len(), 2);
}

#[tokio::test]
async fn two_entry_basal_totals_twenty_eight_point_four() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(0, 1.0), (4, 1.2)]));

    assert!((editor.compute_total() - 28.4).abs() < 1e-9);
}

#[tokio::test]
async fn validate_keeps_most_recently_edited_duplicate() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(0, 1.0), (4, 1.2), (8, 0.5)]));

    // Edit the later entry first, then move the earlier one onto its slot.
    assert!(editor.change_value(2, BasalRate::new(0.7)));
    assert!(editor.change_slot(1, 8));

    assert_eq!(editor.entries(), basal(&[(0, 1.0), (8, 1.2)]));
}

#[tokio::test]
async fn validate_moves_first_entry_to_midnight() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(3, 1.0), (6, 2.0)]));

    assert_eq!(editor.entries(), basal(&[(0, 1.0), (6, 2.0)]));
    assert!(!editor.validate());
}

#[tokio::test]
async fn change_value_snaps_to_domain() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(0, 1.0)]));

    assert!(editor.change_value(0, BasalRate::new(42.0)));
    assert!(!editor.change_value(5, BasalRate::new(1.0)));
    assert!(!editor.change_slot(0, 48));

    assert_eq!(editor.entries(), basal(&[(0, 30.0)]));
}

#[tokio::test]
async fn remove_revalidates() {
    let mut editor = open_basal(memory_store()).await;
    editor.set_entries(basal(&[(0, 1.0), (4, 1.2), (8, 0.5)]));

    assert_eq!(editor.remove(0), Some(ScheduleEntry::new(0, BasalRate::new(1.0))));
    assert_eq!(editor.remove(9), None);

    assert_eq!(editor.entries(), basal(&[(0, 1.2), (8, 0.5)]));
}

#[tokio::test]
async fn save_round_trips_through_store() {
    let store = memory_store();
    let mut editor = open_basal(store.clone()).await;
    editor.set_entries(basal(&[(0, 1.0), (4, 1.2)]));

    let outcome = editor.save().await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved(_)));
    assert!(!editor.has_changes());

    let reopened = open_basal(store).await;
    assert_eq!(reopened.entries(), basal(&[(0, 1.0), (4, 1.2)]));
    assert!(!reopened.has_changes());
}

#[tokio::test]
async fn unchanged_save_writes_nothing() {
    let store = memory_store();
    let remote = Arc::new(FakeRemoteLog::default());
    let mut editor: ScheduleEditor<BasalRate> = ScheduleEditor::open(
        store,
        Some(remote.clone()),
        TimeGrid::DEFAULT,
        GlucoseUnit::MgDl,
    )
    .await
    .unwrap();

    assert!(matches!(editor.save().await.unwrap(), SaveOutcome::Unchanged));
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn save_uploads_document_in_display_unit() {
    let store = memory_store();
    let remote = Arc::new(FakeRemoteLog::default());
    let mut editor: ScheduleEditor<TargetRange> = ScheduleEditor::open(
        store,
        Some(remote.clone()),
        TimeGrid::DEFAULT,
        GlucoseUnit::MmolL,
    )
    .await
    .unwrap();
    editor.set_entries([ScheduleEntry::new(0, TargetRange::new(90.0, 180.0))]);

    let SaveOutcome::Saved(upload) = editor.save().await.unwrap() else {
        panic!("expected a save");
    };
    assert_eq!(upload.wait().await, UploadStatus::Uploaded);

    let calls = remote.calls();
    let [RemoteCall::UploadProfile(kind, document)] = calls.as_slice() else {
        panic!("expected one profile upload, got {calls:?}");
    };
    assert_eq!(*kind, ScheduleKind::Target);
    assert_eq!(
        *document,
        serde_json::json!({
            "kind": "target",
            "units": "mmol/L",
            "entries": [
                { "start": "00:00:00", "minutes": 0, "low": 5.0, "high": 10.0 }
            ]
        })
    );
}

#[tokio::test]
async fn failed_upload_keeps_saved_schedule() {
    let store = memory_store();
    let remote = Arc::new(FakeRemoteLog::failing());
    let mut editor: ScheduleEditor<Sensitivity> = ScheduleEditor::open(
        store.clone(),
        Some(remote),
        TimeGrid::DEFAULT,
        GlucoseUnit::MgDl,
    )
    .await
    .unwrap();
    editor.set_entries([ScheduleEntry::new(0, Sensitivity::new(45.0))]);

    let SaveOutcome::Saved(upload) = editor.save().await.unwrap() else {
        panic!("expected a save");
    };

    assert!(matches!(
        upload.wait().await,
        UploadStatus::Failed(CollaboratorError::Unavailable(_))
    ));
    assert!(!editor.has_changes());
    let stored = store.fetch_profile(ScheduleKind::Sensitivity).await.unwrap();
    assert_eq!(stored.map(|profile| profile.len()), Some(1));
}

#[tokio::test]
async fn save_without_remote_log_skips_upload() {
    let mut editor = open_basal(memory_store()).await;
    editor.add();

    let SaveOutcome::Saved(upload) = editor.save().await.unwrap() else {
        panic!("expected a save");
    };
    assert_eq!(upload.wait().await, UploadStatus::Skipped);
}

#[tokio::test]
async fn persistence_failure_keeps_changes_pending() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    let mut editor = open_basal(store.clone()).await;
    editor.set_entries(basal(&[(0, 0.9)]));
    store.fail_saves.store(true, Ordering::SeqCst);
    let saving = editor.subscribe_saving();

    let err = editor.save().await.unwrap_err();

    assert!(matches!(err, SyncError::Store(_)));
    assert!(editor.has_changes());
    assert!(!editor.is_saving());
    assert!(!*saving.borrow());

    store.fail_saves.store(false, Ordering::SeqCst);
    assert!(matches!(editor.save().await.unwrap(), SaveOutcome::Saved(_)));
    assert!(!editor.has_changes());
}

#[tokio::test]
async fn cancelled_save_lowers_saving_flag() {
    let store = Arc::new(FlakyStore::new(SqliteStore::open_in_memory().unwrap()));
    let mut editor = open_basal(store.clone()).await;
    editor.set_entries(basal(&[(0, 1.3)]));
    store.hang_saves.store(true, Ordering::SeqCst);
    let mut saving = editor.subscribe_saving();

    let timed_out = tokio::time::timeout(Duration::from_millis(50), editor.save()).await;

    assert!(timed_out.is_err());
    assert!(saving.has_changed().unwrap());
    assert!(!*saving.borrow_and_update());
    assert!(!editor.is_saving());
    assert!(editor.has_changes());
}

#[tokio::test]
async fn display_entries_convert_glucose_values() {
    let mut editor: ScheduleEditor<Sensitivity> = ScheduleEditor::open(
        memory_store(),
        None,
        TimeGrid::DEFAULT,
        GlucoseUnit::MgDl,
    )
    .await
    .unwrap();
    editor.set_entries([ScheduleEntry::new(0, Sensitivity::new(36.0))]);

    let shown = editor.display_entries(GlucoseUnit::MmolL);

    assert_eq!(shown, vec![ScheduleEntry::new(0, Sensitivity::new(2.0))]);
    assert_eq!(editor.entries()[0].value, Sensitivity::new(36.0));
}

#[tokio::test]
async fn schedule_from_coarser_grid_is_mapped_onto_editor_grid() {
    let store = memory_store();
    let hourly = TimeGrid::with_slot_minutes(60).unwrap();
    store
        .save_profile(TherapyProfile::Basal(Schedule::new(
            hourly,
            basal(&[(0, 1.0), (3, 1.5)]),
        )))
        .await
        .unwrap();

    let editor = open_basal(store).await;

    assert_eq!(editor.entries(), basal(&[(0, 1.0), (6, 1.5)]));
}
