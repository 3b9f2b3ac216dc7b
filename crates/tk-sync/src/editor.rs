//! Interactive editing of one schedule.
//!
//! The editor keeps a working list of entries and a baseline snapshot of
//! what was loaded or last saved. Every edit re-validates the working list,
//! so it always satisfies the schedule invariants. Saving writes the whole
//! schedule as one unit, only when it differs from the baseline.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tk_core::schedule::total_daily;
use tk_core::{BasalRate, GlucoseUnit, Schedule, ScheduleEntry, ScheduleValue, TimeGrid};

use crate::collaborators::RemoteLog;
use crate::error::{CollaboratorError, SyncError};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy)]
struct EditorEntry<V> {
    entry: ScheduleEntry<V>,
    /// Edit sequence number; higher is more recent.
    revision: u64,
}

/// Result of [`ScheduleEditor::save`].
#[derive(Debug)]
pub enum SaveOutcome {
    /// The entries match the baseline; nothing was written.
    Unchanged,
    /// The schedule was stored. The remote upload runs in the background.
    Saved(UploadHandle),
}

/// How the background profile upload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// No remote log is configured.
    Skipped,
    Uploaded,
    Failed(CollaboratorError),
}

/// Handle to the background profile upload started by a save.
///
/// Dropping it does not cancel the upload.
#[derive(Debug)]
pub struct UploadHandle {
    task: Option<JoinHandle<Result<(), CollaboratorError>>>,
}

impl UploadHandle {
    const fn skipped() -> Self {
        Self { task: None }
    }

    /// Waits for the upload to finish.
    pub async fn wait(self) -> UploadStatus {
        let Some(task) = self.task else {
            return UploadStatus::Skipped;
        };
        match task.await {
            Ok(Ok(())) => UploadStatus::Uploaded,
            Ok(Err(err)) => UploadStatus::Failed(err),
            Err(err) => UploadStatus::Failed(CollaboratorError::Unavailable(err.to_string())),
        }
    }
}

/// An editing session over the stored schedule of kind `V`.
pub struct ScheduleEditor<V> {
    grid: TimeGrid,
    unit: GlucoseUnit,
    entries: Vec<EditorEntry<V>>,
    baseline: Vec<ScheduleEntry<V>>,
    revision: u64,
    store: Arc<dyn RecordStore>,
    remote_log: Option<Arc<dyn RemoteLog>>,
    saving: watch::Sender<bool>,
}

impl<V: ScheduleValue> ScheduleEditor<V> {
    /// Loads the stored schedule into a new editing session.
    ///
    /// A schedule stored on a different grid is mapped onto `grid`, each
    /// entry moving to the slot containing its start time.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        remote_log: Option<Arc<dyn RemoteLog>>,
        grid: TimeGrid,
        unit: GlucoseUnit,
    ) -> Result<Self, SyncError> {
        let stored = store
            .fetch_profile(V::KIND)
            .await?
            .and_then(V::from_profile);
        let entries = stored.map_or_else(Vec::new, |schedule| regrid(&schedule, grid));
        tracing::debug!(kind = %V::KIND, entries = entries.len(), "opened schedule editor");

        let (saving, _) = watch::channel(false);
        let mut editor = Self {
            grid,
            unit,
            entries: entries
                .iter()
                .map(|&entry| EditorEntry { entry, revision: 0 })
                .collect(),
            baseline: Vec::new(),
            revision: 0,
            store,
            remote_log,
            saving,
        };
        editor.validate();
        editor.baseline = editor.entries();
        Ok(editor)
    }

    #[must_use]
    pub const fn grid(&self) -> TimeGrid {
        self.grid
    }

    /// The working entries, in canonical units.
    pub fn entries(&self) -> Vec<ScheduleEntry<V>> {
        self.entries.iter().map(|e| e.entry).collect()
    }

    /// The working entries converted to `unit` for presentation.
    pub fn display_entries(&self, unit: GlucoseUnit) -> Vec<ScheduleEntry<V>> {
        self.entries
            .iter()
            .map(|e| ScheduleEntry::new(e.entry.slot, e.entry.value.to_unit(unit)))
            .collect()
    }

    /// Whether [`add`](Self::add) would append an entry.
    pub fn can_add(&self) -> bool {
        self.entries
            .last()
            .is_none_or(|last| last.entry.slot < self.grid.last_slot())
    }

    /// Appends an entry one slot after the last, copying its value.
    ///
    /// An empty schedule gets a default entry at midnight. Does nothing when
    /// the last entry already occupies the final slot.
    pub fn add(&mut self) -> bool {
        let next = match self.entries.last() {
            None => ScheduleEntry::new(0, V::default_value()),
            Some(last) if last.entry.slot >= self.grid.last_slot() => return false,
            Some(last) => ScheduleEntry::new(last.entry.slot + 1, last.entry.value),
        };
        let revision = self.next_revision();
        self.entries.push(EditorEntry {
            entry: next,
            revision,
        });
        self.validate();
        true
    }

    /// Removes the entry at `index`.
    pub fn remove(&mut self, index: usize) -> Option<ScheduleEntry<V>> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index).entry;
        self.validate();
        Some(removed)
    }

    /// Sets the value of the entry at `index`, snapped onto the allowed domain.
    pub fn change_value(&mut self, index: usize, value: V) -> bool {
        let revision = self.next_revision();
        let Some(edited) = self.entries.get_mut(index) else {
            return false;
        };
        edited.entry.value = value.snapped();
        edited.revision = revision;
        self.validate();
        true
    }

    /// Moves the entry at `index` to `slot`.
    ///
    /// If another entry already holds `slot`, the moved entry replaces it.
    pub fn change_slot(&mut self, index: usize, slot: usize) -> bool {
        if !self.grid.contains(slot) {
            return false;
        }
        let revision = self.next_revision();
        let Some(edited) = self.entries.get_mut(index) else {
            return false;
        };
        edited.entry.slot = slot;
        edited.revision = revision;
        self.validate();
        true
    }

    /// Replaces the working list, later entries taking precedence.
    pub fn set_entries(&mut self, entries: impl IntoIterator<Item = ScheduleEntry<V>>) {
        let mut replaced = Vec::new();
        for entry in entries {
            let revision = self.next_revision();
            replaced.push(EditorEntry {
                entry: ScheduleEntry::new(entry.slot, entry.value.snapped()),
                revision,
            });
        }
        self.entries = replaced;
        self.validate();
    }

    /// Restores the schedule invariants on the working list.
    ///
    /// Entries sharing a slot collapse to the most recently edited one,
    /// entries are sorted by slot and the first is moved to midnight. The
    /// working list is only replaced when the corrected list differs.
    /// Returns whether anything changed.
    pub fn validate(&mut self) -> bool {
        let mut by_recency = self.entries.clone();
        by_recency.sort_by_key(|e| e.revision);

        let mut by_slot: BTreeMap<usize, EditorEntry<V>> = BTreeMap::new();
        for edited in by_recency {
            if self.grid.contains(edited.entry.slot) {
                by_slot.insert(edited.entry.slot, edited);
            }
        }
        let mut corrected: Vec<_> = by_slot.into_values().collect();
        if let Some(first) = corrected.first_mut() {
            first.entry.slot = 0;
        }

        let unchanged = corrected.len() == self.entries.len()
            && corrected
                .iter()
                .zip(&self.entries)
                .all(|(a, b)| a.entry == b.entry);
        if unchanged {
            return false;
        }
        self.entries = corrected;
        true
    }

    /// Whether the working list differs from the baseline.
    pub fn has_changes(&self) -> bool {
        self.entries.len() != self.baseline.len()
            || self
                .entries
                .iter()
                .zip(&self.baseline)
                .any(|(edited, base)| edited.entry != *base)
    }

    pub fn is_saving(&self) -> bool {
        *self.saving.borrow()
    }

    /// Observes the saving flag.
    pub fn subscribe_saving(&self) -> watch::Receiver<bool> {
        self.saving.subscribe()
    }

    /// Stores the schedule if it changed, then uploads it in the background.
    ///
    /// A failed upload never rolls back the stored schedule. A failed store
    /// keeps the baseline, so the changes remain pending.
    pub async fn save(&mut self) -> Result<SaveOutcome, SyncError> {
        if !self.has_changes() {
            return Ok(SaveOutcome::Unchanged);
        }

        let schedule = Schedule::new(self.grid, self.entries());
        let result = {
            let _saving = SavingFlag::raise(&self.saving);
            self.store
                .save_profile(V::into_profile(schedule.clone()))
                .await
        };
        if let Err(err) = result {
            tracing::warn!(kind = %V::KIND, error = %err, "failed to save schedule");
            return Err(err.into());
        }

        self.baseline = schedule.entries().to_vec();
        tracing::debug!(kind = %V::KIND, entries = schedule.len(), "saved schedule");
        Ok(SaveOutcome::Saved(self.spawn_upload(schedule)))
    }

    fn spawn_upload(&self, schedule: Schedule<V>) -> UploadHandle {
        let Some(remote_log) = self.remote_log.clone() else {
            return UploadHandle::skipped();
        };
        let document = match V::into_profile(schedule).document_json(self.unit) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(kind = %V::KIND, error = %err, "failed to encode schedule upload");
                return UploadHandle::skipped();
            }
        };
        let task = tokio::spawn(async move {
            let result = remote_log.upload_profile(V::KIND, &document).await;
            if let Err(err) = &result {
                tracing::warn!(kind = %V::KIND, error = %err, "schedule upload failed");
            }
            result
        });
        UploadHandle { task: Some(task) }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

impl ScheduleEditor<BasalRate> {
    /// Total daily basal of the working entries, in units.
    pub fn compute_total(&self) -> f64 {
        total_daily(self.grid, &self.entries())
    }
}

/// Holds the saving flag up until dropped, even if the save is cancelled.
struct SavingFlag<'a>(&'a watch::Sender<bool>);

impl<'a> SavingFlag<'a> {
    fn raise(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for SavingFlag<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

fn regrid<V: ScheduleValue>(schedule: &Schedule<V>, grid: TimeGrid) -> Vec<ScheduleEntry<V>> {
    let stored = schedule.grid();
    if stored == grid {
        return schedule.entries().to_vec();
    }
    schedule
        .entries()
        .iter()
        .map(|entry| {
            let slot = (stored.minutes_at(entry.slot) / grid.slot_minutes()) as usize;
            ScheduleEntry::new(slot, entry.value)
        })
        .collect()
}
