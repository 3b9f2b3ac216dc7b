//! Propagation of treatment-record additions and deletions.
//!
//! A deletion moves through
//!
//! ```text
//! Requested → Authorizing (insulin in the group) → CollaboratorsNotified
//!           → LocallyDeleted → RecomputeScheduled (carb, insulin) → Done
//! ```
//!
//! and may stop at `Failed` from any step without undoing the steps already
//! completed. Once authorization has passed the remaining steps run on their
//! own task: dropping the caller's future does not stop them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use tk_core::{GroupId, RecordId, TreatmentKind, TreatmentRecord};

use crate::collaborators::{Authenticator, CollaboratorFailure, Collaborators, HealthStore, RemoteLog};
use crate::error::SyncError;
use crate::recompute::RecomputeTrigger;
use crate::store::RecordStore;

const EVENT_CAPACITY: usize = 64;

/// Why a deletion stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The record does not exist, or another deletion of it is running.
    NotFound,
    AuthenticationFailed,
    Persistence(String),
}

/// Progress of one deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionState {
    Requested,
    Authorizing,
    CollaboratorsNotified,
    LocallyDeleted,
    RecomputeScheduled,
    Done,
    Failed(FailureReason),
}

/// A state transition, as published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEvent {
    pub record_id: RecordId,
    pub state: DeletionState,
}

/// What a completed deletion did.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionReport {
    pub record: TreatmentRecord,
    /// Other members of the record's group removed alongside it.
    pub siblings_removed: usize,
    pub collaborator_failures: Vec<CollaboratorFailure>,
    /// Whether the dosing engine was asked to recompute.
    pub recomputed: bool,
}

/// Result of a deletion request.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionOutcome {
    Deleted(DeletionReport),
    /// Nothing to delete. Not an error.
    NotFound,
}

/// What an addition did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdditionReport {
    /// Records newly stored; duplicates of existing IDs are left out.
    pub inserted: Vec<TreatmentRecord>,
    pub collaborator_failures: Vec<CollaboratorFailure>,
    pub recomputed: bool,
}

/// Coordinates the local store, the collaborators and the dosing engine.
pub struct SyncCoordinator {
    store: Arc<dyn RecordStore>,
    collaborators: Collaborators,
    authenticator: Arc<dyn Authenticator>,
    recompute: Arc<RecomputeTrigger>,
    in_flight: Arc<Mutex<HashSet<ClaimKey>>>,
    events: broadcast::Sender<DeletionEvent>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        authenticator: Arc<dyn Authenticator>,
        recompute: Arc<RecomputeTrigger>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            collaborators: Collaborators::default(),
            authenticator,
            recompute,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            events,
        }
    }

    #[must_use]
    pub fn with_remote_log(mut self, remote_log: Arc<dyn RemoteLog>) -> Self {
        self.collaborators.remote_log = Some(remote_log);
        self
    }

    #[must_use]
    pub fn with_health_store(mut self, health_store: Arc<dyn HealthStore>) -> Self {
        self.collaborators.health_store = Some(health_store);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Observes deletion state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<DeletionEvent> {
        self.events.subscribe()
    }

    /// Deletes a record everywhere it is known.
    ///
    /// A grouped record takes its whole group with it. Returns
    /// [`DeletionOutcome::NotFound`] when the record is absent or it, or its
    /// group, is already being deleted by another caller. Authentication is
    /// required when any record about to be removed is insulin. For carb and
    /// insulin records the call resolves only after the dosing engine has
    /// recomputed.
    pub async fn delete_record(&self, id: &RecordId) -> Result<DeletionOutcome, SyncError> {
        let Some(record_claim) = Claim::acquire(&self.in_flight, ClaimKey::Record(id.clone()))
        else {
            tracing::debug!(record_id = %id, "deletion already in flight");
            publish(&self.events, id, DeletionState::Failed(FailureReason::NotFound));
            return Ok(DeletionOutcome::NotFound);
        };
        publish(&self.events, id, DeletionState::Requested);

        let record = match self.store.existing_record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(record_id = %id, "record already gone");
                publish(&self.events, id, DeletionState::Failed(FailureReason::NotFound));
                return Ok(DeletionOutcome::NotFound);
            }
            Err(err) => {
                publish(&self.events, id, persistence_failure(&err));
                return Err(err.into());
            }
        };

        let (members, group_claim) = match record.group_id.clone() {
            None => (vec![record], None),
            Some(group) => {
                let Some(group_claim) =
                    Claim::acquire(&self.in_flight, ClaimKey::Group(group.clone()))
                else {
                    tracing::debug!(
                        record_id = %id,
                        group_id = %group,
                        "group deletion already in flight"
                    );
                    publish(&self.events, id, DeletionState::Failed(FailureReason::NotFound));
                    return Ok(DeletionOutcome::NotFound);
                };
                let members = match self.store.group_records(&group).await {
                    Ok(members) => members,
                    Err(err) => {
                        publish(&self.events, id, persistence_failure(&err));
                        return Err(err.into());
                    }
                };
                // A sibling's deletion may have removed the group meanwhile.
                let Some(members) = requested_first(id, members) else {
                    tracing::debug!(record_id = %id, group_id = %group, "group already gone");
                    publish(&self.events, id, DeletionState::Failed(FailureReason::NotFound));
                    return Ok(DeletionOutcome::NotFound);
                };
                (members, Some(group_claim))
            }
        };

        if members
            .iter()
            .any(|member| member.kind() == TreatmentKind::Insulin)
        {
            publish(&self.events, id, DeletionState::Authorizing);
            let authorized = match self.authenticator.authenticate("delete insulin record").await {
                Ok(authorized) => authorized,
                Err(err) => {
                    tracing::warn!(record_id = %id, error = %err, "authentication unavailable");
                    false
                }
            };
            if !authorized {
                publish(
                    &self.events,
                    id,
                    DeletionState::Failed(FailureReason::AuthenticationFailed),
                );
                return Err(SyncError::AuthenticationFailed);
            }
        }

        let pipeline = DeletionPipeline {
            store: Arc::clone(&self.store),
            collaborators: self.collaborators.clone(),
            recompute: Arc::clone(&self.recompute),
            events: self.events.clone(),
        };
        let id = id.clone();
        let task = tokio::spawn(async move {
            let _claims = (record_claim, group_claim);
            pipeline.run(id, members).await
        });
        task.await?
    }

    /// Stores new records and propagates them to the collaborators.
    ///
    /// Records whose ID is already stored are skipped everywhere.
    pub async fn add_records(
        &self,
        records: Vec<TreatmentRecord>,
    ) -> Result<AdditionReport, SyncError> {
        if records.is_empty() {
            return Ok(AdditionReport::default());
        }

        let inserted_ids = self.store.insert_records(records.clone()).await?;
        let mut pending: HashSet<RecordId> = inserted_ids.into_iter().collect();
        let inserted: Vec<TreatmentRecord> = records
            .into_iter()
            .filter(|record| pending.remove(&record.id))
            .collect();
        if inserted.is_empty() {
            tracing::debug!("all records already stored");
            return Ok(AdditionReport::default());
        }

        let collaborator_failures = self.collaborators.propagate_additions(&inserted).await;
        let recomputed = inserted.iter().any(|record| record.kind().affects_dosing());
        if recomputed {
            self.recompute.request_recompute().await;
        }
        tracing::debug!(
            inserted = inserted.len(),
            failures = collaborator_failures.len(),
            recomputed,
            "records added"
        );

        Ok(AdditionReport {
            inserted,
            collaborator_failures,
            recomputed,
        })
    }
}

/// The steps of a deletion after authorization.
struct DeletionPipeline {
    store: Arc<dyn RecordStore>,
    collaborators: Collaborators,
    recompute: Arc<RecomputeTrigger>,
    events: broadcast::Sender<DeletionEvent>,
}

impl DeletionPipeline {
    /// Runs the deletion of `members`, the requested record first.
    async fn run(
        self,
        id: RecordId,
        members: Vec<TreatmentRecord>,
    ) -> Result<DeletionOutcome, SyncError> {
        let collaborator_failures = self.collaborators.notify_deletion(&members).await;
        publish(&self.events, &id, DeletionState::CollaboratorsNotified);

        let removed = self.store.delete_record(&id).await.map_err(|err| {
            publish(&self.events, &id, persistence_failure(&err));
            err
        })?;
        let mut removed = removed.into_iter();
        let Some(record) = removed.next() else {
            tracing::warn!(record_id = %id, "record vanished before local deletion");
            publish(&self.events, &id, DeletionState::Failed(FailureReason::NotFound));
            return Ok(DeletionOutcome::NotFound);
        };
        let siblings: Vec<TreatmentRecord> = removed.collect();
        publish(&self.events, &id, DeletionState::LocallyDeleted);

        let recomputed = record.kind().affects_dosing()
            || siblings.iter().any(|sibling| sibling.kind().affects_dosing());
        if recomputed {
            publish(&self.events, &id, DeletionState::RecomputeScheduled);
            self.recompute.request_recompute().await;
        }
        publish(&self.events, &id, DeletionState::Done);
        tracing::debug!(
            record_id = %id,
            kind = %record.kind(),
            siblings_removed = siblings.len(),
            failures = collaborator_failures.len(),
            "record deleted"
        );

        Ok(DeletionOutcome::Deleted(DeletionReport {
            record,
            siblings_removed: siblings.len(),
            collaborator_failures,
            recomputed,
        }))
    }
}

/// What an in-flight deletion holds exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ClaimKey {
    Record(RecordId),
    Group(GroupId),
}

/// Marks a record or group as being deleted until dropped.
struct Claim {
    in_flight: Arc<Mutex<HashSet<ClaimKey>>>,
    key: ClaimKey,
}

impl Claim {
    fn acquire(in_flight: &Arc<Mutex<HashSet<ClaimKey>>>, key: ClaimKey) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| Self {
            in_flight: Arc::clone(in_flight),
            key,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Moves the record `id` to the front of `members`, or `None` if absent.
fn requested_first(
    id: &RecordId,
    mut members: Vec<TreatmentRecord>,
) -> Option<Vec<TreatmentRecord>> {
    let index = members.iter().position(|member| &member.id == id)?;
    let requested = members.remove(index);
    members.insert(0, requested);
    Some(members)
}

fn publish(events: &broadcast::Sender<DeletionEvent>, id: &RecordId, state: DeletionState) {
    tracing::debug!(record_id = %id, ?state, "deletion state");
    // No subscribers is fine.
    let _ = events.send(DeletionEvent {
        record_id: id.clone(),
        state,
    });
}

fn persistence_failure(err: &crate::error::StoreError) -> DeletionState {
    DeletionState::Failed(FailureReason::Persistence(err.to_string()))
}
