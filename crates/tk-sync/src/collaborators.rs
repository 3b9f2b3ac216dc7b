//! Capabilities of the external stores and the authentication gate.
//!
//! Collaborators are addressed by sync ID (or group ID), never by the local
//! record ID. Every call is best-effort: a failure is logged and collected,
//! and never prevents the other collaborators or the local store from
//! proceeding.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tk_core::{GroupId, ScheduleKind, SyncId, TreatmentKind, TreatmentRecord};

use crate::error::{AuthError, CollaboratorError};

/// The remote event log.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    async fn delete_by_id(&self, sync_id: &SyncId) -> Result<(), CollaboratorError>;

    /// Deletes every entry of a record group in one call.
    async fn delete_by_group_id(&self, group: &GroupId) -> Result<(), CollaboratorError>;

    async fn upload_records(&self, records: &[TreatmentRecord]) -> Result<(), CollaboratorError>;

    /// Uploads a schedule in its persisted document form.
    async fn upload_profile(
        &self,
        kind: ScheduleKind,
        document: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

/// The wearable/health data store.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn delete_by_sync_id(
        &self,
        sync_id: &SyncId,
        kind: TreatmentKind,
    ) -> Result<(), CollaboratorError>;

    async fn save_records(&self, records: &[TreatmentRecord]) -> Result<(), CollaboratorError>;
}

/// Gate in front of destructive insulin operations.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `Ok(true)` if the user confirmed.
    async fn authenticate(&self, reason: &str) -> Result<bool, AuthError>;
}

/// Names a collaborator in reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    RemoteLog,
    HealthStore,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoteLog => "remote_log",
            Self::HealthStore => "health_store",
        };
        write!(f, "{s}")
    }
}

/// A collaborator call that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorFailure {
    pub collaborator: Collaborator,
    pub error: CollaboratorError,
}

/// The optional external stores records are propagated to.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub remote_log: Option<Arc<dyn RemoteLog>>,
    pub health_store: Option<Arc<dyn HealthStore>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("remote_log", &self.remote_log.is_some())
            .field("health_store", &self.health_store.is_some())
            .finish()
    }
}

impl Collaborators {
    /// Tells every collaborator to drop its copies of `members`.
    ///
    /// `members` is the requested record followed by its group siblings.
    /// The remote log deletes a group in one call by group ID. The health
    /// store is told about each member under its own sync ID and kind, the
    /// keys its copies were saved under.
    pub(crate) async fn notify_deletion(
        &self,
        members: &[TreatmentRecord],
    ) -> Vec<CollaboratorFailure> {
        let Some(record) = members.first() else {
            return Vec::new();
        };
        let remote = async {
            let Some(remote_log) = &self.remote_log else {
                return Ok(());
            };
            match &record.group_id {
                Some(group) => remote_log.delete_by_group_id(group).await,
                None => remote_log.delete_by_id(&record.sync_id).await,
            }
        };
        let health = async {
            let mut results = Vec::new();
            if let Some(health_store) = &self.health_store {
                for member in members {
                    results.push(
                        health_store
                            .delete_by_sync_id(&member.sync_id, member.kind())
                            .await,
                    );
                }
            }
            results
        };

        let (remote, health) = tokio::join!(remote, health);
        let results = std::iter::once((Collaborator::RemoteLog, remote))
            .chain(health.into_iter().map(|result| (Collaborator::HealthStore, result)));
        collect_failures(&record.id, results)
    }

    /// Sends newly stored records to every collaborator.
    pub(crate) async fn propagate_additions(
        &self,
        records: &[TreatmentRecord],
    ) -> Vec<CollaboratorFailure> {
        let remote = async {
            match &self.remote_log {
                Some(remote_log) => remote_log.upload_records(records).await,
                None => Ok(()),
            }
        };
        let health = async {
            match &self.health_store {
                Some(health_store) => health_store.save_records(records).await,
                None => Ok(()),
            }
        };

        let (remote, health) = tokio::join!(remote, health);
        let label = format!("{} records", records.len());
        collect_failures(
            &label,
            [
                (Collaborator::RemoteLog, remote),
                (Collaborator::HealthStore, health),
            ],
        )
    }
}

fn collect_failures(
    subject: &dyn fmt::Display,
    results: impl IntoIterator<Item = (Collaborator, Result<(), CollaboratorError>)>,
) -> Vec<CollaboratorFailure> {
    results
        .into_iter()
        .filter_map(|(collaborator, result)| {
            let error = result.err()?;
            tracing::warn!(
                %collaborator,
                subject = %subject,
                error = %error,
                "collaborator call failed; continuing"
            );
            Some(CollaboratorFailure {
                collaborator,
                error,
            })
        })
        .collect()
}
